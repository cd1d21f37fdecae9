//! Retrying executor for single HTTP calls.
//!
//! # Per-call state machine
//!
//! ```text
//!            ┌──────────── make_request() ◀──────────────┐
//!            ▼                                           │
//!   200/201 ─▶ Ok(response)                              │
//!   429     ─▶ quota body, no retry hint?                │
//!              └─yes─▶ Err(QuotaExceeded)                │
//!              attempts left? ─no─▶ Err(RateLimitExceeded)│
//!              └─yes─▶ sleep(resolve_retry_delay) ────────┤
//!   other   ─▶ Ok(response)   (caller inspects status)   │
//!   timeout / network error                              │
//!              attempts left? ─no─▶ Err(last error)      │
//!              └─yes─▶ sleep(exponential backoff) ───────┘
//!   any other error ─▶ Err(error)   (never retried)
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::retry::{
    DelaySource, RetryDelay, error_message, exponential_delay, indicates_quota_exhaustion,
    resolve_retry_delay,
};
use crate::traits::ResponseLike;

/// Retry budget and backoff bounds, all in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_retries: u32,
    pub initial_delay: u64,
    pub max_delay: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: 1,
            max_delay: 60,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: u64, max_delay: u64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: u64) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Backoff before the retry that follows `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> u64 {
        exponential_delay(self.initial_delay, attempt, self.max_delay)
    }
}

/// Why an attempt was retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    Timeout,
    Network,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RateLimited => write!(f, "rate limited"),
            RetryReason::Timeout => write!(f, "timed out"),
            RetryReason::Network => write!(f, "network error"),
        }
    }
}

/// One scheduled retry. Only lives for the duration of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// The attempt that failed (0-based).
    pub attempt: u32,
    pub reason: RetryReason,
    pub delay_secs: u64,
    /// Sum of all delays slept so far in this call, this one included.
    pub elapsed_delay_secs: u64,
    pub source: DelaySource,
}

/// Wraps HTTP calls with retry on 429, timeouts and network errors.
#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    label: String,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    /// `label` names the remote service in logs and in `QuotaExceeded`.
    pub fn new(label: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            label: label.into(),
            policy,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `make_request` until it yields a usable response or retries run out.
    pub async fn invoke<F, Fut, R>(&self, make_request: F) -> Result<R, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, AppError>>,
        R: ResponseLike,
    {
        self.invoke_recorded(make_request).await.0
    }

    /// Like [`invoke`](Self::invoke), also returning every retry that was scheduled.
    pub async fn invoke_recorded<F, Fut, R>(
        &self,
        mut make_request: F,
    ) -> (Result<R, AppError>, Vec<RetryAttempt>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, AppError>>,
        R: ResponseLike,
    {
        let max_retries = self.policy.max_retries.max(1);
        let mut history: Vec<RetryAttempt> = Vec::new();
        let mut attempt = 0u32;

        loop {
            let attempts_left = attempt + 1 < max_retries;

            let (delay, reason) = match make_request().await {
                Ok(response) => match response.status() {
                    200 | 201 => return (Ok(response), history),
                    429 => {
                        if indicates_quota_exhaustion(&response) {
                            let message = error_message(&response);
                            tracing::warn!(
                                service = %self.label,
                                %message,
                                "Quota exhausted, not retrying"
                            );
                            return (
                                Err(AppError::QuotaExceeded {
                                    provider: self.label.clone(),
                                    message,
                                }),
                                history,
                            );
                        }
                        if !attempts_left {
                            tracing::error!(
                                service = %self.label,
                                attempts = max_retries,
                                "Rate limit exceeded after all retries"
                            );
                            return (Err(AppError::RateLimitExceeded), history);
                        }
                        let fallback = self.policy.backoff(attempt);
                        let delay =
                            resolve_retry_delay(Some(&response), fallback, self.policy.max_delay);
                        (delay, RetryReason::RateLimited)
                    }
                    status => {
                        tracing::debug!(service = %self.label, status, "Non-retryable status");
                        return (Ok(response), history);
                    }
                },
                Err(err) if err.is_retryable() => {
                    if !attempts_left {
                        tracing::error!(
                            service = %self.label,
                            attempts = max_retries,
                            error = %err,
                            "Request failed after all retries"
                        );
                        return (Err(err), history);
                    }
                    let reason = match err {
                        AppError::Timeout(_) => RetryReason::Timeout,
                        _ => RetryReason::Network,
                    };
                    let delay = RetryDelay {
                        seconds: self.policy.backoff(attempt),
                        source: DelaySource::Fallback,
                    };
                    (delay, reason)
                }
                Err(err) => {
                    tracing::error!(service = %self.label, error = %err, "Fatal request error");
                    return (Err(err), history);
                }
            };

            let elapsed_delay_secs = history
                .last()
                .map_or(0, |prev| prev.elapsed_delay_secs)
                + delay.seconds;
            tracing::warn!(
                service = %self.label,
                attempt = attempt + 1,
                max_retries,
                delay_secs = delay.seconds,
                source = %delay.source,
                %reason,
                "Retrying request"
            );
            history.push(RetryAttempt {
                attempt,
                reason,
                delay_secs: delay.seconds,
                elapsed_delay_secs,
                source: delay.source,
            });

            tokio::time::sleep(Duration::from_secs(delay.seconds)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::testutil::MockTransport;
    use crate::traits::HttpTransport;

    fn request() -> HttpRequest {
        HttpRequest::get("https://api.example.com/jobs", Duration::from_secs(30))
    }

    fn invoker() -> ResilientInvoker {
        ResilientInvoker::new("test", RetryPolicy::default())
    }

    fn assert_slept(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(secs)
                && elapsed < Duration::from_secs(secs) + Duration::from_millis(100),
            "expected ~{secs}s of backoff, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_immediately() {
        let transport = MockTransport::with_responses(vec![Ok(HttpResponse::new(200, "ok"))]);
        let req = request();
        let start = Instant::now();

        let response = invoker()
            .invoke(|| transport.send(req.clone()))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.request_count(), 1);
        assert_slept(start, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn created_counts_as_success() {
        let transport = MockTransport::with_responses(vec![Ok(HttpResponse::new(201, "made"))]);
        let req = request();
        let response = invoker()
            .invoke(|| transport.send(req.clone()))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_429_with_exponential_fallback() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let req = request();
        let start = Instant::now();

        let (result, history) = invoker()
            .invoke_recorded(|| transport.send(req.clone()))
            .await;

        assert_eq!(result.unwrap().status, 200);
        assert_eq!(transport.request_count(), 3);
        assert_slept(start, 3);
        let delays: Vec<u64> = history.iter().map(|a| a.delay_secs).collect();
        assert_eq!(delays, vec![1, 2]);
        assert_eq!(history[1].elapsed_delay_secs, 3);
        assert!(history.iter().all(|a| a.source == DelaySource::Fallback));
        assert!(history.iter().all(|a| a.reason == RetryReason::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn honours_server_retry_hint() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(429, "").with_header("Retry-After", "5")),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let req = request();
        let start = Instant::now();

        let (result, history) = invoker()
            .invoke_recorded(|| transport.send(req.clone()))
            .await;

        assert!(result.is_ok());
        assert_slept(start, 5);
        assert_eq!(history[0].source, DelaySource::Header("Retry-After"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_429_reports_rate_limit() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(200, "never reached")),
        ]);
        let req = request();
        let start = Instant::now();

        let result = invoker().invoke(|| transport.send(req.clone())).await;

        assert!(matches!(result, Err(AppError::RateLimitExceeded)));
        assert_eq!(transport.request_count(), 3);
        // No sleep after the final attempt.
        assert_slept(start, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_statuses_are_returned_as_is() {
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::new(500, "boom")),
            Ok(HttpResponse::new(200, "never reached")),
        ]);
        let req = request();

        let response = invoker()
            .invoke(|| transport.send(req.clone()))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried_with_backoff() {
        let transport = MockTransport::with_responses(vec![
            Err(AppError::Timeout(30)),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let req = request();
        let invoker = ResilientInvoker::new("test", RetryPolicy::default().with_initial_delay(3));
        let start = Instant::now();

        let (result, history) = invoker
            .invoke_recorded(|| transport.send(req.clone()))
            .await;

        assert!(result.is_ok());
        assert_slept(start, 3);
        assert_eq!(history[0].reason, RetryReason::Timeout);
        assert_eq!(history[0].source, DelaySource::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_network_errors_surface_last_error() {
        let transport = MockTransport::with_responses(vec![
            Err(AppError::NetworkError("reset".into())),
            Err(AppError::Timeout(30)),
            Err(AppError::NetworkError("refused".into())),
        ]);
        let req = request();

        let result = invoker().invoke(|| transport.send(req.clone())).await;

        match result {
            Err(AppError::NetworkError(msg)) => assert_eq!(msg, "refused"),
            other => panic!("expected network error, got {other:?}"),
        }
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let transport = MockTransport::with_responses(vec![
            Err(AppError::Generic("bug".into())),
            Ok(HttpResponse::new(200, "never reached")),
        ]);
        let req = request();

        let result = invoker().invoke(|| transport.send(req.clone())).await;

        assert!(matches!(result, Err(AppError::Generic(_))));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_429_short_circuits() {
        let body =
            serde_json::json!({"message": "You have exceeded the MONTHLY quota for Requests"});
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::json(429, &body)),
            Ok(HttpResponse::new(200, "never reached")),
        ]);
        let req = request();

        let result = ResilientInvoker::new("indeed", RetryPolicy::default())
            .invoke(|| transport.send(req.clone()))
            .await;

        match result {
            Err(AppError::QuotaExceeded { provider, .. }) => assert_eq!(provider, "indeed"),
            other => panic!("expected quota error, got {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_429_with_retry_hint_is_retried() {
        let body = serde_json::json!({
            "error": {"message": "Per-minute request quota exceeded. Please retry after 2 seconds."}
        });
        let transport = MockTransport::with_responses(vec![
            Ok(HttpResponse::json(429, &body)),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let req = request();
        let start = Instant::now();

        let (result, history) = ResilientInvoker::new("indeed", RetryPolicy::default())
            .invoke_recorded(|| transport.send(req.clone()))
            .await;

        assert_eq!(result.unwrap().status, 200);
        assert_eq!(transport.request_count(), 2);
        assert_slept(start, 2);
        assert_eq!(history[0].source, DelaySource::Body);
        assert_eq!(history[0].reason, RetryReason::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_makes_one_attempt() {
        let transport = MockTransport::with_responses(vec![Ok(HttpResponse::new(429, ""))]);
        let req = request();

        let result = ResilientInvoker::new("test", RetryPolicy::new(0, 1, 60))
            .invoke(|| transport.send(req.clone()))
            .await;

        assert!(matches!(result, Err(AppError::RateLimitExceeded)));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn policy_backoff_matches_formula() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..7).map(|a| policy.backoff(a)).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60]);
    }
}

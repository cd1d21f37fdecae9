//! Rate-limit hint parsing and backoff arithmetic.
//!
//! Servers announce "come back later" in many dialects: a standard
//! `Retry-After`, Azure's millisecond headers, OpenAI-style reset headers,
//! or only a sentence in the error body. [`resolve_retry_delay`] folds all
//! of them into one clamped number of seconds and records where it came
//! from.
//!
//! ```text
//! headers (in RATE_LIMIT_HEADERS order) ──first parseable──▶ header:<name>
//!        │ none
//!        ▼
//! body "... after N seconds ..."        ──match──────────▶ body
//!        │ none
//!        ▼
//! caller's fallback delay               ─────────────────▶ fallback
//! ```

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::traits::ResponseLike;

/// Rate-limit headers, checked in this order; the first usable one wins.
pub const RATE_LIMIT_HEADERS: [&str; 6] = [
    "Retry-After",
    "x-ms-retry-after-ms",
    "x-ms-retry-after",
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset-tokens",
    "x-ratelimit-reset",
];

const MILLISECONDS_SUFFIX: &str = "-ms";

static RETRY_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)after\s+(\d+)\s+seconds?").expect("valid retry hint regex"));

static QUOTA_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bquota\b").expect("valid quota regex"));

/// Where a retry delay was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySource {
    Header(&'static str),
    Body,
    Fallback,
}

impl fmt::Display for DelaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelaySource::Header(name) => write!(f, "header:{name}"),
            DelaySource::Body => write!(f, "body"),
            DelaySource::Fallback => write!(f, "fallback"),
        }
    }
}

/// A resolved wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay {
    pub seconds: u64,
    pub source: DelaySource,
}

/// Exponential backoff: `max(1, min(initial_delay * 2^attempt, max_delay))`.
pub fn exponential_delay(initial_delay: u64, attempt: u32, max_delay: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    clamp_delay(initial_delay.saturating_mul(factor), max_delay)
}

fn clamp_delay(seconds: u64, max_delay: u64) -> u64 {
    seconds.min(max_delay).max(1)
}

/// Decide how long to wait before retrying `response`.
///
/// The result is always within `[1, max_delay]`.
pub fn resolve_retry_delay<R: ResponseLike>(
    response: Option<&R>,
    fallback_delay: u64,
    max_delay: u64,
) -> RetryDelay {
    resolve_retry_delay_at(response, fallback_delay, max_delay, Utc::now())
}

fn resolve_retry_delay_at<R: ResponseLike>(
    response: Option<&R>,
    fallback_delay: u64,
    max_delay: u64,
    now: DateTime<Utc>,
) -> RetryDelay {
    if let Some(response) = response {
        for name in RATE_LIMIT_HEADERS {
            let Some(raw) = response.header(name).filter(|v| !v.trim().is_empty()) else {
                continue;
            };

            let parsed = if name.ends_with(MILLISECONDS_SUFFIX) {
                parse_milliseconds(raw)
            } else {
                parse_retry_after_at(raw, now)
            };

            if let Some(seconds) = parsed {
                return RetryDelay {
                    seconds: clamp_delay(seconds, max_delay),
                    source: DelaySource::Header(name),
                };
            }
        }

        if let Some(seconds) = extract_delay_from_body(response) {
            return RetryDelay {
                seconds: clamp_delay(seconds, max_delay),
                source: DelaySource::Body,
            };
        }
    }

    RetryDelay {
        seconds: clamp_delay(fallback_delay, max_delay),
        source: DelaySource::Fallback,
    }
}

fn parse_milliseconds(raw: &str) -> Option<u64> {
    let ms: f64 = raw.trim().parse().ok()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some((ms / 1000.0).ceil() as u64)
}

/// Convert a `Retry-After` style value into seconds.
///
/// Accepts a non-negative number of seconds (fractions round up), an
/// `HH:MM:SS` duration, or an HTTP-date after `now`.
fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>()
        && seconds.is_finite()
        && seconds >= 0.0
    {
        return Some(seconds.ceil() as u64);
    }

    if value.matches(':').count() == 2
        && let Some(seconds) = parse_clock_duration(value)
    {
        return Some(seconds);
    }

    let retry_at = DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // HTTP-date without a zone: read it as UTC.
            NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S").map(|dt| dt.and_utc())
        })
        .ok()?;

    let delta_ms = (retry_at - now).num_milliseconds();
    if delta_ms > 0 {
        Some((delta_ms as u64).div_ceil(1000))
    } else {
        None
    }
}

fn parse_clock_duration(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: f64 = parts.next()?.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds.trunc() as i64)?;
    u64::try_from(total).ok()
}

/// The human-readable error message carried by a response.
///
/// Looks at `error.message`, `error.code` and `message` in a JSON body and
/// falls back to the raw text.
pub fn error_message<R: ResponseLike>(response: &R) -> String {
    if let Some(Value::Object(data)) = response.json() {
        let nested = match data.get("error") {
            Some(Value::Object(error)) => {
                non_empty_text(error.get("message")).or_else(|| non_empty_text(error.get("code")))
            }
            _ => None,
        };
        if let Some(message) = nested.or_else(|| non_empty_text(data.get("message"))) {
            return message;
        }
    }
    response.text().to_string()
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Look for a "retry after N seconds" hint in the response body.
pub fn extract_delay_from_body<R: ResponseLike>(response: &R) -> Option<u64> {
    let message = error_message(response);
    let captures = RETRY_HINT.captures(&message)?;
    // All digits, so a parse failure means overflow.
    Some(captures.get(1)?.as_str().parse().unwrap_or(u64::MAX))
}

/// True when the response says how long to wait, either in a rate-limit
/// header or in a "retry after N seconds" message.
pub fn has_retry_hint<R: ResponseLike>(response: &R) -> bool {
    RATE_LIMIT_HEADERS
        .iter()
        .any(|name| response.header(name).is_some_and(|v| !v.trim().is_empty()))
        || RETRY_HINT.is_match(&error_message(response))
}

/// True when the response says the account's quota is used up.
///
/// The body has to talk about a quota. A 429 that also says when to retry
/// is a per-window limit and does not qualify.
pub fn indicates_quota_exhaustion<R: ResponseLike>(response: &R) -> bool {
    match response.status() {
        403 => QUOTA_HINT.is_match(&error_message(response)),
        429 => !has_retry_hint(response) && QUOTA_HINT.is_match(&error_message(response)),
        _ => false,
    }
}

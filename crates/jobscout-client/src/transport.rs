use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::http::{HttpRequest, HttpResponse, Method};
use jobscout_core::retry::{error_message, indicates_quota_exhaustion};
use jobscout_core::traits::HttpTransport;
use reqwest::Client;

const USER_AGENT: &str = "jobscout/0.3 (job search)";

/// Hostname RapidAPI expects in `X-RapidAPI-Host` for a given API URL.
pub fn rapidapi_host(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}

/// Attach the RapidAPI key and host headers to a request.
pub fn with_rapidapi_headers(request: HttpRequest, api_key: &str, host: &str) -> HttpRequest {
    request
        .with_header("X-RapidAPI-Key", api_key)
        .with_header("X-RapidAPI-Host", host)
}

/// [`HttpTransport`] backed by a shared reqwest client.
///
/// The timeout comes from each request; there is no client-wide timeout.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        let timeout_secs = request.timeout.as_secs().max(1);
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(e, timeout_secs))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        tracing::debug!(url = %request.url, status, "HTTP response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Everything that fails before a response arrives is a transport failure
/// and therefore retryable.
fn classify_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else if e.is_builder() {
        AppError::HttpError(format!("Invalid request: {e}"))
    } else {
        AppError::NetworkError(e.to_string())
    }
}

/// Default per-request timeout for callers that do not pick their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// Error for a response the retry loop handed back without success.
///
/// A body that reports an exhausted quota becomes `QuotaExceeded`; anything
/// else is an `ApiError` carrying the start of the body.
pub(crate) fn unsuccessful_response(service: &str, response: &HttpResponse) -> AppError {
    if indicates_quota_exhaustion(response) {
        return AppError::QuotaExceeded {
            provider: service.to_string(),
            message: error_message(response),
        };
    }
    let message = if response.body.trim().is_empty() {
        "No error details".to_string()
    } else {
        truncate_chars(&response.body, ERROR_BODY_PREVIEW_CHARS)
    };
    AppError::ApiError {
        status_code: response.status,
        message,
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

use thiserror::Error;

/// Application-wide error types for jobscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed after the connection was established.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// An API answered with a status the caller cannot use.
    #[error("API error (HTTP {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server kept answering 429 until retries ran out.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The provider's whole allotment is spent, not just a burst limit.
    #[error("Quota exceeded for {provider}: {message}")]
    QuotaExceeded { provider: String, message: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or writing the job cache snapshot failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is a transient transport failure worth retrying.
    ///
    /// `RateLimitExceeded` is terminal: it is only produced once the retry
    /// budget for 429 responses has been spent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::NetworkError(_) | AppError::Timeout(_))
    }

    /// Returns true if this error signals provider-level quota exhaustion.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, AppError::QuotaExceeded { .. })
    }
}

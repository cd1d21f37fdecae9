use std::future::Future;

use crate::error::AppError;
use crate::http::{HttpRequest, HttpResponse};
use crate::models::{Job, SearchQuery};

/// The three things the retry layer needs to know about a response.
pub trait ResponseLike {
    fn status(&self) -> u16;

    /// Header value by name, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Raw response body.
    fn text(&self) -> &str;

    /// The body parsed as JSON, if it is JSON.
    fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(self.text()).ok()
    }
}

/// Sends one HTTP request and reads the full response.
///
/// Implementations must honour `request.timeout` and report it as
/// [`AppError::Timeout`]; connection-level failures are
/// [`AppError::NetworkError`]. Any HTTP status is a successful send.
pub trait HttpTransport: Send + Sync + Clone {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, AppError>> + Send;
}

/// A source of job postings.
///
/// Providers signal an exhausted allotment with [`AppError::QuotaExceeded`]
/// so that callers can route around them for the rest of the session.
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    fn search_jobs(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;
}

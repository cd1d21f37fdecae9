pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod invoker;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod traits;

#[doc(hidden)]
pub mod testutil;

pub use aggregator::{AggregatorConfig, SearchNotice, SearchReport, SourceAggregator};
pub use cache::{CacheEntry, JobCache, cache_key};
pub use config::Settings;
pub use error::AppError;
pub use http::{HttpRequest, HttpResponse, Method};
pub use invoker::{ResilientInvoker, RetryAttempt, RetryPolicy};
pub use models::{Job, SearchQuery};
pub use rate_limit::RateLimiter;
pub use traits::{HttpTransport, JobProvider, ResponseLike};

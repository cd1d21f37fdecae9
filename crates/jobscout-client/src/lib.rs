pub mod embeddings;
pub mod indeed;
pub mod jsearch;
pub mod transport;
pub mod usage;

pub use embeddings::{AzureEmbeddingClient, index_limit};
pub use indeed::IndeedProvider;
pub use jsearch::JSearchProvider;
pub use transport::ReqwestTransport;
pub use usage::TokenUsageTracker;

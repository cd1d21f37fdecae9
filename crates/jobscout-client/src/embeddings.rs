//! Azure OpenAI embeddings client.
//!
//! Every call goes through the retry layer. Batches are spaced by a fixed
//! delay; a batch that is still rate limited after its retries is dropped
//! instead of being replayed text by text, which would only hit the same
//! limit harder.

use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::http::HttpRequest;
use jobscout_core::invoker::{ResilientInvoker, RetryPolicy};
use jobscout_core::traits::HttpTransport;
use serde::Deserialize;
use serde_json::json;

use crate::transport::unsuccessful_response;
use crate::usage::TokenUsageTracker;

pub const EMBEDDING_DEPLOYMENT: &str = "text-embedding-3-small";
const API_VERSION: &str = "2024-02-01";
const SINGLE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_TIMEOUT: Duration = Duration::from_secs(25);
const DEFAULT_BATCH_SIZE: usize = 15;

/// How many jobs to embed for a search.
///
/// At least `desired_top_matches + 10` (never fewer than 15) so ranking has
/// candidates to choose from, capped by `max_jobs_to_index` and by what was
/// found.
pub fn index_limit(
    total_jobs: usize,
    desired_top_matches: usize,
    max_jobs_to_index: usize,
) -> usize {
    let wanted = (desired_top_matches + 10).max(15);
    total_jobs.min(max_jobs_to_index.min(wanted))
}

/// Strip a trailing `/` and a trailing `/openai` so the deployment path is
/// not doubled.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/openai")
        .unwrap_or(trimmed)
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens_used: u64,
}

/// Result of embedding many texts.
///
/// `embeddings` holds one vector per text that succeeded, in input order;
/// texts from skipped or failed batches are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f32>>,
    pub total_tokens: u64,
    pub skipped_batches: usize,
}

#[derive(Clone)]
pub struct AzureEmbeddingClient<T> {
    transport: T,
    api_key: String,
    url: String,
    batch_size: usize,
    batch_delay: Duration,
    invoker: ResilientInvoker,
    usage: TokenUsageTracker,
}

impl<T: HttpTransport> AzureEmbeddingClient<T> {
    pub fn new(transport: T, api_key: impl Into<String>, endpoint: &str) -> Self {
        let url = format!(
            "{}/openai/deployments/{EMBEDDING_DEPLOYMENT}/embeddings?api-version={API_VERSION}",
            normalize_endpoint(endpoint)
        );
        Self {
            transport,
            api_key: api_key.into(),
            url,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(500),
            invoker: ResilientInvoker::new("azure-openai", RetryPolicy::default()),
            usage: TokenUsageTracker::new(),
        }
    }

    /// Default batch size and the pause between consecutive batches.
    pub fn with_batching(mut self, batch_size: usize, batch_delay: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_delay = batch_delay;
        self
    }

    pub fn with_usage_tracker(mut self, usage: TokenUsageTracker) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.invoker = ResilientInvoker::new("azure-openai", policy);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn usage(&self) -> &TokenUsageTracker {
        &self.usage
    }

    fn request(&self, input: serde_json::Value, timeout: Duration) -> HttpRequest {
        HttpRequest::post_json(
            &self.url,
            json!({"input": input, "model": EMBEDDING_DEPLOYMENT}),
            timeout,
        )
        .with_header("api-key", &self.api_key)
    }

    async fn call(&self, request: HttpRequest) -> Result<EmbeddingResponse, AppError> {
        let response = self
            .invoker
            .invoke(|| self.transport.send(request.clone()))
            .await?;
        if !matches!(response.status, 200 | 201) {
            return Err(unsuccessful_response(self.invoker.label(), &response));
        }
        Ok(response.parse()?)
    }

    pub async fn get_embedding(&self, text: &str) -> Result<Embedding, AppError> {
        let response = self.call(self.request(json!(text), SINGLE_TIMEOUT)).await?;
        let tokens_used = response.tokens_used(|| estimate_tokens(text));
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| AppError::Generic("Embedding response contained no data".into()))?;

        self.usage.add_embedding_tokens(tokens_used);
        Ok(Embedding {
            vector,
            tokens_used,
        })
    }

    /// Embed `texts` in batches of `batch_size` (the configured size when 0).
    pub async fn get_embeddings_batch(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> EmbeddingBatch {
        let mut result = EmbeddingBatch::default();
        if texts.is_empty() {
            return result;
        }
        let batch_size = if batch_size == 0 { self.batch_size } else { batch_size };
        let total_batches = texts.len().div_ceil(batch_size);

        for (index, batch) in texts.chunks(batch_size).enumerate() {
            let batch_num = index + 1;
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            tracing::debug!(
                batch = batch_num,
                total_batches,
                size = batch.len(),
                "Embedding batch"
            );

            match self.call(self.request(json!(batch), BATCH_TIMEOUT)).await {
                Ok(response) => {
                    let tokens =
                        response.tokens_used(|| batch.iter().map(|t| estimate_tokens(t)).sum());
                    let mut data = response.data;
                    data.sort_by_key(|item| item.index);
                    result.embeddings.extend(data.into_iter().map(|item| item.embedding));
                    result.total_tokens += tokens;
                    self.usage.add_embedding_tokens(tokens);
                }
                Err(AppError::RateLimitExceeded | AppError::QuotaExceeded { .. }) => {
                    tracing::warn!(
                        batch = batch_num,
                        total_batches,
                        "Rate limit reached after retries, skipping embedding batch"
                    );
                    result.skipped_batches += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        batch = batch_num,
                        error = %e,
                        "Batch embedding failed, embedding texts one at a time"
                    );
                    for text in batch {
                        match self.get_embedding(text).await {
                            Ok(embedding) => {
                                result.total_tokens += embedding.tokens_used;
                                result.embeddings.push(embedding.vector);
                            }
                            Err(e) => tracing::warn!(error = %e, "Embedding failed, dropping text"),
                        }
                    }
                }
            }
        }
        result
    }
}

/// Rough count for when the service omits `usage`: about four characters a token.
fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(4) as u64
}

// ---- Embeddings API types ----

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

impl EmbeddingResponse {
    fn tokens_used(&self, estimate: impl FnOnce() -> u64) -> u64 {
        match &self.usage {
            Some(usage) => usage.total_tokens,
            None => estimate(),
        }
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// USD per 1K tokens for text-embedding-3-small.
pub const EMBEDDING_COST_PER_1K: f64 = 0.00002;

/// Running total of embedding tokens for a session. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct TokenUsageTracker {
    embedding_tokens: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub embedding_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl TokenUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_embedding_tokens(&self, tokens: u64) {
        self.embedding_tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn summary(&self) -> UsageSummary {
        let tokens = self.embedding_tokens.load(Ordering::Relaxed);
        UsageSummary {
            total_tokens: tokens,
            embedding_tokens: tokens,
            estimated_cost_usd: tokens as f64 / 1000.0 * EMBEDDING_COST_PER_1K,
        }
    }

    pub fn reset(&self) {
        self.embedding_tokens.store(0, Ordering::Relaxed);
    }
}

//! Primary/fallback job-source composition with sticky quota failover.
//!
//! The primary provider is tried first. Once it reports an exhausted quota
//! the aggregator stops routing to it for the rest of its lifetime; ordinary
//! provider failures only degrade the current search.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AppError;
use crate::models::{Job, SearchQuery};
use crate::traits::JobProvider;

/// Tunables for [`SourceAggregator`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Never call the primary provider.
    pub prefer_fallback_only: bool,
    /// The fallback tops up results when the primary returned fewer than
    /// `max_rows * fallback_fill_ratio` jobs.
    pub fallback_fill_ratio: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            prefer_fallback_only: false,
            fallback_fill_ratio: 0.5,
        }
    }
}

/// Something the caller should tell the user about a search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchNotice {
    /// The primary ran out of quota and the fallback took over. Informational.
    QuotaFailover { provider: String },
    /// A provider failed and its results are missing from this search.
    ProviderFailed { provider: String, message: String },
    /// No source produced any job.
    NoJobsFound,
}

impl fmt::Display for SearchNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaFailover { provider } => write!(
                f,
                "{provider} quota exhausted, using the fallback source for this session"
            ),
            Self::ProviderFailed { provider, message } => {
                write!(f, "{provider} search failed: {message}")
            }
            Self::NoJobsFound => write!(f, "No jobs found for this search"),
        }
    }
}

/// Outcome of one aggregated search.
#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    /// Deduplicated, truncated to `max_rows`, primary results first.
    pub jobs: Vec<Job>,
    pub primary_count: usize,
    pub fallback_count: usize,
    pub notices: Vec<SearchNotice>,
}

impl SearchReport {
    /// True when every source came back empty. A search that found jobs
    /// which were later filtered away does not count.
    pub fn no_jobs_found(&self) -> bool {
        self.primary_count == 0 && self.fallback_count == 0
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    primary_quota_exceeded: bool,
    last_error: Option<String>,
}

/// Combines a primary and a fallback provider.
///
/// Clones share the quota flag, so the failover holds for every handle
/// created from the same instance.
#[derive(Clone)]
pub struct SourceAggregator<P, F> {
    primary: Option<P>,
    fallback: Option<F>,
    config: AggregatorConfig,
    state: Arc<Mutex<AggregatorState>>,
}

impl<P: JobProvider, F: JobProvider> SourceAggregator<P, F> {
    pub fn new(primary: Option<P>, fallback: Option<F>, config: AggregatorConfig) -> Self {
        Self {
            primary,
            fallback,
            config,
            state: Arc::new(Mutex::new(AggregatorState::default())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned aggregator mutex");
            poisoned.into_inner()
        })
    }

    /// Whether the primary has been retired for this session.
    pub fn primary_quota_exceeded(&self) -> bool {
        self.lock_state().primary_quota_exceeded
    }

    /// The most recent provider failure from the latest search.
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    fn record_failure(&self, provider: &str, error: &AppError, notices: &mut Vec<SearchNotice>) {
        tracing::warn!(provider = %provider, error = %error, "Job provider failed");
        self.lock_state().last_error = Some(error.to_string());
        notices.push(SearchNotice::ProviderFailed {
            provider: provider.to_string(),
            message: error.to_string(),
        });
    }

    pub async fn search(&self, query: &SearchQuery) -> SearchReport {
        let mut report = SearchReport::default();
        let max_rows = query.max_rows;
        self.lock_state().last_error = None;

        let mut primary_jobs = Vec::new();
        let mut skip_primary = self.primary_quota_exceeded() || self.config.prefer_fallback_only;

        match self.primary.as_ref() {
            Some(primary) if !skip_primary => match primary.search_jobs(query).await {
                Ok(jobs) => primary_jobs = jobs,
                Err(e) if e.is_quota_exhausted() => {
                    self.lock_state().primary_quota_exceeded = true;
                    skip_primary = true;
                    tracing::info!(
                        provider = %primary.name(),
                        error = %e,
                        "Primary job source quota exhausted, switching to fallback for this session"
                    );
                    report.notices.push(SearchNotice::QuotaFailover {
                        provider: primary.name().to_string(),
                    });
                }
                Err(e) => self.record_failure(primary.name(), &e, &mut report.notices),
            },
            _ => skip_primary = true,
        }
        report.primary_count = primary_jobs.len();

        let mut fallback_jobs = Vec::new();
        if let Some(fallback) = self.fallback.as_ref() {
            let collected = primary_jobs.len();
            let under_filled =
                (collected as f64) < max_rows as f64 * self.config.fallback_fill_ratio;
            let remaining = max_rows.saturating_sub(collected);

            if (skip_primary || under_filled) && remaining > 0 {
                tracing::debug!(
                    provider = %fallback.name(),
                    collected,
                    remaining,
                    "Querying fallback job source"
                );
                let fallback_query = query.clone().with_max_rows(remaining);
                match fallback.search_jobs(&fallback_query).await {
                    Ok(jobs) => fallback_jobs = jobs,
                    Err(e) => self.record_failure(fallback.name(), &e, &mut report.notices),
                }
            }
        }
        report.fallback_count = fallback_jobs.len();

        report.jobs = merge_unique(primary_jobs, fallback_jobs, max_rows);
        if report.no_jobs_found() {
            report.notices.push(SearchNotice::NoJobsFound);
        }
        tracing::info!(
            primary = report.primary_count,
            fallback = report.fallback_count,
            returned = report.jobs.len(),
            "Aggregated job search finished"
        );
        report
    }
}

/// Concatenate, drop later duplicates and truncate.
fn merge_unique(primary: Vec<Job>, fallback: Vec<Job>, max_rows: usize) -> Vec<Job> {
    let mut seen = HashSet::new();
    primary
        .into_iter()
        .chain(fallback)
        .filter(|job| seen.insert(job.dedup_key()))
        .take(max_rows)
        .collect()
}

impl<P: JobProvider, F: JobProvider> JobProvider for SourceAggregator<P, F> {
    fn name(&self) -> &str {
        "aggregator"
    }

    async fn search_jobs(&self, query: &SearchQuery) -> Result<Vec<Job>, AppError> {
        Ok(self.search(query).await.jobs)
    }
}

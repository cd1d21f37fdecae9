//! Session-scoped cache of job-search results.
//!
//! Entries are keyed by the normalized search parameters and expire after a
//! TTL. Expired entries are evicted lazily when they are read; nothing sweeps
//! in the background. [`JobCache::purge_expired`] exists for callers that
//! keep a cache around long enough to care.
//!
//! A cache can be snapshotted to JSON and restored. Older snapshots stored a
//! single result set at the top level instead of a keyed map; those are
//! upgraded into the keyed map when loaded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{DEFAULT_COUNTRY, DEFAULT_JOB_TYPE, DEFAULT_LOCATION, Job, SearchQuery};
use crate::traits::JobProvider;

/// One week.
pub const DEFAULT_TTL_HOURS: u32 = 168;

const KEY_SEPARATOR: &str = "|";

/// Build the cache key for a search.
///
/// Text fields are trimmed and lowercased; `max_rows` is kept verbatim.
pub fn cache_key(
    query: &str,
    location: &str,
    max_rows: usize,
    job_type: &str,
    country: &str,
) -> String {
    [
        normalize(query),
        normalize(location),
        max_rows.to_string(),
        normalize(job_type),
        normalize(country),
    ]
    .join(KEY_SEPARATOR)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// A cached result set together with the search that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub jobs: Vec<Job>,
    pub count: usize,
    pub query: String,
    pub location: String,
    pub max_rows: usize,
    pub job_type: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(query: &SearchQuery, jobs: Vec<Job>, ttl: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            key: JobCache::key(query),
            count: jobs.len(),
            jobs,
            query: query.query.clone(),
            location: query.location.clone(),
            max_rows: query.max_rows,
            job_type: query.job_type.clone(),
            country: query.country.clone(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn minutes_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }
}

/// Keyed TTL cache of job results. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct JobCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(query: &SearchQuery) -> String {
        cache_key(
            &query.query,
            &query.location,
            query.max_rows,
            &query.job_type,
            &query.country,
        )
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job cache mutex");
            poisoned.into_inner()
        })
    }

    /// Valid entry for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.lock_entries();
        let entry = entries.get(key)?;
        if entry.is_valid_at(now) {
            Some(entry.clone())
        } else {
            tracing::debug!(%key, "Evicting expired cache entry");
            entries.remove(key);
            None
        }
    }

    /// Store `jobs` for `query`, replacing whatever was there.
    pub fn put(&self, query: &SearchQuery, jobs: Vec<Job>, ttl_hours: u32) -> CacheEntry {
        let entry = CacheEntry::new(
            query,
            jobs,
            TimeDelta::hours(i64::from(ttl_hours)),
            Utc::now(),
        );
        self.insert_entry(entry.clone());
        entry
    }

    /// Store a prepared entry under its own key.
    pub fn insert_entry(&self, entry: CacheEntry) {
        self.lock_entries().insert(entry.key.clone(), entry);
    }

    pub fn invalidate(&self, key: &str) -> Option<CacheEntry> {
        self.lock_entries().remove(key)
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored entries ordered by key, expired ones included.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.lock_entries().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Serve `query` from the cache, or from `provider` on a miss.
    ///
    /// `force_refresh` evicts the entry first and always queries the provider.
    /// Empty provider results are not cached, so the next call tries again.
    pub async fn fetch_with_cache<P: JobProvider>(
        &self,
        provider: &P,
        query: &SearchQuery,
        ttl_hours: u32,
        force_refresh: bool,
    ) -> Result<Vec<Job>, AppError> {
        let key = Self::key(query);

        if force_refresh {
            if self.invalidate(&key).is_some() {
                tracing::info!(%key, "Forcing a fresh job search (cache bypassed)");
            }
        } else if let Some(entry) = self.get(&key) {
            tracing::info!(
                %key,
                stored = %entry.created_at.format("%b %d %H:%M"),
                minutes_left = entry.minutes_left(Utc::now()),
                "Using cached job results"
            );
            return Ok(entry.jobs);
        }

        tracing::debug!(%key, provider = provider.name(), "Cache miss, searching provider");
        let jobs = provider.search_jobs(query).await?;

        if jobs.is_empty() {
            tracing::debug!(%key, "Provider returned no jobs, not caching");
        } else {
            let entry = self.put(query, jobs.clone(), ttl_hours);
            tracing::info!(
                %key,
                count = entry.count,
                expires_at = %entry.expires_at,
                "Stored job results in cache"
            );
        }

        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Keyed-map JSON snapshot of every stored entry.
    pub fn to_snapshot(&self) -> Value {
        let entries = self.lock_entries();
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .filter_map(|(key, entry)| {
                serde_json::to_value(entry)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect();
        Value::Object(map)
    }

    /// Rebuild a cache from a snapshot, upgrading the legacy single-entry shape.
    ///
    /// Entries that cannot be read are skipped with a warning.
    pub fn from_snapshot(snapshot: Value) -> Self {
        let cache = Self::new();
        let Value::Object(map) = snapshot else {
            tracing::warn!("Job cache snapshot is not an object, starting empty");
            return cache;
        };

        if map.get("jobs").is_some_and(Value::is_array) {
            match upgrade_legacy_entry(&map) {
                Some(entry) => {
                    tracing::info!(key = %entry.key, "Upgraded legacy job cache entry");
                    cache.insert_entry(entry);
                }
                None => tracing::warn!("Dropping unreadable legacy job cache entry"),
            }
            return cache;
        }

        for (key, value) in map {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(mut entry) => {
                    entry.key = key;
                    cache.insert_entry(entry);
                }
                Err(e) => tracing::warn!(%key, error = %e, "Skipping unreadable cache entry"),
            }
        }
        cache
    }

    /// Load a snapshot file. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::CacheError(format!("Failed to read {}: {e}", path.display())))?;
        let snapshot: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let raw = serde_json::to_string_pretty(&self.to_snapshot())?;
        std::fs::write(path, raw)
            .map_err(|e| AppError::CacheError(format!("Failed to write {}: {e}", path.display())))
    }
}

/// Convert a legacy top-level result set into a keyed entry.
fn upgrade_legacy_entry(legacy: &serde_json::Map<String, Value>) -> Option<CacheEntry> {
    let jobs: Vec<Job> = serde_json::from_value(legacy.get("jobs")?.clone()).ok()?;

    let text = |field: &str, default: &str| -> String {
        legacy
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let query = text("query", "");
    let location = text("location", DEFAULT_LOCATION);
    let job_type = text("job_type", DEFAULT_JOB_TYPE);
    let country = text("country", DEFAULT_COUNTRY);
    let max_rows = legacy
        .get("count")
        .and_then(Value::as_u64)
        .map_or(jobs.len(), |count| count as usize);

    let key = legacy
        .get("cache_key")
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| cache_key(&query, &location, max_rows, &job_type, &country));

    let expires_at = legacy
        .get("expires_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)?;
    let created_at = legacy
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    Some(CacheEntry {
        key,
        count: jobs.len(),
        jobs,
        query,
        location,
        max_rows,
        job_type,
        country,
        created_at,
        expires_at,
    })
}

/// RFC 3339, or a naive ISO / `%Y-%m-%d %H:%M:%S` timestamp read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.and_utc())
}

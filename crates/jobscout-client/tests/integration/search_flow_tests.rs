use std::time::Duration;

use chrono::TimeDelta;
use jobscout_core::aggregator::{AggregatorConfig, SearchNotice, SourceAggregator};
use jobscout_core::cache::JobCache;
use jobscout_core::error::AppError;
use jobscout_core::http::HttpResponse;
use jobscout_core::models::SearchQuery;
use jobscout_core::rate_limit::RateLimiter;
use jobscout_core::testutil::MockTransport;
use jobscout_core::traits::JobProvider;
use tokio::time::Instant;

use crate::integration::common::{
    indeed, indeed_created, jsearch, jsearch_ok, per_minute_quota, quota_exhausted,
};

#[tokio::test(start_paused = true)]
async fn rate_limited_search_is_retried_then_cached() {
    let transport = MockTransport::with_responses(vec![
        Ok(HttpResponse::new(429, "")),
        Ok(HttpResponse::new(429, "")),
        Ok(indeed_created(5)),
    ]);
    let provider = indeed(&transport, RateLimiter::new(3));
    let cache = JobCache::new();
    let query = SearchQuery::new("Rust Engineer");
    let start = Instant::now();

    let jobs = cache
        .fetch_with_cache(&provider, &query, 24, false)
        .await
        .unwrap();

    assert_eq!(jobs.len(), 5);
    assert_eq!(transport.request_count(), 3);
    // Backoff of 3s then 6s (initial delay 3, doubling).
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(9) && elapsed < Duration::from_secs(10),
        "slept {elapsed:?}"
    );

    let entry = cache.get(&JobCache::key(&query)).unwrap();
    assert_eq!(entry.jobs, jobs);
    assert_eq!(entry.count, 5);
    assert_eq!(entry.expires_at - entry.created_at, TimeDelta::hours(24));

    // Served from the cache; no further network traffic.
    let again = cache
        .fetch_with_cache(&provider, &query, 24, false)
        .await
        .unwrap();
    assert_eq!(again, jobs);
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_sets_the_wait() {
    let transport = MockTransport::with_responses(vec![
        Ok(HttpResponse::new(429, "").with_header("retry-after", "2")),
        Ok(indeed_created(1)),
    ]);
    let provider = indeed(&transport, RateLimiter::new(0));
    let start = Instant::now();

    let jobs = provider
        .search_jobs(&SearchQuery::new("rust"))
        .await
        .unwrap();

    assert_eq!(jobs.len(), 1);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried() {
    let transport = MockTransport::with_responses(vec![
        Err(AppError::Timeout(45)),
        Ok(indeed_created(2)),
    ]);
    let provider = indeed(&transport, RateLimiter::new(0));

    let jobs = provider
        .search_jobs(&SearchQuery::new("rust"))
        .await
        .unwrap();

    assert_eq!(jobs.len(), 2);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn quota_exhaustion_fails_over_for_the_session() {
    let indeed_transport = MockTransport::with_responses(vec![Ok(quota_exhausted())]);
    let jsearch_transport = MockTransport::with_responses(vec![
        Ok(jsearch_ok(&[("Data Engineer", "Beta")])),
        Ok(jsearch_ok(&[("Platform Engineer", "Gamma")])),
    ]);
    let aggregator = SourceAggregator::new(
        Some(indeed(&indeed_transport, RateLimiter::new(3))),
        Some(jsearch(&jsearch_transport)),
        AggregatorConfig::default(),
    );
    let query = SearchQuery::new("engineer").with_max_rows(10);

    let first = aggregator.search(&query).await;
    let second = aggregator.search(&query).await;

    assert!(aggregator.primary_quota_exceeded());
    assert_eq!(indeed_transport.request_count(), 1);
    assert_eq!(jsearch_transport.request_count(), 2);
    assert_eq!(first.jobs[0].source, "jsearch");
    assert_eq!(second.jobs[0].title, "Platform Engineer");
    assert!(matches!(
        &first.notices[..],
        [SearchNotice::QuotaFailover { provider }] if provider == "indeed"
    ));
}

#[tokio::test(start_paused = true)]
async fn per_minute_quota_keeps_the_primary_enabled() {
    let indeed_transport = MockTransport::with_responses(vec![
        Ok(per_minute_quota()),
        Ok(indeed_created(4)),
        Ok(indeed_created(4)),
    ]);
    let jsearch_transport = MockTransport::with_responses(vec![]);
    let aggregator = SourceAggregator::new(
        Some(indeed(&indeed_transport, RateLimiter::new(0))),
        Some(jsearch(&jsearch_transport)),
        AggregatorConfig::default(),
    );
    let query = SearchQuery::new("engineer").with_max_rows(4);
    let start = Instant::now();

    let first = aggregator.search(&query).await;

    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
        "slept {elapsed:?}"
    );
    assert_eq!(first.jobs.len(), 4);
    assert!(first.jobs.iter().all(|job| job.source == "indeed"));
    assert!(first.notices.is_empty());
    assert!(!aggregator.primary_quota_exceeded());

    let second = aggregator.search(&query).await;

    assert_eq!(second.jobs.len(), 4);
    assert_eq!(indeed_transport.request_count(), 3);
    assert_eq!(jsearch_transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn short_primary_result_is_topped_up_and_deduplicated() {
    let indeed_transport = MockTransport::with_responses(vec![Ok(indeed_created(2))]);
    let jsearch_transport = MockTransport::with_responses(vec![Ok(jsearch_ok(&[
        ("RUST ENGINEER 0", "acme"),
        ("Backend Engineer", "Delta"),
    ]))]);
    let aggregator = SourceAggregator::new(
        Some(indeed(&indeed_transport, RateLimiter::new(3))),
        Some(jsearch(&jsearch_transport)),
        AggregatorConfig::default(),
    );

    let report = aggregator
        .search(&SearchQuery::new("engineer").with_max_rows(10))
        .await;

    let sources: Vec<&str> = report.jobs.iter().map(|j| j.source.as_str()).collect();
    assert_eq!(sources, vec!["indeed", "indeed", "jsearch"]);
    assert_eq!(report.jobs[2].title, "Backend Engineer");
    // The fallback was asked only for what was missing: 8 rows -> one page.
    let url = &jsearch_transport.requests()[0].url;
    assert!(url.contains("num_pages=1"), "unexpected url {url}");
}

#[tokio::test(start_paused = true)]
async fn provider_limiter_spaces_requests() {
    let transport =
        MockTransport::with_responses(vec![Ok(indeed_created(1)), Ok(indeed_created(1))]);
    let provider = indeed(&transport, RateLimiter::new(1));
    let start = Instant::now();

    provider.search_jobs(&SearchQuery::new("a")).await.unwrap();
    provider.search_jobs(&SearchQuery::new("b")).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(transport.request_count(), 2);
}

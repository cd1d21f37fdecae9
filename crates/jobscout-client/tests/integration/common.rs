use jobscout_client::{IndeedProvider, JSearchProvider};
use jobscout_core::http::HttpResponse;
use jobscout_core::rate_limit::RateLimiter;
use jobscout_core::testutil::MockTransport;
use serde_json::{Value, json};

pub const TEST_API_KEY: &str = "test-rapidapi-key";

pub fn indeed(transport: &MockTransport, limiter: RateLimiter) -> IndeedProvider<MockTransport> {
    IndeedProvider::new(transport.clone(), TEST_API_KEY, limiter)
}

pub fn jsearch(transport: &MockTransport) -> JSearchProvider<MockTransport> {
    JSearchProvider::new(transport.clone(), TEST_API_KEY, RateLimiter::new(0))
}

/// A 201 from the Indeed scraper carrying `count` distinct jobs.
pub fn indeed_created(count: usize) -> HttpResponse {
    let data: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "title": format!("Rust Engineer {i}"),
                "companyName": "Acme",
                "location": {"formattedAddressShort": "Hong Kong"},
                "descriptionText": "Async services.",
                "jobUrl": format!("https://hk.indeed.com/viewjob?jk={i}"),
                "attributes": ["Rust"]
            })
        })
        .collect();
    HttpResponse::json(201, &json!({"returnvalue": {"data": data}}))
}

/// A 200 from JSearch with the given (title, company) postings.
pub fn jsearch_ok(postings: &[(&str, &str)]) -> HttpResponse {
    let data: Vec<Value> = postings
        .iter()
        .map(|(title, company)| {
            json!({
                "job_title": title,
                "employer_name": company,
                "job_city": "Kowloon",
                "job_apply_link": "https://apply.example.com"
            })
        })
        .collect();
    HttpResponse::json(200, &json!({"status": "OK", "data": data}))
}

pub fn quota_exhausted() -> HttpResponse {
    HttpResponse::json(
        429,
        &json!({
            "message": "You have exceeded the MONTHLY quota for Requests on your current plan, BASIC."
        }),
    )
}

/// A 429 that mentions a quota but says when to come back.
pub fn per_minute_quota() -> HttpResponse {
    HttpResponse::json(
        429,
        &json!({
            "error": {"message": "Per-minute request quota exceeded. Please retry after 2 seconds."}
        }),
    )
}

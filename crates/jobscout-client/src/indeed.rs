use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::http::HttpRequest;
use jobscout_core::invoker::{ResilientInvoker, RetryPolicy};
use jobscout_core::models::{Job, SearchQuery};
use jobscout_core::rate_limit::RateLimiter;
use jobscout_core::traits::{HttpTransport, JobProvider};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::transport::{
    rapidapi_host, truncate_chars, unsuccessful_response, with_rapidapi_headers,
};

pub const INDEED_URL: &str = "https://indeed-scraper-api.p.rapidapi.com/api/job";
const INDEED_HOST: &str = "indeed-scraper-api.p.rapidapi.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_DESCRIPTION_CHARS: usize = 50_000;
const MAX_BENEFITS: usize = 5;
const MAX_SKILLS: usize = 10;

/// Indeed Scraper API (RapidAPI), the primary job source.
#[derive(Clone)]
pub struct IndeedProvider<T> {
    transport: T,
    api_key: String,
    url: String,
    rate_limiter: RateLimiter,
    invoker: ResilientInvoker,
}

impl<T: HttpTransport> IndeedProvider<T> {
    pub fn new(transport: T, api_key: impl Into<String>, rate_limiter: RateLimiter) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            url: INDEED_URL.to_string(),
            rate_limiter,
            invoker: ResilientInvoker::new("indeed", RetryPolicy::new(3, 3, 60)),
        }
    }

    /// Point at another endpoint (a proxy or a test server).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.invoker = ResilientInvoker::new("indeed", policy);
        self
    }

    fn request(&self, query: &SearchQuery) -> HttpRequest {
        let host = rapidapi_host(&self.url).unwrap_or_else(|| INDEED_HOST.to_string());
        with_rapidapi_headers(
            HttpRequest::post_json(&self.url, search_payload(query), REQUEST_TIMEOUT),
            &self.api_key,
            &host,
        )
    }
}

fn search_payload(query: &SearchQuery) -> Value {
    json!({
        "scraper": {
            "maxRows": query.max_rows,
            "query": query.query,
            "location": query.location,
            "jobType": query.job_type,
            "radius": "50",
            "sort": "relevance",
            "fromDays": "7",
            "country": query.country,
        }
    })
}

impl<T: HttpTransport> JobProvider for IndeedProvider<T> {
    fn name(&self) -> &str {
        "indeed"
    }

    async fn search_jobs(&self, query: &SearchQuery) -> Result<Vec<Job>, AppError> {
        self.rate_limiter.wait_if_needed().await;

        let request = self.request(query);
        let response = self
            .invoker
            .invoke(|| self.transport.send(request.clone()))
            .await?;

        if !matches!(response.status, 200 | 201) {
            return Err(unsuccessful_response(self.name(), &response));
        }

        let body: Value = response.parse()?;
        let jobs = parse_jobs(&body);
        tracing::info!(provider = "indeed", count = jobs.len(), "Job search returned");
        Ok(jobs)
    }
}

// ---- Indeed Scraper API types ----

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct IndeedJob {
    title: Option<String>,
    company_name: Option<String>,
    location: Option<IndeedLocation>,
    description_text: Option<String>,
    job_type: Option<Vec<String>>,
    job_url: Option<String>,
    age: Option<String>,
    benefits: Option<Vec<String>>,
    attributes: Option<Vec<String>>,
    rating: Option<IndeedRating>,
    is_remote: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct IndeedLocation {
    formatted_address_short: Option<String>,
    city: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IndeedRating {
    rating: Option<f64>,
}

/// Jobs under `returnvalue.data`. Entries that are not readable objects are skipped.
fn parse_jobs(body: &Value) -> Vec<Job> {
    let Some(entries) = body.pointer("/returnvalue/data").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|entry| entry.is_object())
        .filter_map(|entry| match IndeedJob::deserialize(entry) {
            Ok(job) => Some(job.into_job()),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable Indeed job");
                None
            }
        })
        .collect()
}

impl IndeedJob {
    fn into_job(self) -> Job {
        let location = self
            .location
            .and_then(|loc| {
                non_empty(loc.formatted_address_short).or_else(|| non_empty(loc.city))
            })
            .unwrap_or_else(|| "Hong Kong".to_string());
        let job_type = self
            .job_type
            .filter(|types| !types.is_empty())
            .map_or_else(|| "Full-time".to_string(), |types| types.join(", "));
        let description = self
            .description_text
            .map_or_else(
                || "No description".to_string(),
                |text| truncate_chars(&text, MAX_DESCRIPTION_CHARS),
            );

        Job {
            title: self.title.unwrap_or_else(|| "N/A".to_string()),
            company: self.company_name.unwrap_or_else(|| "N/A".to_string()),
            location,
            description,
            salary: "Not specified".to_string(),
            job_type,
            url: self.job_url.unwrap_or_else(|| "#".to_string()),
            posted_date: self.age.unwrap_or_else(|| "Recently".to_string()),
            benefits: first(self.benefits, MAX_BENEFITS),
            skills: first(self.attributes, MAX_SKILLS),
            company_rating: self.rating.and_then(|r| r.rating).unwrap_or(0.0),
            is_remote: self.is_remote.unwrap_or(false),
            source: "indeed".to_string(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn first(values: Option<Vec<String>>, n: usize) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .take(n)
        .collect()
}

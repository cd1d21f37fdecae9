use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::http::HttpRequest;
use jobscout_core::invoker::{ResilientInvoker, RetryPolicy};
use jobscout_core::models::{Job, SearchQuery};
use jobscout_core::rate_limit::RateLimiter;
use jobscout_core::traits::{HttpTransport, JobProvider};
use serde::Deserialize;
use url::Url;

use crate::transport::{
    rapidapi_host, truncate_chars, unsuccessful_response, with_rapidapi_headers,
};

pub const JSEARCH_URL: &str = "https://jsearch.p.rapidapi.com/search";
const JSEARCH_HOST: &str = "jsearch.p.rapidapi.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RESULTS_PER_PAGE: usize = 10;
const MAX_DESCRIPTION_CHARS: usize = 50_000;

/// JSearch (RapidAPI), the fallback job source.
#[derive(Clone)]
pub struct JSearchProvider<T> {
    transport: T,
    api_key: String,
    url: String,
    rate_limiter: RateLimiter,
    invoker: ResilientInvoker,
}

impl<T: HttpTransport> JSearchProvider<T> {
    pub fn new(transport: T, api_key: impl Into<String>, rate_limiter: RateLimiter) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            url: JSEARCH_URL.to_string(),
            rate_limiter,
            invoker: ResilientInvoker::new("jsearch", RetryPolicy::default()),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.invoker = ResilientInvoker::new("jsearch", policy);
        self
    }

    fn request(&self, query: &SearchQuery) -> Result<HttpRequest, AppError> {
        let num_pages = query.max_rows.div_ceil(RESULTS_PER_PAGE).max(1).to_string();
        let search = format!("{} in {}", query.query.trim(), query.location.trim());
        let country = query.country.to_lowercase();
        let mut params: Vec<(&str, &str)> = vec![
            ("query", search.as_str()),
            ("page", "1"),
            ("num_pages", num_pages.as_str()),
            ("country", country.as_str()),
            ("date_posted", "week"),
        ];
        if let Some(employment_type) = employment_type(&query.job_type) {
            params.push(("employment_types", employment_type));
        }

        let url = Url::parse_with_params(&self.url, &params)
            .map_err(|e| AppError::ConfigError(format!("Invalid JSearch URL: {e}")))?;
        let host = rapidapi_host(&self.url).unwrap_or_else(|| JSEARCH_HOST.to_string());
        Ok(with_rapidapi_headers(
            HttpRequest::get(url.as_str(), REQUEST_TIMEOUT),
            &self.api_key,
            &host,
        ))
    }
}

/// JSearch's employment type for one of our job-type names.
fn employment_type(job_type: &str) -> Option<&'static str> {
    match job_type.trim().to_lowercase().as_str() {
        "fulltime" => Some("FULLTIME"),
        "parttime" => Some("PARTTIME"),
        "contract" => Some("CONTRACTOR"),
        "internship" => Some("INTERN"),
        _ => None,
    }
}

impl<T: HttpTransport> JobProvider for JSearchProvider<T> {
    fn name(&self) -> &str {
        "jsearch"
    }

    async fn search_jobs(&self, query: &SearchQuery) -> Result<Vec<Job>, AppError> {
        let request = self.request(query)?;
        self.rate_limiter.wait_if_needed().await;

        let response = self
            .invoker
            .invoke(|| self.transport.send(request.clone()))
            .await?;

        if !matches!(response.status, 200 | 201) {
            return Err(unsuccessful_response(self.name(), &response));
        }

        let body: SearchResponse = response.parse()?;
        let jobs: Vec<Job> = body
            .data
            .into_iter()
            .map(|job| job.into_job(&query.location))
            .take(query.max_rows)
            .collect();
        tracing::info!(provider = "jsearch", count = jobs.len(), "Job search returned");
        Ok(jobs)
    }
}

// ---- JSearch API types ----

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchResponse {
    data: Vec<JSearchJob>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JSearchJob {
    job_title: Option<String>,
    employer_name: Option<String>,
    job_city: Option<String>,
    job_country: Option<String>,
    job_description: Option<String>,
    job_employment_type: Option<String>,
    job_apply_link: Option<String>,
    job_posted_at_datetime_utc: Option<String>,
    job_is_remote: Option<bool>,
    job_benefits: Option<Vec<String>>,
    job_required_skills: Option<Vec<String>>,
}

impl JSearchJob {
    fn into_job(self, default_location: &str) -> Job {
        let location = [self.job_city, self.job_country]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Job {
            title: self.job_title.unwrap_or_else(|| "N/A".to_string()),
            company: self.employer_name.unwrap_or_else(|| "N/A".to_string()),
            location: if location.is_empty() {
                default_location.to_string()
            } else {
                location
            },
            description: self.job_description.map_or_else(
                || "No description".to_string(),
                |text| truncate_chars(&text, MAX_DESCRIPTION_CHARS),
            ),
            salary: "Not specified".to_string(),
            job_type: self
                .job_employment_type
                .unwrap_or_else(|| "Full-time".to_string()),
            url: self.job_apply_link.unwrap_or_else(|| "#".to_string()),
            posted_date: self
                .job_posted_at_datetime_utc
                .unwrap_or_else(|| "Recently".to_string()),
            benefits: self.job_benefits.unwrap_or_default().into_iter().take(5).collect(),
            skills: self
                .job_required_skills
                .unwrap_or_default()
                .into_iter()
                .take(10)
                .collect(),
            company_rating: 0.0,
            is_remote: self.job_is_remote.unwrap_or(false),
            source: "jsearch".to_string(),
        }
    }
}

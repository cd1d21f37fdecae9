//! Scripted stand-ins for the HTTP transport and job providers, plus job
//! fixtures. Shared by this crate's unit tests and the client integration
//! tests.
//!
//! Each mock replays a queue of canned results and records what it was
//! asked for; clones share both.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::http::{HttpRequest, HttpResponse};
use crate::models::{Job, SearchQuery};
use crate::traits::{HttpTransport, JobProvider};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Transport that replays scripted responses and records every request.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// Each send pops the front. An empty queue is a test bug and errors.
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, AppError>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn with_responses(responses: Vec<Result<HttpResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AppError::Generic(
                    "MockTransport: no scripted response left".into(),
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Provider that returns scripted results and records the queries it saw.
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    /// Queue of results. If empty, returns no jobs.
    results: Arc<Mutex<VecDeque<Result<Vec<Job>, AppError>>>>,
    calls: Arc<Mutex<Vec<SearchQuery>>>,
}

impl MockProvider {
    pub fn new(name: &str, results: Vec<Result<Vec<Job>, AppError>>) -> Self {
        Self {
            name: name.to_string(),
            results: Arc::new(Mutex::new(results.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().unwrap().clone()
    }
}

impl JobProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search_jobs(&self, query: &SearchQuery) -> Result<Vec<Job>, AppError> {
        self.calls.lock().unwrap().push(query.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn make_job(title: &str, company: &str, source: &str) -> Job {
    Job {
        title: title.to_string(),
        company: company.to_string(),
        location: "Hong Kong".to_string(),
        description: format!("{title} role at {company}"),
        salary: "Not specified".to_string(),
        job_type: "Full-time".to_string(),
        url: format!(
            "https://jobs.example.com/{}",
            title.to_lowercase().replace(' ', "-")
        ),
        posted_date: "Recent".to_string(),
        benefits: Vec::new(),
        skills: vec!["Rust".to_string()],
        company_rating: 0.0,
        is_remote: false,
        source: source.to_string(),
    }
}

/// `count` distinct jobs from one source.
pub fn make_jobs(count: usize, source: &str) -> Vec<Job> {
    (0..count)
        .map(|i| make_job(&format!("Engineer {i}"), &format!("{source} Co"), source))
        .collect()
}

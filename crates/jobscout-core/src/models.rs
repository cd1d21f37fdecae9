use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCATION: &str = "Hong Kong";
pub const DEFAULT_MAX_ROWS: usize = 25;
pub const DEFAULT_JOB_TYPE: &str = "fulltime";
pub const DEFAULT_COUNTRY: &str = "hk";

/// A normalized job posting, whichever provider produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub salary: String,
    pub job_type: String,
    pub url: String,
    pub posted_date: String,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub company_rating: f64,
    #[serde(default)]
    pub is_remote: bool,
    /// Name of the provider that returned this posting.
    #[serde(default)]
    pub source: String,
}

impl Job {
    /// Key used to collapse the same posting reported by several providers.
    pub fn dedup_key(&self) -> (String, String) {
        (self.title.to_lowercase(), self.company.to_lowercase())
    }

    /// Text submitted to the embedding service when indexing this job.
    pub fn embedding_text(&self) -> String {
        let skills: Vec<&str> = self.skills.iter().take(5).map(String::as_str).collect();
        format!(
            "{} at {}. {} Skills: {}",
            self.title,
            self.company,
            self.description,
            skills.join(", ")
        )
    }
}

/// Parameters of one job search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub location: String,
    pub max_rows: usize,
    pub job_type: String,
    pub country: String,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: DEFAULT_LOCATION.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            job_type: DEFAULT_JOB_TYPE.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }
}

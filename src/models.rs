use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    pub desired_roles: Vec<String>,
    pub tech_stack: Vec<String>,
    pub preferred_locations: Vec<String>,
    pub years_of_experience: u32,
}

impl CandidateProfile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile file: {}", path.display()))
    }
}

/// One result from the upstream search feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub site: String,
}

/// Snapshot of a loaded document. Produced by the page loader,
/// consumed only by the extractor; never persisted.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub company_url: Option<String>,
    pub job_url: String,
    pub description: String,
    pub requirements: String,
    pub tech_stack: Vec<String>,
    pub salary_range: Option<String>,
    pub location: Option<String>,
    pub posted_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredJob {
    pub job: JobRecord,
    pub score: f64,
    pub match_reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapingSession {
    pub id: i64,
    pub session_date: String,
    pub queries: Vec<String>,
    pub status: String, // "running", "completed", "failed"
    pub total_jobs_found: i64,
    pub top_jobs_selected: i64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// A persisted job row: the record plus its score and session bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: i64,
    pub job: JobRecord,
    pub score: f64,
    pub match_reasons: Vec<String>,
    pub is_top_pick: bool,
    pub session_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreBands {
    pub excellent: usize, // > 0.8
    pub good: usize,      // 0.6 - 0.8
    pub fair: usize,      // 0.4 - 0.6
    pub poor: usize,      // <= 0.4
}

/// Aggregate view over a scored batch. Pure function of its input,
/// no identity, no lifecycle.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub total: usize,
    pub average_score: f64,
    pub top_tech: Vec<(String, usize)>,
    pub top_companies: Vec<(String, usize)>,
    pub locations: Vec<(String, usize)>,
    pub bands: ScoreBands,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("jobscout_test_profile.json");
        std::fs::write(
            &path,
            r#"{
                "name": "Test Candidate",
                "desired_roles": ["Backend Engineer"],
                "tech_stack": ["Rust", "PostgreSQL"],
                "preferred_locations": ["Berlin"],
                "years_of_experience": 6
            }"#,
        )
        .unwrap();

        let profile = CandidateProfile::from_file(&path).unwrap();
        assert_eq!(profile.name, "Test Candidate");
        assert_eq!(profile.desired_roles, vec!["Backend Engineer"]);
        assert_eq!(profile.years_of_experience, 6);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_profile_from_missing_file() {
        let result = CandidateProfile::from_file(Path::new("/nonexistent/profile.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_session_status_strings() {
        assert_eq!(SessionStatus::Running.as_str(), "running");
        assert_eq!(SessionStatus::Completed.as_str(), "completed");
        assert_eq!(SessionStatus::Failed.as_str(), "failed");
    }
}

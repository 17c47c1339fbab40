use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::browser::PageLoader;
use crate::db::Database;
use crate::extract;
use crate::matcher;
use crate::models::{CandidateProfile, JobRecord, JobReport, ScoredJob, SearchHit};
use crate::search::{SearchFeed, build_queries};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Cap on candidate URLs per run, bounding run cost.
    pub max_urls: usize,
    pub top_n: usize,
    pub min_score: f64,
    /// Fetch worker cap; must not exceed the browser pool capacity.
    pub fetch_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_urls: 50,
            top_n: 10,
            min_score: 0.4,
            fetch_concurrency: 3,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub session_id: i64,
    pub total_found: usize,
    pub top_selected: usize,
    pub report: JobReport,
    pub selected: Vec<ScoredJob>,
}

/// Sequences one end-to-end run: feed -> fetch+extract -> score ->
/// select -> persist, wrapped in a session record.
pub struct Pipeline {
    db: Database,
    loader: Arc<dyn PageLoader>,
    feed: Arc<dyn SearchFeed>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        db: Database,
        loader: Arc<dyn PageLoader>,
        feed: Arc<dyn SearchFeed>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            loader,
            feed,
            settings,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Runs one session. The session row is written exactly twice:
    /// created as running, finalized as completed or failed. Any error
    /// after creation lands in the session record rather than
    /// crashing the process; the caller decides whether to retry on
    /// the next trigger.
    pub async fn run(&self, profile: &CandidateProfile) -> Result<RunSummary> {
        let session_date = Utc::now().format("%Y-%m-%d").to_string();
        let queries = build_queries(profile);
        let session_id = self
            .db
            .create_session(&session_date, &queries)
            .context("Failed to create session")?;
        info!(session_id, ?queries, "session started");

        match self.execute(session_id, profile, &queries).await {
            Ok(summary) => {
                self.db.complete_session(
                    session_id,
                    summary.total_found as i64,
                    summary.top_selected as i64,
                )?;
                info!(
                    session_id,
                    total = summary.total_found,
                    selected = summary.top_selected,
                    "session completed"
                );
                Ok(summary)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(session_id, error = %message, "session failed");
                if let Err(db_err) = self.db.fail_session(session_id, &message) {
                    error!(session_id, error = %db_err, "failed to record session failure");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        session_id: i64,
        profile: &CandidateProfile,
        queries: &[String],
    ) -> Result<RunSummary> {
        let hits = self
            .feed
            .search(queries, self.settings.max_urls)
            .await
            .context("Search feed failed")?;
        info!(candidates = hits.len(), "candidate URLs collected");

        let records = self.fetch_all(&hits, profile).await;
        let records = reconcile_by_url(records);

        let now = Utc::now();
        let (scored, selected) = matcher::rank_and_select(
            profile,
            &records,
            self.settings.top_n,
            self.settings.min_score,
            now,
        );
        let report = matcher::build_report(&scored);

        // Two-phase write: upsert every scored record, then flag the
        // selection, so top-pick marking is idempotent and independent
        // of insert ordering.
        let mut ids_by_url: HashMap<&str, i64> = HashMap::new();
        for job in &scored {
            let id = self
                .db
                .upsert_job(session_id, job)
                .with_context(|| format!("Failed to persist job: {}", job.job.job_url))?;
            ids_by_url.insert(job.job.job_url.as_str(), id);
        }
        let selected_ids: Vec<i64> = selected
            .iter()
            .filter_map(|job| ids_by_url.get(job.job.job_url.as_str()).copied())
            .collect();
        self.db
            .mark_top_picks(session_id, &selected_ids)
            .context("Failed to mark top picks")?;

        Ok(RunSummary {
            session_id,
            total_found: scored.len(),
            top_selected: selected.len(),
            report,
            selected,
        })
    }

    /// Fetches and extracts every hit under the worker cap. A failed
    /// URL is logged and skipped; it never aborts the run. Results
    /// come back in feed order regardless of completion order.
    async fn fetch_all(&self, hits: &[SearchHit], profile: &CandidateProfile) -> Vec<JobRecord> {
        let semaphore = Arc::new(Semaphore::new(self.settings.fetch_concurrency));
        let mut tasks: JoinSet<Option<(usize, JobRecord)>> = JoinSet::new();

        for (idx, hit) in hits.iter().enumerate() {
            let loader = Arc::clone(&self.loader);
            let semaphore = Arc::clone(&semaphore);
            let url = hit.url.clone();
            let profile = profile.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                let page = match loader.load(&url).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(%url, error = %format!("{:#}", e), "page load failed, skipping");
                        return None;
                    }
                };
                match extract::extract(&page, &profile, Utc::now()) {
                    Ok(record) => Some((idx, record)),
                    Err(e) => {
                        warn!(%url, error = %e, "extraction failed, skipping");
                        None
                    }
                }
            });
        }

        let mut extracted: Vec<(usize, JobRecord)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(pair)) => extracted.push(pair),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "fetch task aborted"),
            }
        }
        extracted.sort_by_key(|(idx, _)| *idx);
        extracted.into_iter().map(|(_, record)| record).collect()
    }
}

/// Two records with the same job_url are the same listing; the latest
/// extraction wins, at the position the URL was first seen.
fn reconcile_by_url(records: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<JobRecord> = Vec::new();
    for record in records {
        match positions.get(&record.job_url) {
            Some(&pos) => out[pos] = record,
            None => {
                positions.insert(record.job_url.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crate::models::RawPage;

    struct StaticFeed(Vec<SearchHit>);

    #[async_trait]
    impl SearchFeed for StaticFeed {
        async fn search(&self, _queries: &[String], limit: usize) -> Result<Vec<SearchHit>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FailingFeed;

    #[async_trait]
    impl SearchFeed for FailingFeed {
        async fn search(&self, _queries: &[String], _limit: usize) -> Result<Vec<SearchHit>> {
            Err(anyhow!("search engine unreachable"))
        }
    }

    /// Serves canned HTML per URL; unknown URLs fail to load.
    struct MapLoader(HashMap<String, String>);

    #[async_trait]
    impl PageLoader for MapLoader {
        async fn load(&self, url: &str) -> Result<RawPage> {
            match self.0.get(url) {
                Some(html) => Ok(RawPage {
                    url: url.to_string(),
                    html: html.clone(),
                    text: String::new(),
                }),
                None => Err(anyhow!("navigation timed out: {}", url)),
            }
        }
    }

    fn profile() -> CandidateProfile {
        CandidateProfile {
            name: "Test".to_string(),
            desired_roles: vec!["Backend Engineer".to_string()],
            tech_stack: vec!["Rust".to_string(), "PostgreSQL".to_string()],
            preferred_locations: vec!["Berlin".to_string()],
            years_of_experience: 5,
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: format!("A role on {}", url),
            snippet: String::new(),
            site: "example.com".to_string(),
        }
    }

    fn job_html(title: &str, company: &str) -> String {
        format!(
            r#"<html><body>
                <h1 class="job-title">{}</h1>
                <div class="company-name">{}</div>
                <span class="job-location">Remote</span>
                <div class="job-description">Rust and PostgreSQL. Posted today.</div>
            </body></html>"#,
            title, company
        )
    }

    fn pipeline(loader: MapLoader, feed: impl SearchFeed + 'static) -> Pipeline {
        Pipeline::new(
            Database::open_in_memory().unwrap(),
            Arc::new(loader),
            Arc::new(feed),
            PipelineSettings {
                max_urls: 50,
                top_n: 5,
                min_score: 0.3,
                fetch_concurrency: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_happy_path_persists_and_selects() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/jobs/1".to_string(),
            job_html("Senior Backend Engineer", "Acme"),
        );
        pages.insert(
            "https://example.com/jobs/2".to_string(),
            job_html("Backend Engineer", "Globex"),
        );
        let feed = StaticFeed(vec![
            hit("https://example.com/jobs/1"),
            hit("https://example.com/jobs/2"),
        ]);
        let p = pipeline(MapLoader(pages), feed);

        let summary = p.run(&profile()).await.unwrap();
        assert_eq!(summary.total_found, 2);
        assert_eq!(summary.top_selected, 2);

        let session = p.db().get_session(summary.session_id).unwrap().unwrap();
        assert_eq!(session.status, "completed");
        assert_eq!(session.total_jobs_found, 2);

        let stored = p.db().session_jobs(summary.session_id).unwrap();
        assert_eq!(stored.len(), 2);
        let picks = p.db().top_picks(summary.session_id).unwrap();
        assert_eq!(picks.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_urls_are_skipped_not_fatal() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/jobs/good".to_string(),
            job_html("Backend Engineer", "Acme"),
        );
        // jobs/broken is absent: the loader fails on it.
        // jobs/empty parses but has neither title nor company.
        pages.insert(
            "https://example.com/jobs/empty".to_string(),
            "<html><body><p>page moved</p></body></html>".to_string(),
        );
        let feed = StaticFeed(vec![
            hit("https://example.com/jobs/broken"),
            hit("https://example.com/jobs/empty"),
            hit("https://example.com/jobs/good"),
        ]);
        let p = pipeline(MapLoader(pages), feed);

        let summary = p.run(&profile()).await.unwrap();
        assert_eq!(summary.total_found, 1);
        assert_eq!(summary.selected[0].job.title, "Backend Engineer");
    }

    #[tokio::test]
    async fn test_all_urls_failing_still_completes() {
        let feed = StaticFeed(vec![
            hit("https://example.com/jobs/a"),
            hit("https://example.com/jobs/b"),
        ]);
        let p = pipeline(MapLoader(HashMap::new()), feed);

        let summary = p.run(&profile()).await.unwrap();
        assert_eq!(summary.total_found, 0);
        assert_eq!(summary.top_selected, 0);

        let session = p.db().get_session(summary.session_id).unwrap().unwrap();
        assert_eq!(session.status, "completed");
        assert_eq!(session.total_jobs_found, 0);
        assert_eq!(session.top_jobs_selected, 0);
    }

    #[tokio::test]
    async fn test_feed_failure_marks_session_failed() {
        let p = pipeline(MapLoader(HashMap::new()), FailingFeed);

        let result = p.run(&profile()).await;
        assert!(result.is_err());

        let session = p.db().latest_session().unwrap().unwrap();
        assert_eq!(session.status, "failed");
        let message = session.error_message.unwrap();
        assert!(message.contains("search engine unreachable"));
    }

    #[tokio::test]
    async fn test_duplicate_urls_reconciled() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/jobs/1".to_string(),
            job_html("Backend Engineer", "Acme"),
        );
        let feed = StaticFeed(vec![
            hit("https://example.com/jobs/1"),
            hit("https://example.com/jobs/1"),
        ]);
        let p = pipeline(MapLoader(pages), feed);

        let summary = p.run(&profile()).await.unwrap();
        assert_eq!(summary.total_found, 1);
        assert_eq!(p.db().session_jobs(summary.session_id).unwrap().len(), 1);
    }

    #[test]
    fn test_reconcile_latest_wins_first_position() {
        let a = JobRecord {
            title: "Old title".to_string(),
            company: "Acme".to_string(),
            company_url: None,
            job_url: "https://example.com/jobs/1".to_string(),
            description: String::new(),
            requirements: String::new(),
            tech_stack: vec![],
            salary_range: None,
            location: None,
            posted_date: None,
        };
        let mut b = a.clone();
        b.job_url = "https://example.com/jobs/2".to_string();
        let mut a2 = a.clone();
        a2.title = "New title".to_string();

        let out = reconcile_by_url(vec![a, b, a2]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "New title");
        assert_eq!(out[1].job_url, "https://example.com/jobs/2");
    }
}

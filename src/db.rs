use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};
use std::path::PathBuf;

use crate::models::{JobRecord, ScoredJob, ScrapingSession, SessionStatus, StoredJob};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self { conn, path })
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // XDG data directory or fallback to the working directory.
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobscout") {
            Ok(proj_dirs.data_dir().join("jobscout.db"))
        } else {
            Ok(PathBuf::from("jobscout.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_date TEXT NOT NULL,
                queries TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed', 'failed')),
                total_jobs_found INTEGER NOT NULL DEFAULT 0,
                top_jobs_selected INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                company_url TEXT,
                description TEXT NOT NULL DEFAULT '',
                requirements TEXT NOT NULL DEFAULT '',
                tech_stack TEXT NOT NULL DEFAULT '[]',
                salary_range TEXT,
                location TEXT,
                posted_date TEXT,
                score REAL NOT NULL DEFAULT 0,
                match_reasons TEXT NOT NULL DEFAULT '[]',
                session_id INTEGER NOT NULL REFERENCES sessions(id),
                is_top_pick INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_session ON jobs(session_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_score ON jobs(score);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sessions'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobscout init' first."));
        }
        Ok(())
    }

    // --- Session operations ---

    pub fn create_session(&self, session_date: &str, queries: &[String]) -> Result<i64> {
        let queries_json = serde_json::to_string(queries)?;
        self.conn.execute(
            "INSERT INTO sessions (session_date, queries, status) VALUES (?1, ?2, ?3)",
            params![session_date, queries_json, SessionStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete_session(&self, id: i64, total_found: i64, top_selected: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sessions
             SET status = ?1, total_jobs_found = ?2, top_jobs_selected = ?3,
                 completed_at = datetime('now')
             WHERE id = ?4",
            params![SessionStatus::Completed.as_str(), total_found, top_selected, id],
        )?;
        Ok(())
    }

    pub fn fail_session(&self, id: i64, error_message: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sessions
             SET status = ?1, error_message = ?2, completed_at = datetime('now')
             WHERE id = ?3",
            params![SessionStatus::Failed.as_str(), error_message, id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: i64) -> Result<Option<ScrapingSession>> {
        let result = self.conn.query_row(
            "SELECT id, session_date, queries, status, total_jobs_found, top_jobs_selected,
                    error_message, started_at, completed_at
             FROM sessions WHERE id = ?1",
            [id],
            Self::row_to_session,
        );
        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<ScrapingSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_date, queries, status, total_jobs_found, top_jobs_selected,
                    error_message, started_at, completed_at
             FROM sessions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list sessions")
    }

    pub fn latest_session(&self) -> Result<Option<ScrapingSession>> {
        Ok(self.list_sessions(1)?.into_iter().next())
    }

    /// Start time of the most recent completed session. Failed runs do
    /// not count, so the next scheduled trigger retries them.
    pub fn last_session_date(&self) -> Result<Option<DateTime<Utc>>> {
        let result: rusqlite::Result<String> = self.conn.query_row(
            "SELECT started_at FROM sessions WHERE status = 'completed'
             ORDER BY started_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        );
        match result {
            Ok(raw) => {
                let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                    .with_context(|| format!("Unparseable session timestamp: {}", raw))?;
                Ok(Some(naive.and_utc()))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // --- Job operations ---

    /// Inserts or updates by job_url; latest write wins on the mutable
    /// fields. Returns the row id either way.
    pub fn upsert_job(&self, session_id: i64, scored: &ScoredJob) -> Result<i64> {
        let job = &scored.job;
        let tech_json = serde_json::to_string(&job.tech_stack)?;
        let reasons_json = serde_json::to_string(&scored.match_reasons)?;
        let posted = job.posted_date.map(|d| d.to_string());

        self.conn.execute(
            "INSERT INTO jobs (job_url, title, company, company_url, description, requirements,
                               tech_stack, salary_range, location, posted_date, score,
                               match_reasons, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(job_url) DO UPDATE SET
                 title = excluded.title,
                 company = excluded.company,
                 company_url = excluded.company_url,
                 description = excluded.description,
                 requirements = excluded.requirements,
                 tech_stack = excluded.tech_stack,
                 salary_range = excluded.salary_range,
                 location = excluded.location,
                 posted_date = excluded.posted_date,
                 score = excluded.score,
                 match_reasons = excluded.match_reasons,
                 session_id = excluded.session_id,
                 updated_at = datetime('now')",
            params![
                job.job_url,
                job.title,
                job.company,
                job.company_url,
                job.description,
                job.requirements,
                tech_json,
                job.salary_range,
                job.location,
                posted,
                scored.score,
                reasons_json,
                session_id,
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM jobs WHERE job_url = ?1",
            [&job.job_url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Second phase of the persist step: clears the session's previous
    /// flags and marks the given rows. Idempotent.
    pub fn mark_top_picks(&self, session_id: i64, ids: &[i64]) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET is_top_pick = 0 WHERE session_id = ?1",
            [session_id],
        )?;
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE jobs SET is_top_pick = 1 WHERE id IN ({})", placeholders);
        self.conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    pub fn session_jobs(&self, session_id: i64) -> Result<Vec<StoredJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_url, title, company, company_url, description, requirements,
                    tech_stack, salary_range, location, posted_date, score, match_reasons,
                    session_id, is_top_pick
             FROM jobs WHERE session_id = ?1 ORDER BY score DESC, id ASC",
        )?;
        let rows = stmt.query_map([session_id], Self::row_to_stored_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list session jobs")
    }

    pub fn top_picks(&self, session_id: i64) -> Result<Vec<StoredJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_url, title, company, company_url, description, requirements,
                    tech_stack, salary_range, location, posted_date, score, match_reasons,
                    session_id, is_top_pick
             FROM jobs WHERE session_id = ?1 AND is_top_pick = 1
             ORDER BY score DESC, id ASC",
        )?;
        let rows = stmt.query_map([session_id], Self::row_to_stored_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list top picks")
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<ScrapingSession> {
        let queries_json: String = row.get(2)?;
        Ok(ScrapingSession {
            id: row.get(0)?,
            session_date: row.get(1)?,
            queries: serde_json::from_str(&queries_json).unwrap_or_default(),
            status: row.get(3)?,
            total_jobs_found: row.get(4)?,
            top_jobs_selected: row.get(5)?,
            error_message: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn row_to_stored_job(row: &rusqlite::Row) -> rusqlite::Result<StoredJob> {
        let tech_json: String = row.get(7)?;
        let reasons_json: String = row.get(12)?;
        let posted: Option<String> = row.get(10)?;
        Ok(StoredJob {
            id: row.get(0)?,
            job: JobRecord {
                job_url: row.get(1)?,
                title: row.get(2)?,
                company: row.get(3)?,
                company_url: row.get(4)?,
                description: row.get(5)?,
                requirements: row.get(6)?,
                tech_stack: serde_json::from_str(&tech_json).unwrap_or_default(),
                salary_range: row.get(8)?,
                location: row.get(9)?,
                posted_date: posted.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            },
            score: row.get(11)?,
            match_reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
            session_id: row.get(13)?,
            is_top_pick: row.get::<_, i64>(14)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn scored(url: &str, score: f64) -> ScoredJob {
        ScoredJob {
            job: JobRecord {
                title: "Backend Engineer".to_string(),
                company: "Acme".to_string(),
                company_url: None,
                job_url: url.to_string(),
                description: "desc".to_string(),
                requirements: "reqs".to_string(),
                tech_stack: vec!["Rust".to_string()],
                salary_range: Some("$100k".to_string()),
                location: Some("Remote".to_string()),
                posted_date: NaiveDate::from_ymd_opt(2025, 6, 10),
            },
            score,
            match_reasons: vec!["Tech match: Rust".to_string()],
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .create_session("2025-06-15", &["rust developer jobs".to_string()])
            .unwrap();

        let session = db.get_session(id).unwrap().unwrap();
        assert_eq!(session.status, "running");
        assert_eq!(session.queries, vec!["rust developer jobs"]);
        assert!(session.completed_at.is_none());

        db.complete_session(id, 12, 5).unwrap();
        let session = db.get_session(id).unwrap().unwrap();
        assert_eq!(session.status, "completed");
        assert_eq!(session.total_jobs_found, 12);
        assert_eq!(session.top_jobs_selected, 5);
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_failed_session_keeps_message() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_session("2025-06-15", &[]).unwrap();
        db.fail_session(id, "webdriver unreachable").unwrap();

        let session = db.get_session(id).unwrap().unwrap();
        assert_eq!(session.status, "failed");
        assert_eq!(session.error_message.as_deref(), Some("webdriver unreachable"));
    }

    #[test]
    fn test_upsert_is_idempotent_by_url() {
        let db = Database::open_in_memory().unwrap();
        let session = db.create_session("2025-06-15", &[]).unwrap();

        let first = db.upsert_job(session, &scored("https://example.com/jobs/1", 0.4)).unwrap();
        let second = db.upsert_job(session, &scored("https://example.com/jobs/1", 0.9)).unwrap();
        assert_eq!(first, second);

        let jobs = db.session_jobs(session).unwrap();
        assert_eq!(jobs.len(), 1);
        // Latest write wins.
        assert!((jobs[0].score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stored_job_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let session = db.create_session("2025-06-15", &[]).unwrap();
        db.upsert_job(session, &scored("https://example.com/jobs/1", 0.7)).unwrap();

        let jobs = db.session_jobs(session).unwrap();
        let job = &jobs[0];
        assert_eq!(job.job.tech_stack, vec!["Rust"]);
        assert_eq!(job.match_reasons, vec!["Tech match: Rust"]);
        assert_eq!(job.job.posted_date, NaiveDate::from_ymd_opt(2025, 6, 10));
        assert!(!job.is_top_pick);
    }

    #[test]
    fn test_mark_top_picks_two_phase() {
        let db = Database::open_in_memory().unwrap();
        let session = db.create_session("2025-06-15", &[]).unwrap();

        let a = db.upsert_job(session, &scored("https://example.com/jobs/a", 0.9)).unwrap();
        let b = db.upsert_job(session, &scored("https://example.com/jobs/b", 0.8)).unwrap();
        let _c = db.upsert_job(session, &scored("https://example.com/jobs/c", 0.2)).unwrap();

        db.mark_top_picks(session, &[a, b]).unwrap();
        assert_eq!(db.top_picks(session).unwrap().len(), 2);

        // Re-marking a smaller set replaces the flags, not adds to them.
        db.mark_top_picks(session, &[a]).unwrap();
        let picks = db.top_picks(session).unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].id, a);
    }

    #[test]
    fn test_session_jobs_ordered_by_score() {
        let db = Database::open_in_memory().unwrap();
        let session = db.create_session("2025-06-15", &[]).unwrap();
        db.upsert_job(session, &scored("https://example.com/jobs/low", 0.2)).unwrap();
        db.upsert_job(session, &scored("https://example.com/jobs/high", 0.8)).unwrap();

        let jobs = db.session_jobs(session).unwrap();
        assert_eq!(jobs[0].job.job_url, "https://example.com/jobs/high");
        assert_eq!(jobs[1].job.job_url, "https://example.com/jobs/low");
    }

    #[test]
    fn test_last_session_date_skips_failed_and_running() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.last_session_date().unwrap().is_none());

        let failed = db.create_session("2025-06-14", &[]).unwrap();
        db.fail_session(failed, "boom").unwrap();
        assert!(db.last_session_date().unwrap().is_none());

        let running = db.create_session("2025-06-15", &[]).unwrap();
        assert!(db.last_session_date().unwrap().is_none());
        db.complete_session(running, 1, 1).unwrap();
        assert!(db.last_session_date().unwrap().is_some());
    }

    #[test]
    fn test_ensure_initialized() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ensure_initialized().is_ok());
    }
}

mod browser;
mod db;
mod extract;
mod matcher;
mod models;
mod pipeline;
mod scheduler;
mod score;
mod search;
mod tui;

use anyhow::Result;
use chrono::{Duration as Interval, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use browser::{BrowserPool, PageLoader};
use db::Database;
use models::CandidateProfile;
use pipeline::{Pipeline, PipelineSettings, RunSummary};
use scheduler::Scheduler;
use search::DuckDuckGoFeed;

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "Automated job discovery - search, scrape, score, and rank postings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ScrapeOpts {
    /// Path to the candidate profile JSON file
    #[arg(short, long)]
    profile: PathBuf,

    /// Number of top picks to select
    #[arg(long, default_value = "10")]
    top_n: usize,

    /// Minimum score for the selection threshold
    #[arg(long, default_value = "0.4")]
    min_score: f64,

    /// Cap on candidate URLs per run
    #[arg(long, default_value = "50")]
    max_urls: usize,

    /// Concurrent page fetches (and browser pool size)
    #[arg(long, default_value = "3")]
    concurrency: usize,

    /// WebDriver server URL
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver: String,

    /// Per-page navigation timeout in seconds
    #[arg(long, default_value = "20")]
    timeout_secs: u64,

    /// Pause between search queries in seconds
    #[arg(long, default_value = "3")]
    delay_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run one scraping session now
    Run {
        #[command(flatten)]
        opts: ScrapeOpts,
    },

    /// Run on a schedule until interrupted
    Schedule {
        #[command(flatten)]
        opts: ScrapeOpts,

        /// Days between runs
        #[arg(long, default_value = "1")]
        every_days: i64,

        /// Seconds between due-checks
        #[arg(long, default_value = "3600")]
        tick_secs: u64,
    },

    /// Show recent sessions and the latest top picks
    Status {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Browse the latest session's jobs interactively
    Browse,

    /// Smoke tests against the live feed and browser
    Test {
        #[command(subcommand)]
        command: TestCommands,
    },
}

#[derive(Subcommand)]
enum TestCommands {
    /// Run one search query and print the hits
    Search {
        query: String,

        /// Pause between search queries in seconds
        #[arg(long, default_value = "3")]
        delay_secs: u64,
    },

    /// Load one URL and print the extracted record
    Fetch {
        url: String,

        /// Optional profile for tech-stack inference
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// WebDriver server URL
        #[arg(long, default_value = "http://localhost:9515")]
        webdriver: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobscout=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let db = Database::open()?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run { opts } => {
            let profile = CandidateProfile::from_file(&opts.profile)?;
            let (pipeline, pool) = build_pipeline(&opts)?;

            let result = pipeline.run(&profile).await;
            pool.shutdown().await;

            match result {
                Ok(summary) => print_summary(&summary),
                Err(e) => {
                    eprintln!("Run failed: {:#}", e);
                    eprintln!("The session was recorded as failed; the next run will retry.");
                    std::process::exit(1);
                }
            }
        }

        Commands::Schedule {
            opts,
            every_days,
            tick_secs,
        } => {
            let profile = CandidateProfile::from_file(&opts.profile)?;
            let (pipeline, _pool) = build_pipeline(&opts)?;
            let scheduler = Scheduler::new(
                Interval::days(every_days),
                Duration::from_secs(tick_secs),
            );
            println!(
                "Scheduling a run every {} day(s); checking every {}s. Ctrl-C to stop.",
                every_days, tick_secs
            );
            scheduler.run(&pipeline, &profile).await?;
        }

        Commands::Status { limit } => {
            let db = Database::open()?;
            db.ensure_initialized()?;

            let sessions = db.list_sessions(limit)?;
            if sessions.is_empty() {
                println!("No sessions yet. Run 'jobscout run' first.");
                return Ok(());
            }

            println!(
                "{:<6} {:<12} {:<10} {:>6} {:>6}  {}",
                "ID", "DATE", "STATUS", "FOUND", "PICKS", "NOTES"
            );
            println!("{}", "-".repeat(72));
            for session in &sessions {
                let notes = session.error_message.as_deref().unwrap_or("");
                println!(
                    "{:<6} {:<12} {:<10} {:>6} {:>6}  {}",
                    session.id,
                    session.session_date,
                    session.status,
                    session.total_jobs_found,
                    session.top_jobs_selected,
                    truncate(notes, 28)
                );
            }

            let latest = &sessions[0];
            let picks = db.top_picks(latest.id)?;
            if !picks.is_empty() {
                println!("\nTop picks of session #{}:", latest.id);
                println!(
                    "{:<5} {:>6} {:<32} {:<20} {:<18}",
                    "RANK", "SCORE", "TITLE", "COMPANY", "LOCATION"
                );
                println!("{}", "-".repeat(84));
                for (i, pick) in picks.iter().enumerate() {
                    println!(
                        "{:<5} {:>5.0}% {:<32} {:<20} {:<18}",
                        i + 1,
                        pick.score * 100.0,
                        truncate(&pick.job.title, 30),
                        truncate(&pick.job.company, 18),
                        truncate(pick.job.location.as_deref().unwrap_or("-"), 16)
                    );
                }
            }
        }

        Commands::Browse => {
            let db = Database::open()?;
            db.ensure_initialized()?;
            tui::run_browse(&db)?;
        }

        Commands::Test { command } => match command {
            TestCommands::Search { query, delay_secs } => {
                let feed = DuckDuckGoFeed::new(Duration::from_secs(delay_secs))?;
                use search::SearchFeed;
                let hits = feed.search(&[query], 10).await?;
                if hits.is_empty() {
                    println!("No results.");
                } else {
                    for hit in hits {
                        println!("[{}] {}", hit.site, hit.title);
                        println!("    {}", hit.url);
                        if !hit.snippet.is_empty() {
                            println!("    {}", truncate(&hit.snippet, 100));
                        }
                    }
                }
            }

            TestCommands::Fetch {
                url,
                profile,
                webdriver,
            } => {
                let profile = match profile {
                    Some(path) => CandidateProfile::from_file(&path)?,
                    None => CandidateProfile {
                        name: String::new(),
                        desired_roles: vec![],
                        tech_stack: vec![],
                        preferred_locations: vec![],
                        years_of_experience: 0,
                    },
                };
                let pool = BrowserPool::new(&webdriver, 1, Duration::from_secs(20));
                let result = pool.load(&url).await;
                pool.shutdown().await;

                let page = result?;
                match extract::extract(&page, &profile, Utc::now()) {
                    Ok(record) => {
                        println!("Title:    {}", record.title);
                        println!("Company:  {}", record.company);
                        println!("Location: {}", record.location.as_deref().unwrap_or("-"));
                        println!("Salary:   {}", record.salary_range.as_deref().unwrap_or("-"));
                        println!(
                            "Posted:   {}",
                            record
                                .posted_date
                                .map(|d| d.to_string())
                                .unwrap_or_else(|| "-".to_string())
                        );
                        println!("Tech:     {}", record.tech_stack.join(", "));
                        if !record.requirements.is_empty() {
                            println!("\nRequirements:\n{}", record.requirements);
                        }
                    }
                    Err(e) => println!("No record extracted: {}", e),
                }
            }
        },
    }

    Ok(())
}

fn build_pipeline(opts: &ScrapeOpts) -> Result<(Pipeline, Arc<BrowserPool>)> {
    let db = Database::open()?;
    db.ensure_initialized()?;

    let pool = Arc::new(BrowserPool::new(
        &opts.webdriver,
        opts.concurrency,
        Duration::from_secs(opts.timeout_secs),
    ));
    let feed = Arc::new(DuckDuckGoFeed::new(Duration::from_secs(opts.delay_secs))?);

    let settings = PipelineSettings {
        max_urls: opts.max_urls,
        top_n: opts.top_n,
        min_score: opts.min_score,
        fetch_concurrency: opts.concurrency,
    };

    let loader: Arc<dyn PageLoader> = pool.clone();
    let pipeline = Pipeline::new(db, loader, feed, settings);
    Ok((pipeline, pool))
}

fn print_summary(summary: &RunSummary) {
    let report = &summary.report;

    println!("Session #{} completed", summary.session_id);
    println!(
        "  Jobs scored: {}   Top picks: {}   Average score: {:.0}%",
        summary.total_found,
        summary.top_selected,
        report.average_score * 100.0
    );

    let bands = &report.bands;
    println!(
        "  Score bands: excellent {} | good {} | fair {} | poor {}",
        bands.excellent, bands.good, bands.fair, bands.poor
    );

    if !report.top_tech.is_empty() {
        let techs: Vec<String> = report
            .top_tech
            .iter()
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect();
        println!("  Top tech: {}", techs.join(", "));
    }
    if !report.top_companies.is_empty() {
        let companies: Vec<String> = report
            .top_companies
            .iter()
            .take(5)
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect();
        println!("  Top companies: {}", companies.join(", "));
    }

    if summary.selected.is_empty() {
        println!("\nNo jobs selected this session.");
        return;
    }

    println!("\nTOP PICKS");
    println!(
        "{:<5} {:>6} {:<32} {:<20} {}",
        "RANK", "SCORE", "TITLE", "COMPANY", "WHY"
    );
    println!("{}", "-".repeat(96));
    for (i, pick) in summary.selected.iter().enumerate() {
        let why = pick.match_reasons.first().map(String::as_str).unwrap_or("");
        println!(
            "{:<5} {:>5.0}% {:<32} {:<20} {}",
            i + 1,
            pick.score * 100.0,
            truncate(&pick.job.title, 30),
            truncate(&pick.job.company, 18),
            truncate(why, 30)
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

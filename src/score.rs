use chrono::{DateTime, Utc};

use crate::models::{CandidateProfile, JobRecord, ScoredJob};

const WEIGHT_TECH: f64 = 0.40;
const WEIGHT_TITLE: f64 = 0.30;
const WEIGHT_LOCATION: f64 = 0.20;
const WEIGHT_RECENCY: f64 = 0.10;

/// Generic title keywords scored when no desired role matches outright.
const GENERIC_TITLE_KEYWORDS: &[&str] = &[
    "developer",
    "engineer",
    "software",
    "full stack",
    "backend",
    "frontend",
];

const REMOTE_MARKERS: &[&str] = &["remote", "work from home"];

const SENIOR_MARKERS: &[&str] = &["senior", "staff", "principal", "lead"];
const JUNIOR_MARKERS: &[&str] = &["junior", "entry level", "entry-level", "graduate"];

const STARTUP_MARKERS: &[&str] = &["startup", "early-stage", "early stage", "seed-funded"];

/// Scores a record against the profile. The result is always in [0,1]
/// and always carries at least one match reason, no matter how sparse
/// the record is.
pub fn score_job(profile: &CandidateProfile, job: &JobRecord, now: DateTime<Utc>) -> ScoredJob {
    let tech = tech_overlap_score(profile, job);
    let title = title_match_score(profile, job);
    let location = location_match_score(profile, job);
    let recency = recency_score(job, now);

    let weighted =
        tech * WEIGHT_TECH + title * WEIGHT_TITLE + location * WEIGHT_LOCATION + recency * WEIGHT_RECENCY;
    // The weighted sum cannot exceed 100 by construction; the clamp is
    // an invariant check, not a correction path.
    let score = (weighted / 100.0).clamp(0.0, 1.0);

    ScoredJob {
        job: job.clone(),
        score,
        match_reasons: match_reasons(profile, job, score, now),
    }
}

/// matches / max(|job_tech|, |profile_tech|), case-insensitive exact
/// token match. A job with no listed tech scores 0.
fn tech_overlap_score(profile: &CandidateProfile, job: &JobRecord) -> f64 {
    if job.tech_stack.is_empty() {
        return 0.0;
    }
    let matches = matched_tech(profile, job).len();
    let denom = job.tech_stack.len().max(profile.tech_stack.len());
    if denom == 0 {
        return 0.0;
    }
    matches as f64 / denom as f64 * 100.0
}

fn matched_tech(profile: &CandidateProfile, job: &JobRecord) -> Vec<String> {
    job.tech_stack
        .iter()
        .filter(|jt| {
            profile
                .tech_stack
                .iter()
                .any(|pt| pt.eq_ignore_ascii_case(jt))
        })
        .cloned()
        .collect()
}

/// 100 on a direct role substring match, otherwise a partial score
/// from generic title keywords.
fn title_match_score(profile: &CandidateProfile, job: &JobRecord) -> f64 {
    let title = job.title.to_lowercase();
    if title.is_empty() {
        return 0.0;
    }
    if profile
        .desired_roles
        .iter()
        .any(|role| !role.is_empty() && title.contains(&role.to_lowercase()))
    {
        return 100.0;
    }
    let matched = GENERIC_TITLE_KEYWORDS
        .iter()
        .filter(|kw| title.contains(*kw))
        .count();
    matched as f64 / GENERIC_TITLE_KEYWORDS.len() as f64 * 60.0
}

fn location_match_score(profile: &CandidateProfile, job: &JobRecord) -> f64 {
    let Some(location) = &job.location else {
        return 0.0;
    };
    let location = location.to_lowercase();
    let preferred = profile
        .preferred_locations
        .iter()
        .any(|loc| !loc.is_empty() && location.contains(&loc.to_lowercase()));
    let remote = REMOTE_MARKERS.iter().any(|m| location.contains(m));
    if preferred || remote { 100.0 } else { 0.0 }
}

/// Unknown dates are neutral (50), not stale and not fresh.
fn recency_score(job: &JobRecord, now: DateTime<Utc>) -> f64 {
    match days_since_posted(job, now) {
        None => 50.0,
        Some(days) if days <= 1 => 100.0,
        Some(days) if days <= 3 => 80.0,
        Some(days) if days <= 7 => 60.0,
        Some(days) if days <= 14 => 40.0,
        Some(days) if days <= 30 => 20.0,
        Some(_) => 0.0,
    }
}

fn days_since_posted(job: &JobRecord, now: DateTime<Utc>) -> Option<i64> {
    job.posted_date
        .map(|posted| (now.date_naive() - posted).num_days().max(0))
}

/// Re-derives human-readable justifications in a fixed rule order.
/// Separate from the numeric pass so wording can evolve without
/// touching the score.
fn match_reasons(
    profile: &CandidateProfile,
    job: &JobRecord,
    score: f64,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reasons = Vec::new();

    let matched = matched_tech(profile, job);
    if !matched.is_empty() {
        let shown: Vec<&str> = matched.iter().take(3).map(String::as_str).collect();
        let suffix = if matched.len() > 3 { ", ..." } else { "" };
        reasons.push(format!("Tech match: {}{}", shown.join(", "), suffix));
    }

    let title = job.title.to_lowercase();
    if let Some(role) = profile
        .desired_roles
        .iter()
        .find(|role| !role.is_empty() && title.contains(&role.to_lowercase()))
    {
        reasons.push(format!("Matches desired role: {}", role));
    }

    if let Some(location) = &job.location {
        let lower = location.to_lowercase();
        if REMOTE_MARKERS.iter().any(|m| lower.contains(m)) {
            reasons.push("Remote friendly".to_string());
        } else if profile
            .preferred_locations
            .iter()
            .any(|loc| !loc.is_empty() && lower.contains(&loc.to_lowercase()))
        {
            reasons.push(format!("Location match: {}", location));
        }
    }

    match days_since_posted(job, now) {
        Some(days) if days <= 1 => reasons.push("Posted today".to_string()),
        Some(days) if days <= 3 => reasons.push("Recently posted".to_string()),
        _ => {}
    }

    let haystack = format!("{} {}", title, job.description.to_lowercase());
    if profile.years_of_experience >= 5 && SENIOR_MARKERS.iter().any(|m| haystack.contains(m)) {
        reasons.push(format!(
            "Seniority fits {} years of experience",
            profile.years_of_experience
        ));
    } else if profile.years_of_experience < 3
        && JUNIOR_MARKERS.iter().any(|m| haystack.contains(m))
    {
        reasons.push("Suited to early-career experience".to_string());
    }

    if let Some(salary) = &job.salary_range {
        reasons.push(format!("Salary listed: {}", salary));
    }

    if STARTUP_MARKERS
        .iter()
        .any(|m| job.description.to_lowercase().contains(m))
    {
        reasons.push("Startup environment".to_string());
    }

    if reasons.is_empty() {
        reasons.push(format!("Overall score: {:.0}%", score * 100.0));
    }

    reasons
}

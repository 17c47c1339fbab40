use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{CandidateProfile, JobRecord, JobReport, ScoreBands, ScoredJob};
use crate::score::score_job;

const TOP_FREQUENCY_ENTRIES: usize = 10;

/// Scores a batch, sorts it, and selects the working subset.
///
/// Returns the full scored list (score descending, ties in input
/// order) and the selection. Records clearing `min_score` are
/// preferred; when none do and the batch is non-empty, the top N of
/// the unfiltered list are selected so a session always yields
/// candidates.
pub fn rank_and_select(
    profile: &CandidateProfile,
    records: &[JobRecord],
    top_n: usize,
    min_score: f64,
    now: DateTime<Utc>,
) -> (Vec<ScoredJob>, Vec<ScoredJob>) {
    let mut scored: Vec<ScoredJob> = records
        .iter()
        .map(|record| score_job(profile, record, now))
        .collect();

    // Stable sort keeps input order on ties, so repeated runs over the
    // same batch rank identically.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<ScoredJob> = scored
        .iter()
        .filter(|s| s.score >= min_score)
        .take(top_n)
        .cloned()
        .collect();

    if selected.is_empty() && !scored.is_empty() {
        selected = scored.iter().take(top_n).cloned().collect();
    }

    (scored, selected)
}

/// Builds the aggregate report over a full scored list (not the
/// selection).
pub fn build_report(scored: &[ScoredJob]) -> JobReport {
    if scored.is_empty() {
        return JobReport::default();
    }

    let total = scored.len();
    let average_score = scored.iter().map(|s| s.score).sum::<f64>() / total as f64;

    let mut tech_counts: HashMap<&str, usize> = HashMap::new();
    let mut company_counts: HashMap<&str, usize> = HashMap::new();
    let mut location_counts: HashMap<&str, usize> = HashMap::new();
    let mut bands = ScoreBands::default();

    for s in scored {
        for tech in &s.job.tech_stack {
            *tech_counts.entry(tech.as_str()).or_default() += 1;
        }
        if !s.job.company.is_empty() {
            *company_counts.entry(s.job.company.as_str()).or_default() += 1;
        }
        if let Some(location) = &s.job.location {
            *location_counts.entry(location.as_str()).or_default() += 1;
        }

        if s.score > 0.8 {
            bands.excellent += 1;
        } else if s.score > 0.6 {
            bands.good += 1;
        } else if s.score > 0.4 {
            bands.fair += 1;
        } else {
            bands.poor += 1;
        }
    }

    JobReport {
        total,
        average_score,
        top_tech: top_entries(tech_counts, TOP_FREQUENCY_ENTRIES),
        top_companies: top_entries(company_counts, TOP_FREQUENCY_ENTRIES),
        locations: top_entries(location_counts, usize::MAX),
        bands,
    }
}

fn top_entries(counts: HashMap<&str, usize>, limit: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    // Count descending, name ascending for a deterministic report.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

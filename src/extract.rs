use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::{CandidateProfile, JobRecord, RawPage};

/// Extraction failure, distinguishing "nothing to parse" from
/// "parsed but no meaningful record". Callers drop the record and
/// continue in both cases; the distinction matters for logging.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("page is empty: {0}")]
    EmptyPage(String),
    #[error("no meaningful record (title and company both missing): {0}")]
    NoMeaningfulRecord(String),
}

// Selector chains, tried in order; first candidate with non-empty
// trimmed text wins. Covers LinkedIn, Indeed, Greenhouse, Lever and
// generic job-board markup without per-site branching.

const TITLE_SELECTORS: &[&str] = &[
    "h1.job-title",
    "h1[class*='jobTitle']",
    "h1[class*='job-title']",
    ".jobs-unified-top-card__job-title",
    ".top-card-layout__title",
    "[data-testid='jobsearch-JobInfoHeader-title']",
    ".posting-headline h2",
    ".app-title",
    "h1",
    "title",
];

const COMPANY_SELECTORS: &[&str] = &[
    ".jobs-unified-top-card__company-name",
    ".topcard__org-name-link",
    "[data-testid='inlineHeader-companyName']",
    "[data-company-name]",
    ".posting-categories .sort-by-team",
    ".company-name",
    "[class*='companyName']",
    "[class*='company-name']",
    "a[href*='/company/']",
    "[class*='employer']",
];

const COMPANY_LINK_SELECTORS: &[&str] = &[
    ".topcard__org-name-link",
    "a[href*='/company/']",
    "a[class*='company']",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".jobs-description__content",
    ".show-more-less-html__markup",
    ".description__text",
    "#job-details",
    "[data-testid='jobsearch-JobComponent-description']",
    ".posting-description",
    "[class*='job-description']",
    "[class*='jobDescription']",
    "article",
];

const LOCATION_SELECTORS: &[&str] = &[
    ".jobs-unified-top-card__bullet",
    ".topcard__flavor--bullet",
    "[data-testid='inlineHeader-companyLocation']",
    ".posting-categories .sort-by-location",
    "[class*='job-location']",
    "[class*='jobLocation']",
    "[class*='location']",
];

const SALARY_SELECTORS: &[&str] = &[
    "[class*='salary']",
    "[class*='compensation']",
    "[data-testid='jobsearch-OtherJobDetailsContainer'] [class*='salary']",
    ".posting-categories .sort-by-commitment",
];

/// Common technology names scanned for in page text, in catalog order.
/// The candidate's own tech stack is scanned in addition to these.
const TECH_CATALOG: &[&str] = &[
    "JavaScript",
    "TypeScript",
    "Python",
    "Java",
    "C#",
    "C++",
    "Go",
    "Rust",
    "Ruby",
    "PHP",
    "Swift",
    "Kotlin",
    "Scala",
    "Elixir",
    "React",
    "Angular",
    "Vue",
    "Next.js",
    "Node.js",
    "Express",
    "Django",
    "Flask",
    "FastAPI",
    "Spring",
    "Rails",
    ".NET",
    "GraphQL",
    "gRPC",
    "PostgreSQL",
    "MySQL",
    "MongoDB",
    "Redis",
    "Elasticsearch",
    "SQLite",
    "DynamoDB",
    "Kafka",
    "RabbitMQ",
    "Docker",
    "Kubernetes",
    "Terraform",
    "Ansible",
    "AWS",
    "Azure",
    "GCP",
    "Linux",
    "Git",
    "CI/CD",
    "Jenkins",
    "TensorFlow",
    "PyTorch",
    "Spark",
];

/// Section headers that introduce a requirements block, in priority
/// order. First match wins.
const REQUIREMENT_HEADERS: &[&str] = &[
    "requirements:",
    "qualifications:",
    "must have:",
    "what you'll need:",
    "what we're looking for:",
    "what you bring:",
    "you have:",
    "skills:",
];

const REQUIREMENTS_MAX_CHARS: usize = 1000;
const DESCRIPTION_FALLBACK_CHARS: usize = 2000;

static DAYS_AGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\+?\s*days?\s+ago\b").unwrap());
static HOURS_AGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*hours?\s+ago\b").unwrap());
static POSTED_TODAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bposted\s+today\b|\bjust\s+posted\b").unwrap());
static POSTED_YESTERDAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bposted\s+yesterday\b").unwrap());
static SALARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£]\s?\d{2,3}(?:,\d{3})*\s?[kK]?(?:\s?[-–—]\s?[$€£]?\s?\d{2,3}(?:,\d{3})*\s?[kK]?)?(?:\s?(?:per|/)\s?(?:year|yr|annum|hour|hr))?")
        .unwrap()
});

/// Extracts a structured job record from a loaded page.
///
/// Only title and company are load-bearing: if neither resolves the
/// page is not a job posting and the record is dropped. Every other
/// field degrades to empty/None.
pub fn extract(
    page: &RawPage,
    profile: &CandidateProfile,
    now: DateTime<Utc>,
) -> Result<JobRecord, ExtractError> {
    if page.html.trim().is_empty() && page.text.trim().is_empty() {
        return Err(ExtractError::EmptyPage(page.url.clone()));
    }

    let doc = Html::parse_document(&page.html);

    let title = first_selector_text(&doc, TITLE_SELECTORS);
    let company = first_selector_text(&doc, COMPANY_SELECTORS);

    if title.is_none() && company.is_none() {
        return Err(ExtractError::NoMeaningfulRecord(page.url.clone()));
    }

    let text = if page.text.trim().is_empty() {
        collapse_whitespace(&doc.root_element().text().collect::<Vec<_>>().join(" "))
    } else {
        page.text.clone()
    };

    let description = first_selector_text(&doc, DESCRIPTION_SELECTORS)
        .unwrap_or_else(|| truncate_chars(&text, DESCRIPTION_FALLBACK_CHARS));

    let salary_range =
        first_selector_text(&doc, SALARY_SELECTORS).or_else(|| salary_from_text(&text));

    Ok(JobRecord {
        title: title.unwrap_or_default(),
        company: company.unwrap_or_default(),
        company_url: company_link(&doc),
        job_url: page.url.clone(),
        description,
        requirements: extract_requirements(&text),
        tech_stack: infer_tech_stack(&text, &profile.tech_stack),
        salary_range,
        location: first_selector_text(&doc, LOCATION_SELECTORS),
        posted_date: infer_posted_date(&text, now),
    })
}

/// First selector in the chain whose matched element has non-empty
/// trimmed text.
fn first_selector_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Some(selector) = Selector::parse(raw).ok() else {
            continue;
        };
        for element in doc.select(&selector) {
            let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn company_link(doc: &Html) -> Option<String> {
    for raw in COMPANY_LINK_SELECTORS {
        let Some(selector) = Selector::parse(raw).ok() else {
            continue;
        };
        for element in doc.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if href.starts_with("http") {
                    return Some(href.to_string());
                }
            }
        }
    }
    None
}

/// Case-insensitive substring scan against the catalog plus the
/// candidate's own stack. Result order is catalog order, then
/// profile-only entries; deduplicated case-insensitively.
pub fn infer_tech_stack(text: &str, profile_tech: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: Vec<String> = Vec::new();

    for tech in TECH_CATALOG {
        if lower.contains(&tech.to_lowercase()) {
            found.push((*tech).to_string());
        }
    }

    for tech in profile_tech {
        let already = found.iter().any(|t| t.eq_ignore_ascii_case(tech));
        if !already && lower.contains(&tech.to_lowercase()) {
            found.push(tech.clone());
        }
    }

    found
}

/// Up to 1000 characters following the first matching section header.
pub fn extract_requirements(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with the original.
    let lower = text.to_ascii_lowercase();
    for header in REQUIREMENT_HEADERS {
        if let Some(idx) = lower.find(header) {
            let after = &text[idx + header.len()..];
            return truncate_chars(after.trim_start(), REQUIREMENTS_MAX_CHARS)
                .trim_end()
                .to_string();
        }
    }
    String::new()
}

/// Relative-date phrases converted to an absolute date. No match is
/// unknown, which is distinct from "posted now".
pub fn infer_posted_date(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    if let Some(caps) = DAYS_AGO_RE.captures(text) {
        let days: i64 = caps[1].parse().ok()?;
        return Some((now - Duration::days(days)).date_naive());
    }
    if let Some(caps) = HOURS_AGO_RE.captures(text) {
        let hours: i64 = caps[1].parse().ok()?;
        return Some((now - Duration::hours(hours)).date_naive());
    }
    if POSTED_TODAY_RE.is_match(text) {
        return Some(now.date_naive());
    }
    if POSTED_YESTERDAY_RE.is_match(text) {
        return Some((now - Duration::days(1)).date_naive());
    }
    None
}

fn salary_from_text(text: &str) -> Option<String> {
    SALARY_RE
        .find(text)
        .map(|m| collapse_whitespace(m.as_str()))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{CandidateProfile, SearchHit};

/// Titles this close (Jaro-Winkler) on the same site are treated as
/// the same listing surfaced twice by the search engine.
const NEAR_DUPLICATE_TITLE: f64 = 0.95;

const MAX_QUERIES: usize = 4;

/// Upstream feed of candidate URLs. The pipeline treats it as an
/// opaque iterable of hits to visit.
#[async_trait]
pub trait SearchFeed: Send + Sync {
    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>>;
}

/// Builds the session's search queries from the profile: one per
/// desired role, plus a remote variant for the first role.
pub fn build_queries(profile: &CandidateProfile) -> Vec<String> {
    let mut queries = Vec::new();
    for role in &profile.desired_roles {
        if role.trim().is_empty() {
            continue;
        }
        queries.push(format!("\"{}\" jobs", role.trim()));
    }
    if let Some(role) = profile.desired_roles.first() {
        if !role.trim().is_empty() {
            queries.push(format!("remote {} jobs", role.trim().to_lowercase()));
        }
    }
    queries.truncate(MAX_QUERIES);
    queries
}

/// Search feed backed by DuckDuckGo's HTML endpoint. Pauses between
/// queries (fixed delay plus jitter) as a politeness measure.
pub struct DuckDuckGoFeed {
    client: reqwest::Client,
    delay: Duration,
}

impl DuckDuckGoFeed {
    pub fn new(delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) jobscout/0.1")
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to build search client")?;
        Ok(Self { client, delay })
    }

    async fn search_one(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .with_context(|| format!("Search request failed for query: {}", query))?
            .error_for_status()
            .context("Search returned an error status")?;
        let body = response.text().await.context("Failed to read search response")?;
        Ok(parse_results(&body))
    }
}

#[async_trait]
impl SearchFeed for DuckDuckGoFeed {
    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();

        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                // Politeness pause between site queries, with jitter so
                // repeated runs don't form a fixed request pattern.
                let jitter = rand::thread_rng().gen_range(0..1000);
                tokio::time::sleep(self.delay + Duration::from_millis(jitter)).await;
            }

            let batch = match self.search_one(query).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(%query, error = %e, "search query failed, continuing");
                    continue;
                }
            };
            debug!(%query, results = batch.len(), "search query done");

            for hit in batch {
                if !seen_urls.insert(hit.url.clone()) {
                    continue;
                }
                if is_near_duplicate(&hits, &hit) {
                    continue;
                }
                hits.push(hit);
                if hits.len() >= limit {
                    return Ok(hits);
                }
            }
        }

        Ok(hits)
    }
}

/// Parses DuckDuckGo's HTML result page into hits, skipping
/// navigation artifacts and aggregator search-listing links.
pub fn parse_results(html: &str) -> Vec<SearchHit> {
    let doc = Html::parse_document(html);
    let Some(result_selector) = Selector::parse(".result").ok() else {
        return Vec::new();
    };
    let Some(link_selector) = Selector::parse("a.result__a").ok() else {
        return Vec::new();
    };
    let Some(snippet_selector) = Selector::parse(".result__snippet").ok() else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in doc.select(&result_selector) {
        let Some(link) = result.select(&link_selector).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_result_url(href) else {
            continue;
        };
        let title = link.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() || is_navigation_artifact(&title) {
            continue;
        }
        if is_search_listing(&url) {
            continue;
        }

        let snippet = result
            .select(&snippet_selector)
            .next()
            .map(|s| s.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let snippet = snippet.split_whitespace().collect::<Vec<_>>().join(" ");

        hits.push(SearchHit {
            site: site_of(&url),
            url,
            title,
            snippet,
        });
    }
    hits
}

/// DuckDuckGo wraps result links in a redirect with the target in the
/// `uddg` parameter; direct absolute links pass through unchanged.
fn resolve_result_url(href: &str) -> Option<String> {
    if let Some(idx) = href.find("uddg=") {
        let tail = &href[idx + 5..];
        let encoded = tail.split('&').next().unwrap_or(tail);
        let decoded = percent_decode(encoded);
        if decoded.starts_with("http") {
            return Some(decoded);
        }
        return None;
    }
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    None
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn site_of(url: &str) -> String {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .trim_start_matches("www.")
        .to_string()
}

fn is_navigation_artifact(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower.len() < 10
        || lower.starts_with("jobs in ")
        || lower.contains("sign in")
        || lower.contains("log in")
}

/// Aggregator search/listing pages are feeds of many postings, not a
/// posting themselves.
fn is_search_listing(url: &str) -> bool {
    url.contains("/jobs/search") || url.contains("/search?") || url.contains("/jobs?q=")
}

fn is_near_duplicate(hits: &[SearchHit], candidate: &SearchHit) -> bool {
    hits.iter().any(|h| {
        h.site == candidate.site
            && strsim::jaro_winkler(
                &h.title.to_lowercase(),
                &candidate.title.to_lowercase(),
            ) >= NEAR_DUPLICATE_TITLE
    })
}

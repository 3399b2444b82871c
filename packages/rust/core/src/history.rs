//! Past-project evidence from a candidate's own project pages.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use subscout_discovery::PageFetcher;
use subscout_shared::{Candidate, Query, Result, ScoutError, state_code, state_name};

use crate::dedup::normalize_name;

/// Paths under the company website that list past work.
pub const PROJECT_PATHS: &[&str] = &["/projects", "/portfolio", "/our-work", "/case-studies"];

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19[5-9]\d|20\d{2})\b").expect("year regex"));

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z.']*(?: [A-Z][A-Za-z.']*){0,3}),\s*([A-Z]{2})\b")
        .expect("location regex")
});

/// Project block selectors, most specific first. The first that yields any
/// dated block is the one used for the page.
static BLOCK_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article, .project", "li", "tr", "p"]
        .iter()
        .map(|s| Selector::parse(s).expect("project block selector"))
        .collect()
});

static HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, strong, b").expect("heading selector")
});

/// A dated project found on a page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProjectMention {
    pub name: String,
    pub year: i32,
    /// Explicit `City, ST` in the block, with a valid state code.
    pub location: Option<(String, String)>,
    pub text: String,
}

/// Counts relevant projects on a candidate's website.
#[derive(Clone)]
pub struct HistoryAnalyzer {
    pages: Arc<dyn PageFetcher>,
    lookback_years: u32,
    reference_year: Option<i32>,
}

impl HistoryAnalyzer {
    pub fn new(pages: Arc<dyn PageFetcher>, lookback_years: u32) -> Self {
        Self {
            pages,
            lookback_years,
            reference_year: None,
        }
    }

    /// Pin the end of the lookback window instead of using the current year.
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    /// Distinct projects within the lookback window that match the query's
    /// location and, when the query has keywords, a keyword or the trade.
    ///
    /// Errors when the candidate has no website or no project page could be
    /// fetched; the caller leaves the count unset in that case.
    #[instrument(skip_all, fields(candidate = %candidate.name))]
    pub async fn analyze(&self, candidate: &Candidate, query: &Query) -> Result<u32> {
        let website = candidate.website.as_deref().ok_or_else(|| {
            ScoutError::validation(format!("'{}' has no website to inspect", candidate.name))
        })?;
        let base = Url::parse(website)
            .map_err(|e| ScoutError::fetch(website, format!("invalid URL: {e}")))?;

        let newest = self.reference_year.unwrap_or_else(|| Utc::now().year());
        let oldest = newest - self.lookback_years as i32;

        let mut fetched = 0usize;
        let mut last_error = None;
        let mut seen = HashSet::new();
        for path in PROJECT_PATHS {
            let Ok(url) = base.join(path) else { continue };
            let raw = match self.pages.fetch(&url).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(url = %url, error = %e, "project page unavailable");
                    last_error = Some(e);
                    continue;
                }
            };
            fetched += 1;

            for mention in project_mentions(&raw.content) {
                if (oldest..=newest).contains(&mention.year) && is_relevant(&mention, query) {
                    seen.insert(identity(&mention, query));
                }
            }
        }

        if fetched == 0 {
            return Err(last_error
                .unwrap_or_else(|| ScoutError::fetch(website, "no project pages could be fetched")));
        }

        let count = seen.len() as u32;
        debug!(pages = fetched, count, "project history analyzed");
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// Dated project blocks on one page.
pub(crate) fn project_mentions(html: &str) -> Vec<ProjectMention> {
    let doc = Html::parse_document(html);
    for selector in BLOCK_SELECTORS.iter() {
        let mentions: Vec<ProjectMention> = doc.select(selector).filter_map(mention_from).collect();
        if !mentions.is_empty() {
            return mentions;
        }
    }
    Vec::new()
}

fn mention_from(block: ElementRef<'_>) -> Option<ProjectMention> {
    let nodes: Vec<&str> = block
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    let text = nodes.join(" ");

    let year = YEAR_RE.captures(&text)?[1].parse().ok()?;

    let location = nodes.iter().find_map(|node| {
        LOCATION_RE.captures_iter(node).find_map(|caps| {
            let state = state_code(&caps[2])?;
            Some((caps[1].to_string(), state.to_string()))
        })
    });

    let heading = block
        .select(&HEADING_SEL)
        .map(|h| h.text().collect::<String>().trim().to_string())
        .find(|h| !h.is_empty());
    let name = heading.unwrap_or_else(|| leading_phrase(&text));

    Some(ProjectMention {
        name,
        year,
        location,
        text,
    })
}

/// Text up to the first sentence or clause break.
fn leading_phrase(text: &str) -> String {
    let end = text
        .find(['.', ',', ':', '(', ';'])
        .or_else(|| text.find(" - "))
        .unwrap_or(text.len());
    text[..end].chars().take(80).collect::<String>().trim().to_string()
}

// ---------------------------------------------------------------------------
// Relevance
// ---------------------------------------------------------------------------

fn is_relevant(mention: &ProjectMention, query: &Query) -> bool {
    let location_ok = match &mention.location {
        Some((_, state)) => state.eq_ignore_ascii_case(&query.state),
        None => mentions_city(&mention.text, query) || mentions_state(&mention.text, &query.state),
    };
    if !location_ok {
        return false;
    }

    if query.keywords.is_empty() {
        return true;
    }
    let lower = mention.text.to_lowercase();
    query
        .keywords
        .iter()
        .any(|k| lower.contains(k.as_str()))
        || lower.contains(&query.trade.to_lowercase())
}

fn mentions_city(text: &str, query: &Query) -> bool {
    text.to_lowercase().contains(&query.city.to_lowercase())
}

fn mentions_state(text: &str, code: &str) -> bool {
    let as_word = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == code);
    let by_name = state_name(code)
        .is_some_and(|name| text.to_lowercase().contains(&name.to_lowercase()));
    as_word || by_name
}

/// Project identity: name, year and location.
fn identity(mention: &ProjectMention, query: &Query) -> (String, i32, String) {
    let location = match &mention.location {
        Some((city, state)) => format!("{}|{}", normalize_name(city), state.to_ascii_lowercase()),
        None if mentions_city(&mention.text, query) => {
            format!("{}|{}", normalize_name(&query.city), query.state.to_ascii_lowercase())
        }
        None => query.state.to_ascii_lowercase(),
    };
    (normalize_name(&mention.name), mention.year, location)
}

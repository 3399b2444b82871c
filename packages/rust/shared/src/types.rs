//! Core domain types for subscout research jobs.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScoutError};

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for research job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// `SUCCEEDED` and `FAILED` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(ScoutError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// What a research job is looking for. Immutable once a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QueryFields")]
pub struct Query {
    pub trade: String,
    pub city: String,
    /// Two-letter, upper-cased state code.
    pub state: String,
    pub min_bond: u64,
    /// Lower-cased, trimmed, de-duplicated.
    pub keywords: BTreeSet<String>,
}

/// Unvalidated wire form of [`Query`].
#[derive(Deserialize)]
struct QueryFields {
    trade: String,
    city: String,
    state: String,
    min_bond: u64,
    #[serde(default)]
    keywords: Vec<String>,
}

impl TryFrom<QueryFields> for Query {
    type Error = ScoutError;

    fn try_from(f: QueryFields) -> Result<Self> {
        Query::new(f.trade, f.city, f.state, f.min_bond, f.keywords)
    }
}

impl Query {
    /// Build a validated query.
    pub fn new<K, S>(
        trade: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        min_bond: u64,
        keywords: K,
    ) -> Result<Self>
    where
        K: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let trade = trade.into().trim().to_string();
        let city = city.into().trim().to_string();
        let state = state.into().trim().to_ascii_uppercase();

        if trade.is_empty() {
            return Err(ScoutError::validation("trade must not be empty"));
        }
        if city.is_empty() {
            return Err(ScoutError::validation("city must not be empty"));
        }
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ScoutError::validation(format!(
                "state must be a 2-letter code, got '{state}'"
            )));
        }

        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Self {
            trade,
            city,
            state,
            min_bond,
            keywords,
        })
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Where a piece of evidence came from, in ascending order of authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A search engine result snippet.
    SearchSnippet,
    /// An aggregator or directory listing (Yelp, BBB, ...).
    Directory,
    /// A government licensing or registry page.
    Regulatory,
    /// The company's own website.
    CompanySite,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchSnippet => "search_snippet",
            Self::Directory => "directory",
            Self::Regulatory => "regulatory",
            Self::CompanySite => "company_site",
        }
    }
}

/// Raw content retrieved from one source. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvidence {
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub kind: SourceKind,
    /// Response body (HTML for pages, title + snippet for search hits).
    pub content: String,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Fields extracted from a single [`RawEvidence`], before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCandidate {
    pub name: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub lic_number: Option<String>,
    pub bond_amount: Option<u64>,
    pub evidence_url: String,
    /// Verbatim excerpt of the originating evidence content.
    pub evidence_text: String,
    pub source_kind: SourceKind,
    pub fetched_at: DateTime<Utc>,
    /// Evidence URLs already folded into this record by an earlier merge.
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl PartialCandidate {
    /// An otherwise empty record anchored on `evidence`.
    pub fn anchored(name: impl Into<String>, evidence: &RawEvidence, excerpt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            website: None,
            email: None,
            phone_number: None,
            city: None,
            state: None,
            lic_number: None,
            bond_amount: None,
            evidence_url: evidence.source_url.clone(),
            evidence_text: excerpt.into(),
            source_kind: evidence.kind,
            fetched_at: evidence.fetched_at,
            source_urls: Vec::new(),
        }
    }
}

impl From<&Candidate> for PartialCandidate {
    fn from(c: &Candidate) -> Self {
        Self {
            name: c.name.clone(),
            website: c.website.clone(),
            email: c.email.clone(),
            phone_number: c.phone_number.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            lic_number: c.lic_number.clone(),
            bond_amount: c.bond_amount,
            evidence_url: c.evidence_url.clone(),
            evidence_text: c.evidence_text.clone(),
            source_kind: c.evidence_kind,
            fetched_at: c.last_checked,
            source_urls: c.source_urls.clone(),
        }
    }
}

/// A de-duplicated company, enriched stage by stage.
///
/// Every optional field distinguishes "not known" (`None`) from a known
/// negative value: `lic_active: Some(false)` is a confirmed-inactive license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Derived from the deduplication merge key.
    pub id: String,
    pub name: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    /// Set only by a registry answer.
    pub lic_active: Option<bool>,
    /// Read from the page at merge time; after verification, only a number
    /// the registry confirmed survives.
    pub lic_number: Option<String>,
    pub bond_amount: Option<u64>,
    pub relevant_project_count: Option<u32>,
    pub evidence_url: String,
    pub evidence_text: String,
    pub evidence_kind: SourceKind,
    /// Every evidence URL merged into this candidate (sorted, unique).
    #[serde(default)]
    pub source_urls: Vec<String>,
    pub score: Option<u8>,
    pub last_checked: DateTime<Utc>,
}

impl Candidate {
    /// Whether the candidate carries a traceable evidence pair.
    pub fn has_evidence(&self) -> bool {
        !self.evidence_url.trim().is_empty() && !self.evidence_text.trim().is_empty()
    }

    /// Result order: score descending, then project count descending, then
    /// name ascending. Unset score and count sort as zero.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .unwrap_or(0)
            .cmp(&self.score.unwrap_or(0))
            .then_with(|| {
                other
                    .relevant_project_count
                    .unwrap_or(0)
                    .cmp(&self.relevant_project_count.unwrap_or(0))
            })
            .then_with(|| self.name.cmp(&other.name))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A research job as held by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub query: Query,
    pub status: JobStatus,
    /// Empty until `SUCCEEDED`; ordered by score descending.
    #[serde(default)]
    pub results: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cooperative cancellation flag, checked at stage boundaries.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly submitted job.
    pub fn new(query: Query) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            query,
            status: JobStatus::Queued,
            results: Vec::new(),
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data accompanying a status transition.
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// No data (used for `RUNNING`).
    Empty,
    /// Final ranked results (required for `SUCCEEDED`).
    Results(Vec<Candidate>),
    /// Human-readable failure reason (required for `FAILED`).
    Error(String),
}

// ---------------------------------------------------------------------------
// External projections
// ---------------------------------------------------------------------------

/// Externally visible result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub lic_active: Option<bool>,
    pub lic_number: Option<String>,
    pub bond_amount: Option<u64>,
    pub relevant_project_count: Option<u32>,
    pub score: u8,
    pub evidence_url: String,
    pub evidence_text: String,
    pub last_checked: DateTime<Utc>,
}

impl From<&Candidate> for ResultRecord {
    fn from(c: &Candidate) -> Self {
        Self {
            name: c.name.clone(),
            website: c.website.clone(),
            email: c.email.clone(),
            phone_number: c.phone_number.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            lic_active: c.lic_active,
            lic_number: c.lic_number.clone(),
            bond_amount: c.bond_amount,
            relevant_project_count: c.relevant_project_count,
            score: c.score.unwrap_or(0),
            evidence_url: c.evidence_url.clone(),
            evidence_text: c.evidence_text.clone(),
            last_checked: c.last_checked,
        }
    }
}

/// What a polling client sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Present only when `status == SUCCEEDED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ResultRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let results = (job.status == JobStatus::Succeeded)
            .then(|| job.results.iter().map(ResultRecord::from).collect());
        let error = (job.status == JobStatus::Failed).then(|| job.error.clone()).flatten();
        Self {
            job_id: job.job_id,
            status: job.status,
            results,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn query_normalizes_inputs() {
        let q = Query::new(" mechanical ", "Austin", "tx", 5_000_000, ["Hotel", " commercial", "hotel", ""])
            .expect("valid query");
        assert_eq!(q.trade, "mechanical");
        assert_eq!(q.state, "TX");
        assert_eq!(
            q.keywords.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["commercial", "hotel"]
        );
    }

    #[test]
    fn query_rejects_bad_state() {
        let err = Query::new("plumbing", "Austin", "Texas", 0, Vec::<String>::new()).unwrap_err();
        assert!(err.to_string().contains("2-letter"));
        assert!(Query::new("", "Austin", "TX", 0, Vec::<String>::new()).is_err());
    }

    #[test]
    fn query_deserialization_validates() {
        let ok: Query = serde_json::from_str(
            r#"{"trade":"electrical","city":"Dallas","state":"tx","min_bond":100}"#,
        )
        .expect("deserialize");
        assert_eq!(ok.state, "TX");
        assert!(ok.keywords.is_empty());

        let bad = serde_json::from_str::<Query>(
            r#"{"trade":"electrical","city":"Dallas","state":"texas","min_bond":100}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Succeeded));
        for terminal in [Succeeded, Failed] {
            assert!(terminal.is_terminal());
            for next in [Queued, Running, Succeeded, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, r#""SUCCEEDED""#);
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
    }

    #[test]
    fn source_kind_authority_order() {
        assert!(SourceKind::CompanySite > SourceKind::Regulatory);
        assert!(SourceKind::Regulatory > SourceKind::Directory);
        assert!(SourceKind::Directory > SourceKind::SearchSnippet);
    }

    #[test]
    fn job_view_hides_results_until_succeeded() {
        let query = Query::new("mechanical", "Austin", "TX", 0, ["hotel"]).unwrap();
        let mut job = Job::new(query);
        job.status = JobStatus::Running;
        let view = JobView::from(&job);
        assert!(view.results.is_none());
        assert!(view.error.is_none());

        job.status = JobStatus::Succeeded;
        let view = JobView::from(&job);
        assert_eq!(view.results.map(|r| r.len()), Some(0));
    }
}

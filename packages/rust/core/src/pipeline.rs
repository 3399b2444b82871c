//! End-to-end research pipeline: query → evidence → candidates → ranked results.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use subscout_discovery::{
    DiscoveryOptions, EvidenceFetcher, HttpPageFetcher, HttpSearchProvider, PageFetcher,
};
use subscout_extractor::{FieldExtractor, OpenRouterModel, PageExtractor};
use subscout_shared::{
    AppConfig, Candidate, JobId, PartialCandidate, Query, RawEvidence, ResearchConfig, Result,
    ScoutError,
};
use subscout_storage::JobStore;

use crate::dedup;
use crate::history::HistoryAnalyzer;
use crate::license::LicenseVerifier;
use crate::scorer::Scorer;

/// Error text recorded on a job the client cancelled.
pub const CANCELLED_MESSAGE: &str = "cancelled by client";

/// Error text recorded on a job whose discovery found nothing to work with.
pub const NO_EVIDENCE_MESSAGE: &str = "discovery yielded no usable evidence";

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, job_id: JobId, name: &str);
    /// Called as evidence arrives, with the running total.
    fn evidence_found(&self, job_id: JobId, total: usize);
    /// Called when ranked results are ready.
    fn done(&self, job_id: JobId, results: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _job_id: JobId, _name: &str) {}
    fn evidence_found(&self, _job_id: JobId, _total: usize) {}
    fn done(&self, _job_id: JobId, _results: usize) {}
}

/// The staged research workflow for one job at a time.
///
/// Cheap to clone; every worker holds its own handle.
#[derive(Clone)]
pub struct ResearchPipeline {
    fetcher: EvidenceFetcher,
    extractor: Arc<dyn FieldExtractor>,
    verifier: Arc<LicenseVerifier>,
    history: Arc<HistoryAnalyzer>,
    scorer: Scorer,
    concurrency: usize,
    progress: Arc<dyn ProgressReporter>,
}

impl ResearchPipeline {
    pub fn new(
        fetcher: EvidenceFetcher,
        extractor: Arc<dyn FieldExtractor>,
        verifier: LicenseVerifier,
        history: HistoryAnalyzer,
        config: &ResearchConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            verifier: Arc::new(verifier),
            history: Arc::new(history),
            scorer: Scorer::new(config.scoring.clone()),
            concurrency: config.candidate_concurrency.max(1),
            progress: Arc::new(SilentProgress),
        }
    }

    /// Wire the HTTP providers named in `config`.
    ///
    /// A missing search key (or model key, when the model is enabled) is a
    /// `Config` error, reported before any job is accepted.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let research = ResearchConfig::from(config);
        let timeout = research.request_timeout_secs;

        let search = HttpSearchProvider::from_config(&config.search, timeout)?;
        let pages: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(timeout)?);
        let extractor = if config.openrouter.enabled {
            let model = OpenRouterModel::from_config(&config.openrouter, timeout)?;
            PageExtractor::with_model(Arc::new(model))
        } else {
            PageExtractor::new()
        };

        let verifier = LicenseVerifier::from_config(&config.licensing, timeout)?;
        if verifier.states().is_empty() {
            warn!("no license registries configured, license status will stay unverified");
        }

        let fetcher = EvidenceFetcher::new(
            Arc::new(search),
            Arc::clone(&pages),
            DiscoveryOptions::from(&research),
        );
        let history = HistoryAnalyzer::new(pages, research.history_lookback_years);

        Ok(Self::new(fetcher, Arc::new(extractor), verifier, history, &research))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every stage for `job_id` and return the ranked candidates.
    ///
    /// The job's cancellation flag is read from `store` at the entry of each
    /// stage. Per-source and per-candidate failures are absorbed; only
    /// cancellation, empty discovery and deduplication ambiguity fail the run.
    #[instrument(skip_all, fields(%job_id, trade = %query.trade, city = %query.city, state = %query.state))]
    pub async fn run(
        &self,
        job_id: JobId,
        query: &Query,
        store: &dyn JobStore,
    ) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        info!("starting research pipeline");

        // --- Stage 1: Discovery ---
        checkpoint(store, job_id, "discovery").await?;
        self.progress.phase(job_id, "Discovering evidence");
        let evidence = self.discover(job_id, query).await;
        if evidence.is_empty() {
            warn!("discovery returned no evidence");
            return Err(ScoutError::JobAbort(NO_EVIDENCE_MESSAGE.into()));
        }

        // --- Stage 2: Extraction ---
        checkpoint(store, job_id, "extraction").await?;
        self.progress.phase(job_id, "Extracting company details");
        let partials = self.extract(evidence).await;

        // --- Stage 3: Deduplication ---
        checkpoint(store, job_id, "deduplication").await?;
        self.progress.phase(job_id, "Merging candidates");
        let partial_count = partials.len();
        let candidates = dedup::merge(partials).map_err(|e| {
            error!(error = %e, "deduplication produced conflicting candidates");
            e
        })?;
        info!(partials = partial_count, candidates = candidates.len(), "deduplication completed");

        // --- Stage 4: License verification + history ---
        checkpoint(store, job_id, "verification").await?;
        self.progress.phase(job_id, "Verifying licenses and project history");
        let mut candidates = self.enrich(candidates, query).await;

        // --- Stage 5: Scoring ---
        checkpoint(store, job_id, "scoring").await?;
        self.progress.phase(job_id, "Scoring");
        self.scorer.rank(&mut candidates, query);

        info!(
            results = candidates.len(),
            top_score = candidates.first().and_then(|c| c.score),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "research pipeline completed"
        );
        self.progress.done(job_id, candidates.len());
        Ok(candidates)
    }

    /// Drain the discovery stream completely before anything downstream runs.
    async fn discover(&self, job_id: JobId, query: &Query) -> Vec<RawEvidence> {
        let mut discovery = self.fetcher.discover(query);
        let mut evidence = Vec::new();

        while let Some(raw) = discovery.next().await {
            evidence.push(raw);
            self.progress.evidence_found(job_id, evidence.len());
        }

        let report = discovery.finish().await;
        info!(
            evidence = evidence.len(),
            sources = report.sources,
            fetch_failures = report.failures.len(),
            "discovery completed"
        );
        evidence
    }

    /// Extract every piece of evidence, at most `concurrency` at a time.
    /// Records come back in evidence order; a failing source is skipped.
    async fn extract(&self, evidence: Vec<RawEvidence>) -> Vec<PartialCandidate> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, raw) in evidence.into_iter().enumerate() {
            let extractor = Arc::clone(&self.extractor);
            let sem = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let outcome = extractor.extract(&raw).await;
                (index, raw.source_url, outcome)
            });
        }

        let mut extracted = Vec::with_capacity(tasks.len());
        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, url, Ok(records))) => {
                    debug!(%url, records = records.len(), "evidence extracted");
                    extracted.push((index, records));
                }
                Ok((_, url, Err(e))) => {
                    failures += 1;
                    warn!(%url, error = %e, "extraction failed, skipping source");
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, "extraction task did not complete");
                }
            }
        }

        extracted.sort_by_key(|(index, _)| *index);
        let partials: Vec<PartialCandidate> =
            extracted.into_iter().flat_map(|(_, records)| records).collect();
        info!(partials = partials.len(), failures, "extraction completed");
        partials
    }

    /// Verify licenses and count project history for every candidate, at most
    /// `concurrency` candidates at a time. Completion order is not preserved.
    async fn enrich(&self, candidates: Vec<Candidate>, query: &Query) -> Vec<Candidate> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let verifier = Arc::clone(&self.verifier);
            let history = Arc::clone(&self.history);
            let sem = Arc::clone(&semaphore);
            let query = query.clone();
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await;
                enrich_candidate(candidate, &verifier, &history, &query).await
            });
        }

        let mut enriched = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(candidate) => enriched.push(candidate),
                Err(e) => warn!(error = %e, "enrichment task did not complete"),
            }
        }

        let verified = enriched.iter().filter(|c| c.lic_active.is_some()).count();
        let analyzed = enriched
            .iter()
            .filter(|c| c.relevant_project_count.is_some())
            .count();
        info!(candidates = enriched.len(), verified, analyzed, "verification completed");
        enriched
    }
}

/// Fail with [`CANCELLED_MESSAGE`] if the client asked to stop.
async fn checkpoint(store: &dyn JobStore, job_id: JobId, stage: &str) -> Result<()> {
    let job = store.get(job_id).await?;
    if job.cancel_requested {
        info!(stage, "cancellation observed");
        return Err(ScoutError::JobAbort(CANCELLED_MESSAGE.into()));
    }
    Ok(())
}

/// License lookup and history analysis run side by side. Either failing
/// leaves its fields unset; a license number read off a page is only kept
/// once a registry confirms it.
async fn enrich_candidate(
    mut candidate: Candidate,
    verifier: &LicenseVerifier,
    history: &HistoryAnalyzer,
    query: &Query,
) -> Candidate {
    let state = candidate
        .state
        .clone()
        .unwrap_or_else(|| query.state.clone());

    let (license, projects) = tokio::join!(
        verifier.verify(&candidate, &state),
        history.analyze(&candidate, query)
    );

    match license {
        Ok(Some(status)) => {
            candidate.lic_active = Some(status.lic_active);
            candidate.lic_number = Some(status.lic_number);
        }
        Ok(None) => {
            debug!(candidate = %candidate.name, "no matching license on record");
            candidate.lic_number = None;
        }
        Err(e) => {
            warn!(candidate = %candidate.name, error = %e, "license verification unavailable");
            candidate.lic_number = None;
        }
    }

    match projects {
        Ok(count) => candidate.relevant_project_count = Some(count),
        Err(e) => warn!(candidate = %candidate.name, error = %e, "project history unavailable"),
    }

    candidate
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use url::Url;

    use subscout_discovery::{SearchHit, SearchProvider, classify_source, normalize_url};
    use subscout_storage::MemoryJobStore;

    use super::*;
    use crate::license::tests::{StaticRegistry, candidate, record};

    /// Returns the same hits for every search string.
    pub(crate) struct FakeSearch(pub Vec<SearchHit>);

    #[async_trait]
    impl SearchProvider for FakeSearch {
        fn name(&self) -> &str {
            "fake"
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(self.0.clone())
        }
    }

    /// Serves fixture bodies by normalized URL, 404 for anything else.
    pub(crate) struct FakePages(pub HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for FakePages {
        async fn fetch(&self, url: &Url) -> Result<RawEvidence> {
            let key = normalize_url(url);
            match self.0.get(&key) {
                Some(body) => Ok(RawEvidence {
                    source_url: key,
                    fetched_at: Utc::now(),
                    kind: classify_source(url),
                    content: body.clone(),
                }),
                None => Err(ScoutError::fetch(key, "HTTP 404")),
            }
        }
    }

    pub(crate) fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/html/{name}"))
            .unwrap_or_else(|e| panic!("fixture {name}: {e}"))
    }

    pub(crate) fn query() -> Query {
        Query::new("mechanical", "Austin", "TX", 5_000_000, ["hotel", "commercial"]).unwrap()
    }

    pub(crate) fn hit(title: &str, link: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            link: link.into(),
            snippet: snippet.into(),
        }
    }

    pub(crate) fn scenario_pages() -> FakePages {
        FakePages(HashMap::from([
            ("https://xyzmechanical.com/about".to_string(), fixture("company_site.html")),
            ("https://xyzmechanical.com/projects".to_string(), fixture("projects.html")),
            (
                "https://www.bbb.org/us/tx/austin/category/hvac".to_string(),
                fixture("directory_listing.html"),
            ),
        ]))
    }

    pub(crate) fn build(hits: Vec<SearchHit>, extractor: Arc<dyn FieldExtractor>) -> ResearchPipeline {
        build_on(Arc::new(scenario_pages()), hits, extractor)
    }

    pub(crate) fn build_on(
        pages: Arc<dyn PageFetcher>,
        hits: Vec<SearchHit>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> ResearchPipeline {
        let config = ResearchConfig::default();
        let fetcher = EvidenceFetcher::new(
            Arc::new(FakeSearch(hits)),
            Arc::clone(&pages),
            DiscoveryOptions::from(&config),
        );
        let verifier = LicenseVerifier::new().with_registry(
            "TX",
            Arc::new(StaticRegistry(vec![record(
                "XYZ Mechanical",
                "TACLA00012345C",
                "Active",
            )])),
        );
        let history = HistoryAnalyzer::new(pages, 5).with_reference_year(2025);
        ResearchPipeline::new(fetcher, extractor, verifier, history, &config)
    }

    /// Austin mechanical scenario: one company page, one directory listing.
    pub(crate) fn scenario_pipeline() -> ResearchPipeline {
        build(
            vec![
                hit(
                    "XYZ Mechanical | About",
                    "https://xyzmechanical.com/about",
                    "Commercial HVAC contractor serving Austin, TX 78701.",
                ),
                hit(
                    "HVAC Contractors near Austin, TX | Better Business Bureau",
                    "https://www.bbb.org/us/tx/austin/category/hvac",
                    "Find BBB Accredited HVAC contractors near Austin.",
                ),
            ],
            Arc::new(PageExtractor::new()),
        )
    }

    #[tokio::test]
    async fn austin_scenario_ranks_verified_contractor_first() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();

        let results = scenario_pipeline()
            .run(job.job_id, &job.query, &store)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Candidate::has_evidence));
        assert!(results.windows(2).all(|w| w[0].rank_cmp(&w[1]).is_le()));

        let xyz = &results[0];
        assert_eq!(xyz.name, "XYZ Mechanical");
        assert_eq!(xyz.website.as_deref(), Some("https://xyzmechanical.com/"));
        assert_eq!(xyz.phone_number.as_deref(), Some("(512) 555-0100"));
        assert_eq!(xyz.bond_amount, Some(6_000_000));
        assert_eq!(xyz.lic_active, Some(true));
        assert_eq!(xyz.lic_number.as_deref(), Some("TACLA00012345C"));
        assert_eq!(xyz.relevant_project_count, Some(4));
        assert!(xyz.evidence_text.contains("bonding capacity"));
        assert!(xyz.score.unwrap() >= 90, "score was {:?}", xyz.score);

        let other = &results[1];
        assert_eq!(other.name, "Capital City Air");
        assert_eq!(other.lic_active, None);
        assert_eq!(other.relevant_project_count, None);
        assert!(other.score.unwrap() < 40);
    }

    #[tokio::test]
    async fn no_evidence_aborts() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();

        let err = build(Vec::new(), Arc::new(PageExtractor::new()))
            .run(job.job_id, &job.query, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::JobAbort(ref m) if m == NO_EVIDENCE_MESSAGE));
    }

    /// Extractor that finds nothing.
    struct BlindExtractor;

    #[async_trait]
    impl FieldExtractor for BlindExtractor {
        async fn extract(&self, _raw: &RawEvidence) -> Result<Vec<PartialCandidate>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn evidence_without_candidates_is_an_empty_success() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();

        let results = build(
            vec![hit("Air Conditioning FAQ", "https://xyzmechanical.com/about", "")],
            Arc::new(BlindExtractor),
        )
        .run(job.job_id, &job.query, &store)
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    /// Extractor that asks for cancellation the first time it runs.
    struct CancellingExtractor {
        store: Arc<MemoryJobStore>,
        job_id: JobId,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl FieldExtractor for CancellingExtractor {
        async fn extract(&self, raw: &RawEvidence) -> Result<Vec<PartialCandidate>> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            if first {
                self.store.request_cancel(self.job_id).await?;
            }
            PageExtractor::new().extract(raw).await
        }
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_next_stage() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create(query()).await.unwrap();
        let extractor = Arc::new(CancellingExtractor {
            store: Arc::clone(&store),
            job_id: job.job_id,
            calls: Mutex::new(0),
        });

        let pipeline = build(
            vec![hit(
                "XYZ Mechanical | About",
                "https://xyzmechanical.com/about",
                "Commercial HVAC contractor serving Austin, TX 78701.",
            )],
            extractor.clone(),
        );
        let err = pipeline
            .run(job.job_id, &job.query, store.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, ScoutError::JobAbort(ref m) if m == CANCELLED_MESSAGE));
        // Extraction finished before the flag was read at deduplication.
        assert!(*extractor.calls.lock().unwrap() > 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_no_work() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create(query()).await.unwrap();
        store.request_cancel(job.job_id).await.unwrap();

        let extractor = Arc::new(CancellingExtractor {
            store: Arc::clone(&store),
            job_id: job.job_id,
            calls: Mutex::new(0),
        });
        let err = build(Vec::new(), extractor.clone())
            .run(job.job_id, &job.query, store.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, ScoutError::JobAbort(ref m) if m == CANCELLED_MESSAGE));
        assert_eq!(*extractor.calls.lock().unwrap(), 0);
    }

    /// Slow page fetcher that records each completed fetch.
    struct SlowPages {
        inner: FakePages,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PageFetcher for SlowPages {
        async fn fetch(&self, url: &Url) -> Result<RawEvidence> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let page = self.inner.fetch(url).await;
            self.log.lock().unwrap().push(format!("fetch {url}"));
            page
        }
    }

    /// Extractor that records each call before delegating.
    struct LoggingExtractor {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FieldExtractor for LoggingExtractor {
        async fn extract(&self, raw: &RawEvidence) -> Result<Vec<PartialCandidate>> {
            self.log.lock().unwrap().push(format!("extract {}", raw.source_url));
            PageExtractor::new().extract(raw).await
        }
    }

    #[tokio::test]
    async fn discovery_completes_before_extraction_starts() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pages = Arc::new(SlowPages {
            inner: scenario_pages(),
            log: Arc::clone(&log),
        });
        let extractor = Arc::new(LoggingExtractor {
            log: Arc::clone(&log),
        });
        let hits = vec![hit(
            "XYZ Mechanical | About",
            "https://xyzmechanical.com/about",
            "Commercial HVAC contractor serving Austin, TX 78701.",
        )];
        let results = build_on(pages, hits, extractor)
            .run(job.job_id, &job.query, &store)
            .await
            .unwrap();
        assert!(!results.is_empty());

        // Project-history fetches come after extraction; none may land
        // between the first and last extract call.
        let log = log.lock().unwrap();
        let first_extract = log.iter().position(|e| e.starts_with("extract")).unwrap();
        let last_extract = log.iter().rposition(|e| e.starts_with("extract")).unwrap();
        assert!(log[..first_extract].iter().any(|e| e.starts_with("fetch")));
        assert!(
            log[first_extract..=last_extract].iter().all(|e| e.starts_with("extract")),
            "interleaved stages: {log:?}"
        );
    }

    /// Page fetcher that asks for cancellation while discovery is running.
    struct CancellingPages {
        inner: FakePages,
        store: Arc<MemoryJobStore>,
        job_id: JobId,
    }

    #[async_trait]
    impl PageFetcher for CancellingPages {
        async fn fetch(&self, url: &Url) -> Result<RawEvidence> {
            self.store.request_cancel(self.job_id).await?;
            self.inner.fetch(url).await
        }
    }

    #[tokio::test]
    async fn cancellation_during_discovery_skips_extraction() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create(query()).await.unwrap();
        let pages = Arc::new(CancellingPages {
            inner: scenario_pages(),
            store: Arc::clone(&store),
            job_id: job.job_id,
        });
        let extractor = Arc::new(CancellingExtractor {
            store: Arc::clone(&store),
            job_id: job.job_id,
            calls: Mutex::new(0),
        });
        let hits = vec![hit(
            "XYZ Mechanical | About",
            "https://xyzmechanical.com/about",
            "Commercial HVAC contractor serving Austin, TX 78701.",
        )];

        let err = build_on(pages, hits, extractor.clone())
            .run(job.job_id, &job.query, store.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, ScoutError::JobAbort(ref m) if m == CANCELLED_MESSAGE));
        assert_eq!(*extractor.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_license_number_is_cleared() {
        let verifier = LicenseVerifier::new().with_registry("TX", Arc::new(StaticRegistry(Vec::new())));
        let history = HistoryAnalyzer::new(Arc::new(FakePages(HashMap::new())), 5);

        let enriched = enrich_candidate(
            candidate("Lone Star Air", Some("TACLA00099999C")),
            &verifier,
            &history,
            &query(),
        )
        .await;
        assert_eq!(enriched.lic_active, None);
        assert_eq!(enriched.lic_number, None);
    }
}

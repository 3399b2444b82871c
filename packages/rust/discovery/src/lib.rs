//! Evidence discovery for research jobs.
//!
//! The [`EvidenceFetcher`] turns a [`Query`] into a lazily produced stream of
//! [`RawEvidence`]: search snippets first, then the pages behind them, then
//! company profile pages until the distinct-source target is met. It performs
//! network I/O only and never interprets content. Individual source failures
//! are recorded in the [`DiscoveryReport`] and skipped.

mod fetcher;
mod search;
mod sources;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};
use url::Url;

use subscout_shared::{Query, RawEvidence, ResearchConfig, Result, ScoutError, SourceKind};

pub use fetcher::{HttpPageFetcher, is_ssrf_target};
pub use search::{HttpSearchProvider, SearchHit, search_queries};
pub use sources::{classify_source, host_key, is_directory_host, is_regulatory_host, normalize_url};

/// Company profile pages tried when search alone falls short of the target.
pub const DEFAULT_PROFILE_PATHS: &[&str] = &[
    "/about",
    "/about-us",
    "/contact",
    "/contact-us",
    "/services",
    "/projects",
    "/portfolio",
];

// ---------------------------------------------------------------------------
// Capability contracts
// ---------------------------------------------------------------------------

/// A web search capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Run one search string and return its organic hits.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// A page-content capability. Implementations must not parse the body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<RawEvidence>;
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Configuration for a discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Soft floor of distinct source URLs.
    pub target_sources: usize,
    /// Simultaneous page fetches.
    pub concurrency: usize,
    /// Paths appended to company-site origins when below target.
    pub profile_paths: Vec<String>,
    /// Evidence buffered ahead of the consumer.
    pub channel_capacity: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&ResearchConfig::default())
    }
}

impl From<&ResearchConfig> for DiscoveryOptions {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            target_sources: config.discovery_target,
            concurrency: config.candidate_concurrency.max(1),
            profile_paths: DEFAULT_PROFILE_PATHS.iter().map(|p| p.to_string()).collect(),
            channel_capacity: 32,
        }
    }
}

/// Summary of a completed discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Distinct source URLs emitted.
    pub sources: usize,
    /// Failed searches and fetches (source, error message).
    pub failures: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Discovery stream
// ---------------------------------------------------------------------------

/// Consumer end of a running discovery pass.
///
/// Dropping it (or calling [`Discovery::finish`] early) stops the producer at
/// its next send.
pub struct Discovery {
    rx: mpsc::Receiver<RawEvidence>,
    producer: JoinHandle<DiscoveryReport>,
}

impl Discovery {
    /// Next piece of evidence, or `None` once the pass is exhausted.
    pub async fn next(&mut self) -> Option<RawEvidence> {
        self.rx.recv().await
    }

    /// Stop consuming and wait for the producer's report.
    pub async fn finish(mut self) -> DiscoveryReport {
        self.rx.close();
        while self.rx.recv().await.is_some() {}

        match self.producer.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "discovery task did not complete");
                DiscoveryReport {
                    sources: 0,
                    failures: vec![("discovery".into(), e.to_string())],
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EvidenceFetcher
// ---------------------------------------------------------------------------

/// Retrieves raw evidence through the search and page capabilities.
#[derive(Clone)]
pub struct EvidenceFetcher {
    search: Arc<dyn SearchProvider>,
    pages: Arc<dyn PageFetcher>,
    opts: DiscoveryOptions,
}

impl EvidenceFetcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        pages: Arc<dyn PageFetcher>,
        opts: DiscoveryOptions,
    ) -> Self {
        Self {
            search,
            pages,
            opts,
        }
    }

    /// The page capability, shared with later stages.
    pub fn pages(&self) -> Arc<dyn PageFetcher> {
        Arc::clone(&self.pages)
    }

    /// Fetch a single URL.
    pub async fn fetch(&self, url: &str) -> Result<RawEvidence> {
        let parsed =
            Url::parse(url).map_err(|e| ScoutError::fetch(url, format!("invalid URL: {e}")))?;
        self.pages.fetch(&parsed).await
    }

    /// Start a discovery pass for `query` on a background task.
    pub fn discover(&self, query: &Query) -> Discovery {
        let (tx, rx) = mpsc::channel(self.opts.channel_capacity.max(1));
        let pass = DiscoveryPass {
            search: Arc::clone(&self.search),
            pages: Arc::clone(&self.pages),
            opts: self.opts.clone(),
            tx,
            emitted: HashSet::new(),
            attempted: HashSet::new(),
            failures: Vec::new(),
        };
        let producer = tokio::spawn(pass.run(query.clone()));
        Discovery { rx, producer }
    }
}

/// The consumer went away; stop producing.
struct Closed;

/// Producer-side state of one discovery pass.
struct DiscoveryPass {
    search: Arc<dyn SearchProvider>,
    pages: Arc<dyn PageFetcher>,
    opts: DiscoveryOptions,
    tx: mpsc::Sender<RawEvidence>,
    /// Normalized URLs already sent.
    emitted: HashSet<String>,
    /// Normalized URLs whose page fetch was already started.
    attempted: HashSet<String>,
    failures: Vec<(String, String)>,
}

impl DiscoveryPass {
    #[instrument(skip_all, fields(trade = %query.trade, city = %query.city, state = %query.state))]
    async fn run(mut self, query: Query) -> DiscoveryReport {
        if self.drive(&query).await.is_err() {
            debug!("consumer dropped, discovery stopped early");
        }

        let report = DiscoveryReport {
            sources: self.emitted.len(),
            failures: self.failures,
        };

        if report.sources < self.opts.target_sources {
            warn!(
                sources = report.sources,
                target = self.opts.target_sources,
                "discovery fell short of source target"
            );
        }
        info!(
            sources = report.sources,
            failures = report.failures.len(),
            "discovery completed"
        );
        report
    }

    async fn drive(&mut self, query: &Query) -> std::result::Result<(), Closed> {
        let hits = self.run_searches(query).await;

        let mut hit_pages = Vec::new();
        for hit in hits {
            let url = match Url::parse(&hit.link) {
                Ok(url) => url,
                Err(e) => {
                    self.failures.push((hit.link.clone(), format!("invalid URL: {e}")));
                    continue;
                }
            };
            let key = normalize_url(&url);
            if self.emitted.contains(&key) {
                continue;
            }

            let content = if hit.snippet.is_empty() {
                hit.title.clone()
            } else {
                format!("{}\n{}", hit.title, hit.snippet)
            };
            self.emit(RawEvidence {
                source_url: key,
                fetched_at: Utc::now(),
                kind: SourceKind::SearchSnippet,
                content,
            })
            .await?;
            hit_pages.push(url);
        }

        self.fetch_all(hit_pages.clone()).await?;

        if self.emitted.len() >= self.opts.target_sources {
            return Ok(());
        }

        let expansion = self.profile_urls(&hit_pages);
        debug!(
            candidates = expansion.len(),
            sources = self.emitted.len(),
            "expanding company profile pages"
        );
        for chunk in expansion.chunks(self.opts.concurrency.max(1)) {
            if self.emitted.len() >= self.opts.target_sources {
                break;
            }
            self.fetch_all(chunk.to_vec()).await?;
        }
        Ok(())
    }

    /// Run every derived search concurrently; hits come back in query order.
    async fn run_searches(&mut self, query: &Query) -> Vec<SearchHit> {
        let queries = search_queries(query);
        let mut tasks = JoinSet::new();
        for (idx, q) in queries.into_iter().enumerate() {
            let provider = Arc::clone(&self.search);
            tasks.spawn(async move {
                let result = provider.search(&q).await;
                (idx, q, result)
            });
        }

        let mut batches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, _, Ok(hits))) => batches.push((idx, hits)),
                Ok((_, q, Err(e))) => {
                    warn!(provider = self.search.name(), query = %q, error = %e, "search failed, skipping");
                    self.failures.push((format!("search: {q}"), e.to_string()));
                }
                Err(e) => self.failures.push(("search task".into(), e.to_string())),
            }
        }
        batches.sort_by_key(|(idx, _)| *idx);

        let hits: Vec<SearchHit> = batches.into_iter().flat_map(|(_, hits)| hits).collect();
        info!(provider = self.search.name(), hits = hits.len(), "searches completed");
        hits
    }

    /// Profile URLs for each distinct company-site origin, path-major.
    fn profile_urls(&self, pages: &[Url]) -> Vec<Url> {
        let mut origins: Vec<Url> = Vec::new();
        for page in pages {
            if classify_source(page) != SourceKind::CompanySite {
                continue;
            }
            let Ok(origin) = page.join("/") else { continue };
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }

        self.opts
            .profile_paths
            .iter()
            .flat_map(|path| origins.iter().filter_map(move |o| o.join(path).ok()))
            .filter(|url| !self.attempted.contains(&normalize_url(url)))
            .collect()
    }

    /// Fetch pages under the concurrency bound, emitting each as it lands.
    async fn fetch_all(&mut self, urls: Vec<Url>) -> std::result::Result<(), Closed> {
        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for url in urls {
            if !self.attempted.insert(normalize_url(&url)) {
                continue;
            }
            let pages = Arc::clone(&self.pages);
            let sem = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let result = pages.fetch(&url).await;
                (url, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(evidence))) => self.emit(evidence).await?,
                Ok((url, Err(e))) => {
                    warn!(%url, error = %e, "source fetch failed, skipping");
                    self.failures.push((url.to_string(), e.to_string()));
                }
                Err(e) => self.failures.push(("fetch task".into(), e.to_string())),
            }
        }
        Ok(())
    }

    async fn emit(&mut self, evidence: RawEvidence) -> std::result::Result<(), Closed> {
        self.emitted.insert(evidence.source_url.clone());
        self.tx.send(evidence).await.map_err(|_| Closed)
    }
}

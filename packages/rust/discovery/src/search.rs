//! Search query derivation and the Custom-Search-style HTTP provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use subscout_shared::{Query, Result, ScoutError, SearchConfig, read_secret};

use crate::SearchProvider;
use crate::fetcher::build_client;

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// The search strings issued for a query: two generic ones, then one per keyword.
pub fn search_queries(query: &Query) -> Vec<String> {
    let Query {
        trade, city, state, ..
    } = query;

    let mut queries = vec![
        format!("{trade} contractors {city} {state}"),
        format!("{trade} subcontractors {city} {state}"),
    ];
    queries.extend(
        query
            .keywords
            .iter()
            .map(|kw| format!("{trade} {kw} contractors {city} {state}")),
    );
    queries
}

// ---------------------------------------------------------------------------
// HttpSearchProvider
// ---------------------------------------------------------------------------

/// Search provider for a JSON endpoint answering
/// `GET ?key=&cx=&q=&num=` with `{"items": [{title, link, snippet}]}`.
#[derive(Debug, Clone)]
pub struct HttpSearchProvider {
    client: Client,
    endpoint: Url,
    api_key: String,
    engine_id: Option<String>,
    results_per_query: u32,
}

impl HttpSearchProvider {
    pub fn new(endpoint: &str, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ScoutError::config(format!("invalid search endpoint '{endpoint}': {e}")))?;
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint,
            api_key: api_key.into(),
            engine_id: None,
            results_per_query: 10,
        })
    }

    /// Build from the `[search]` config section, reading the key from the environment.
    pub fn from_config(config: &SearchConfig, timeout_secs: u64) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env, "search API key")?;
        let mut provider = Self::new(&config.endpoint, api_key, timeout_secs)?
            .with_results_per_query(config.results_per_query);
        if let Some(id) = &config.engine_id {
            provider = provider.with_engine_id(id.clone());
        }
        Ok(provider)
    }

    pub fn with_engine_id(mut self, engine_id: impl Into<String>) -> Self {
        self.engine_id = Some(engine_id.into());
        self
    }

    pub fn with_results_per_query(mut self, n: u32) -> Self {
        self.results_per_query = n.max(1);
        self
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "http-search"
    }

    #[instrument(skip_all, fields(q = %query))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("q", query.to_string()),
            ("num", self.results_per_query.to_string()),
        ];
        if let Some(cx) = &self.engine_id {
            params.push(("cx", cx.clone()));
        }

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&params)
            .send()
            .await
            .map_err(|e| ScoutError::fetch(self.endpoint.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::fetch(
                self.endpoint.as_str(),
                format!("search returned HTTP {status}"),
            ));
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            ScoutError::fetch(self.endpoint.as_str(), format!("malformed search response: {e}"))
        })?;

        debug!(hits = body.items.len(), "search completed");
        Ok(body.items)
    }
}

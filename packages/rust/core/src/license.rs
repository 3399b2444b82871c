//! License verification against per-state regulatory registries.
//!
//! A lookup that fails or finds no matching holder leaves the candidate's
//! license fields unset. Only a registry answer sets `lic_active`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use subscout_shared::{Candidate, LicensingConfig, Result, ScoutError, state_code};

use crate::dedup::normalize_name;

const USER_AGENT: &str = concat!("subscout/", env!("CARGO_PKG_VERSION"));

/// Registry status strings that mean the license is in good standing.
const ACTIVE_STATUSES: &[&str] = &["active", "current", "valid", "issued", "clear"];

/// One license as reported by a registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LicenseRecord {
    #[serde(alias = "holder", alias = "business_name")]
    pub name: String,
    #[serde(alias = "license", alias = "lic_number", alias = "number")]
    pub license_number: String,
    pub status: String,
}

impl LicenseRecord {
    pub fn is_active(&self) -> bool {
        let status = self.status.trim().to_ascii_lowercase();
        ACTIVE_STATUSES
            .iter()
            .any(|s| status == *s || status.starts_with(&format!("{s} ")))
    }
}

/// Verified license state for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseStatus {
    pub lic_active: bool,
    pub lic_number: String,
}

/// A state's regulatory license lookup.
#[async_trait]
pub trait LicenseRegistry: Send + Sync {
    /// Name of the licensing body, for logs.
    fn authority(&self) -> &str;

    /// Licenses matching a business name or license number.
    async fn lookup(&self, name: &str, lic_number: Option<&str>) -> Result<Vec<LicenseRecord>>;
}

// ---------------------------------------------------------------------------
// LicenseVerifier
// ---------------------------------------------------------------------------

/// Routes lookups to the registry of the candidate's state.
#[derive(Clone, Default)]
pub struct LicenseVerifier {
    registries: HashMap<String, Arc<dyn LicenseRegistry>>,
}

impl LicenseVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `registry` for `state` (code or full name).
    pub fn with_registry(mut self, state: &str, registry: Arc<dyn LicenseRegistry>) -> Self {
        let key = state_code(state)
            .map(str::to_string)
            .unwrap_or_else(|| state.trim().to_ascii_uppercase());
        self.registries.insert(key, registry);
        self
    }

    /// One [`HttpLicenseRegistry`] per `[licensing.registries.<ST>]` entry.
    pub fn from_config(config: &LicensingConfig, timeout_secs: u64) -> Result<Self> {
        let mut verifier = Self::new();
        for (state, entry) in &config.registries {
            let authority = entry
                .authority
                .clone()
                .unwrap_or_else(|| format!("{} licensing registry", state.to_ascii_uppercase()));
            let registry = HttpLicenseRegistry::new(&entry.endpoint, authority, timeout_secs)?;
            verifier = verifier.with_registry(state, Arc::new(registry));
        }
        Ok(verifier)
    }

    /// States with a configured registry.
    pub fn states(&self) -> Vec<&str> {
        let mut states: Vec<&str> = self.registries.keys().map(String::as_str).collect();
        states.sort_unstable();
        states
    }

    /// Look the candidate up in `state`'s registry.
    ///
    /// `Ok(None)` means the registry answered but holds no matching license.
    #[instrument(skip_all, fields(candidate = %candidate.name, state = %state))]
    pub async fn verify(&self, candidate: &Candidate, state: &str) -> Result<Option<LicenseStatus>> {
        let code = state_code(state).unwrap_or(state).to_ascii_uppercase();
        let registry = self.registries.get(&code).ok_or_else(|| {
            ScoutError::verification_unavailable(&code, "no registry configured")
        })?;

        let records = registry
            .lookup(&candidate.name, candidate.lic_number.as_deref())
            .await
            .map_err(|e| match e {
                ScoutError::VerificationUnavailable { .. } => e,
                other => ScoutError::verification_unavailable(&code, other.to_string()),
            })?;

        let wanted_name = normalize_name(&candidate.name);
        let wanted_number = candidate
            .lic_number
            .as_deref()
            .map(|n| n.trim().to_ascii_uppercase());

        let matched = records.into_iter().find(|r| {
            normalize_name(&r.name) == wanted_name
                || wanted_number
                    .as_deref()
                    .is_some_and(|n| r.license_number.trim().eq_ignore_ascii_case(n))
        });

        debug!(
            authority = registry.authority(),
            matched = matched.is_some(),
            "registry lookup completed"
        );

        Ok(matched.map(|r| LicenseStatus {
            lic_active: r.is_active(),
            lic_number: r.license_number.trim().to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// HttpLicenseRegistry
// ---------------------------------------------------------------------------

/// A registry exposed as a JSON endpoint taking `name` and `license` query
/// parameters and answering `{"results": [...]}` or a bare array.
#[derive(Debug, Clone)]
pub struct HttpLicenseRegistry {
    client: Client,
    endpoint: String,
    authority: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryResponse {
    Wrapped { results: Vec<LicenseRecord> },
    Bare(Vec<LicenseRecord>),
}

impl HttpLicenseRegistry {
    pub fn new(endpoint: &str, authority: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScoutError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            authority: authority.into(),
        })
    }
}

#[async_trait]
impl LicenseRegistry for HttpLicenseRegistry {
    fn authority(&self) -> &str {
        &self.authority
    }

    async fn lookup(&self, name: &str, lic_number: Option<&str>) -> Result<Vec<LicenseRecord>> {
        let mut params = vec![("name", name)];
        if let Some(number) = lic_number {
            params.push(("license", number));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| ScoutError::fetch(&self.endpoint, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::fetch(&self.endpoint, format!("HTTP {status}")));
        }

        let body: RegistryResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::fetch(&self.endpoint, format!("malformed registry response: {e}")))?;

        Ok(match body {
            RegistryResponse::Wrapped { results } => results,
            RegistryResponse::Bare(records) => records,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;
    use subscout_shared::SourceKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Registry answering from a fixed list.
    pub(crate) struct StaticRegistry(pub Vec<LicenseRecord>);

    #[async_trait]
    impl LicenseRegistry for StaticRegistry {
        fn authority(&self) -> &str {
            "static"
        }

        async fn lookup(&self, _name: &str, _lic: Option<&str>) -> Result<Vec<LicenseRecord>> {
            Ok(self.0.clone())
        }
    }

    pub(crate) fn record(name: &str, number: &str, status: &str) -> LicenseRecord {
        LicenseRecord {
            name: name.into(),
            license_number: number.into(),
            status: status.into(),
        }
    }

    pub(crate) fn candidate(name: &str, lic: Option<&str>) -> Candidate {
        Candidate {
            id: "0".into(),
            name: name.into(),
            website: None,
            email: None,
            phone_number: None,
            city: None,
            state: Some("TX".into()),
            lic_active: None,
            lic_number: lic.map(str::to_string),
            bond_amount: None,
            relevant_project_count: None,
            evidence_url: "https://example.com".into(),
            evidence_text: name.into(),
            evidence_kind: SourceKind::CompanySite,
            source_urls: Vec::new(),
            score: None,
            last_checked: Utc::now(),
        }
    }

    #[test]
    fn status_words() {
        assert!(record("a", "1", "Active").is_active());
        assert!(record("a", "1", "CURRENT").is_active());
        assert!(!record("a", "1", "Expired").is_active());
        assert!(!record("a", "1", "Inactive").is_active());
    }

    #[tokio::test]
    async fn matches_by_normalized_name_or_number() {
        let verifier = LicenseVerifier::new().with_registry(
            "Texas",
            Arc::new(StaticRegistry(vec![
                record("Other Air LLC", "TACLA999", "Active"),
                record("XYZ MECHANICAL, INC.", "TACLA00012345C", "Expired"),
            ])),
        );

        let status = verifier
            .verify(&candidate("XYZ Mechanical", None), "TX")
            .await
            .unwrap()
            .unwrap();
        assert!(!status.lic_active);
        assert_eq!(status.lic_number, "TACLA00012345C");

        let by_number = verifier
            .verify(&candidate("Renamed Co", Some("tacla999")), "tx")
            .await
            .unwrap()
            .unwrap();
        assert!(by_number.lic_active);

        assert!(
            verifier
                .verify(&candidate("Nobody", None), "TX")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unmapped_state_is_unavailable() {
        let verifier = LicenseVerifier::new();
        let err = verifier.verify(&candidate("XYZ", None), "NV").await.unwrap_err();
        assert!(matches!(err, ScoutError::VerificationUnavailable { ref state, .. } if state == "NV"));
    }

    #[tokio::test]
    async fn http_registry_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .and(query_param("name", "XYZ Mechanical"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"holder": "XYZ Mechanical", "license": "TACLA00012345C", "status": "Active"}
                ]
            })))
            .mount(&server)
            .await;

        let registry =
            HttpLicenseRegistry::new(&format!("{}/lookup", server.uri()), "TDLR", 5).unwrap();
        let verifier = LicenseVerifier::new().with_registry("TX", Arc::new(registry));

        let status = verifier
            .verify(&candidate("XYZ Mechanical", None), "TX")
            .await
            .unwrap()
            .unwrap();
        assert!(status.lic_active);
        assert_eq!(status.lic_number, "TACLA00012345C");
    }

    #[tokio::test]
    async fn http_registry_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = HttpLicenseRegistry::new(&server.uri(), "TDLR", 5).unwrap();
        let verifier = LicenseVerifier::new().with_registry("TX", Arc::new(registry));
        let err = verifier
            .verify(&candidate("XYZ Mechanical", None), "TX")
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::VerificationUnavailable { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn verifier_from_config() {
        let config: LicensingConfig = toml::from_str(
            "[registries.TX]\nendpoint = \"https://registry.example.gov/lookup\"\n",
        )
        .unwrap();
        let verifier = LicenseVerifier::from_config(&config, 5).unwrap();
        assert_eq!(verifier.states(), vec!["TX"]);
    }
}

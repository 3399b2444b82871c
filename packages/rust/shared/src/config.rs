//! Application configuration for subscout.
//!
//! User config lives at `~/.subscout/subscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "subscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".subscout";

// ---------------------------------------------------------------------------
// Config structs (matching subscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline limits and windows.
    #[serde(default)]
    pub research: ResearchDefaults,

    /// Scoring weights table.
    #[serde(default)]
    pub scoring: ScoringWeights,

    /// Search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// OpenRouter settings for field extraction.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Per-state license registries.
    #[serde(default)]
    pub licensing: LicensingConfig,

    /// Job store backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDefaults {
    /// Soft floor of distinct sources per discovery pass.
    #[serde(default = "default_discovery_target")]
    pub discovery_target: usize,

    /// Simultaneous outbound calls per job.
    #[serde(default = "default_candidate_concurrency")]
    pub candidate_concurrency: usize,

    /// Worker tasks consuming the job queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Relevant-history lookback window, in years.
    #[serde(default = "default_lookback")]
    pub history_lookback_years: u32,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ResearchDefaults {
    fn default() -> Self {
        Self {
            discovery_target: default_discovery_target(),
            candidate_concurrency: default_candidate_concurrency(),
            workers: default_workers(),
            history_lookback_years: default_lookback(),
            request_timeout_secs: default_timeout(),
        }
    }
}

fn default_discovery_target() -> usize {
    20
}
fn default_candidate_concurrency() -> usize {
    4
}
fn default_workers() -> usize {
    2
}
fn default_lookback() -> u32 {
    5
}
fn default_timeout() -> u64 {
    10
}

/// `[scoring]` section: `{factor: weight}` pairs.
///
/// | factor | meaning |
/// |---|---|
/// | `license_active` | points for a confirmed active license |
/// | `license_unknown` | points when license status could not be verified |
/// | `bond_met` | points when bonding capacity meets `min_bond` |
/// | `bond_unmet_penalty` | points subtracted when a known bond is below `min_bond` |
/// | `projects` | points at `project_cap` relevant projects, linear below |
/// | `project_cap` | project count past which no further points accrue |
/// | `keyword_match` | points scaled by the fraction of keywords in the evidence |
/// | `location_match` | full for a city match, half for state only |
/// | `license_inactive_cap` | an inactive license keeps the score strictly below this |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_license_active")]
    pub license_active: u32,
    #[serde(default = "default_license_unknown")]
    pub license_unknown: u32,
    #[serde(default = "default_bond_met")]
    pub bond_met: u32,
    #[serde(default = "default_bond_unmet_penalty")]
    pub bond_unmet_penalty: u32,
    #[serde(default = "default_projects")]
    pub projects: u32,
    #[serde(default = "default_project_cap")]
    pub project_cap: u32,
    #[serde(default = "default_keyword_match")]
    pub keyword_match: u32,
    #[serde(default = "default_location_match")]
    pub location_match: u32,
    #[serde(default = "default_inactive_cap")]
    pub license_inactive_cap: u8,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            license_active: default_license_active(),
            license_unknown: default_license_unknown(),
            bond_met: default_bond_met(),
            bond_unmet_penalty: default_bond_unmet_penalty(),
            projects: default_projects(),
            project_cap: default_project_cap(),
            keyword_match: default_keyword_match(),
            location_match: default_location_match(),
            license_inactive_cap: default_inactive_cap(),
        }
    }
}

impl ScoringWeights {
    /// The weights as `(factor, weight)` pairs, in table order.
    pub fn as_pairs(&self) -> Vec<(&'static str, u32)> {
        vec![
            ("license_active", self.license_active),
            ("license_unknown", self.license_unknown),
            ("bond_met", self.bond_met),
            ("bond_unmet_penalty", self.bond_unmet_penalty),
            ("projects", self.projects),
            ("project_cap", self.project_cap),
            ("keyword_match", self.keyword_match),
            ("location_match", self.location_match),
            ("license_inactive_cap", u32::from(self.license_inactive_cap)),
        ]
    }
}

fn default_license_active() -> u32 {
    30
}
fn default_license_unknown() -> u32 {
    10
}
fn default_bond_met() -> u32 {
    25
}
fn default_bond_unmet_penalty() -> u32 {
    10
}
fn default_projects() -> u32 {
    25
}
fn default_project_cap() -> u32 {
    4
}
fn default_keyword_match() -> u32 {
    15
}
fn default_location_match() -> u32 {
    5
}
fn default_inactive_cap() -> u8 {
    40
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Custom-Search-compatible JSON endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search engine identifier (`cx`), if the provider needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,

    /// Results requested per search query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            engine_id: None,
            results_per_query: default_results_per_query(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_search_key_env() -> String {
    "SUBSCOUT_SEARCH_API_KEY".into()
}
fn default_results_per_query() -> u32 {
    10
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Whether to use the model for extraction fallback at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for field extraction.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[licensing]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// Registry endpoint per upper-cased state code.
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryEntry>,
}

/// `[licensing.registries.<ST>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// JSON lookup endpoint for the state's licensing body.
    pub endpoint: String,
    /// Display name of the licensing body (e.g. "TDLR").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file; in-memory store when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Research config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Soft floor of distinct sources per discovery pass.
    pub discovery_target: usize,
    /// Simultaneous outbound calls per job.
    pub candidate_concurrency: usize,
    /// Worker tasks consuming the job queue.
    pub workers: usize,
    /// Relevant-history lookback window, in years.
    pub history_lookback_years: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Scoring weights table.
    pub scoring: ScoringWeights,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResearchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            discovery_target: config.research.discovery_target,
            candidate_concurrency: config.research.candidate_concurrency.max(1),
            workers: config.research.workers.max(1),
            history_lookback_years: config.research.history_lookback_years,
            request_timeout_secs: config.research.request_timeout_secs,
            scoring: config.scoring.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.subscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.subscout/subscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScoutError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ScoutError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a non-empty secret from the env var named `var_name`.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ScoutError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the OpenRouter API key env var is set when extraction needs it.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if !config.openrouter.enabled {
        return Ok(());
    }
    read_secret(&config.openrouter.api_key_env, "OpenRouter API key").map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("discovery_target"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("license_inactive_cap"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.research.discovery_target, 20);
        assert_eq!(parsed.research.history_lookback_years, 5);
        assert_eq!(parsed.scoring, ScoringWeights::default());
    }

    #[test]
    fn config_with_registries_and_weights() {
        let toml_str = r#"
[research]
candidate_concurrency = 8

[scoring]
keyword_match = 20
license_inactive_cap = 30

[licensing.registries.TX]
endpoint = "https://registry.example.gov/lookup"
authority = "TDLR"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.research.candidate_concurrency, 8);
        assert_eq!(config.research.discovery_target, 20);
        assert_eq!(config.scoring.keyword_match, 20);
        assert_eq!(config.scoring.license_active, 30);
        assert_eq!(config.scoring.license_inactive_cap, 30);
        let tx = &config.licensing.registries["TX"];
        assert_eq!(tx.authority.as_deref(), Some("TDLR"));
    }

    #[test]
    fn research_config_from_app_config() {
        let mut app = AppConfig::default();
        app.research.candidate_concurrency = 0;
        let research = ResearchConfig::from(&app);
        assert_eq!(research.discovery_target, 20);
        assert_eq!(research.candidate_concurrency, 1);
        assert_eq!(research.scoring.project_cap, 4);
    }

    #[test]
    fn weights_table_lists_every_factor() {
        let pairs = ScoringWeights::default().as_pairs();
        assert_eq!(pairs.len(), 9);
        assert!(pairs.contains(&("license_inactive_cap", 40)));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "SUBSCOUT_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        config.openrouter.enabled = false;
        assert!(validate_api_key(&config).is_ok());
    }
}

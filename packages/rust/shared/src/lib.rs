//! Shared types, error model, and configuration for subscout.
//!
//! This crate is the foundation depended on by all other subscout crates.
//! It provides:
//! - [`ScoutError`], the unified error type
//! - Domain types ([`Query`], [`Candidate`], [`Job`], [`JobView`], [`RawEvidence`])
//! - Configuration ([`AppConfig`], [`ResearchConfig`], config loading)

pub mod config;
pub mod error;
pub mod geo;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LicensingConfig, OpenRouterConfig, RegistryEntry, ResearchConfig, ResearchDefaults,
    ScoringWeights, SearchConfig, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, read_secret, validate_api_key,
};
pub use error::{Result, ScoutError};
pub use geo::{state_code, state_name};
pub use types::{
    Candidate, Job, JobId, JobPayload, JobStatus, JobView, PartialCandidate, Query, RawEvidence,
    ResultRecord, SourceKind,
};

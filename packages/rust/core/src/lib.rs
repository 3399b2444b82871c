//! Research orchestration and candidate domain logic for subscout.
//!
//! This crate ties evidence discovery and field extraction together with
//! deduplication, license verification, project-history analysis and scoring,
//! and runs the result as asynchronous jobs over a [`JobStore`].
//!
//! [`JobStore`]: subscout_storage::JobStore

pub mod dedup;
pub mod history;
pub mod license;
pub mod pipeline;
pub mod report;
pub mod scorer;
pub mod worker;

pub use history::HistoryAnalyzer;
pub use license::{HttpLicenseRegistry, LicenseRecord, LicenseRegistry, LicenseStatus, LicenseVerifier};
pub use pipeline::{ProgressReporter, ResearchPipeline, SilentProgress};
pub use scorer::Scorer;
pub use worker::{Recovery, ResearchService, WorkerPool};

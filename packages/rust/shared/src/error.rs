//! Error types for subscout.
//!
//! Library crates use [`ScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Most variants are absorbed at the stage that produced them (a failed fetch
//! skips one source, a failed verification leaves license fields unset). Only
//! [`ScoutError::JobAbort`] and infrastructure faults end a job as `FAILED`.

use std::path::PathBuf;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all subscout operations.
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A single source could not be retrieved.
    #[error("fetch error: {url}: {message}")]
    Fetch { url: String, message: String },

    /// Raw content could not be turned into candidate fields.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// The regulatory source for a state could not answer.
    #[error("license verification unavailable for {state}: {message}")]
    VerificationUnavailable { state: String, message: String },

    /// Two different merge keys collapsed onto the same candidate id.
    #[error("deduplication ambiguity: {0}")]
    DeduplicationAmbiguity(String),

    /// Pipeline-wide failure; the job ends as `FAILED`.
    #[error("job aborted: {0}")]
    JobAbort(String),

    /// No job with this id exists in the store.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The requested status change violates the job state machine.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (bad query, malformed payload, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScoutError>;

impl ScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error for `url`.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a verification-unavailable error for `state`.
    pub fn verification_unavailable(state: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::VerificationUnavailable {
            state: state.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

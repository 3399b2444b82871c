//! Job store: research job records and their lifecycle state.
//!
//! Two backends implement [`JobStore`]:
//! - [`MemoryJobStore`]: process-local, used by one-shot CLI runs and tests
//! - [`LibsqlJobStore`]: libSQL file database that survives restarts
//!
//! Both enforce the same state machine through [`apply_transition`]:
//! `QUEUED -> RUNNING -> SUCCEEDED | FAILED`, terminal states immutable.
//! Reads always return owned copies.

mod database;
mod migrations;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use subscout_shared::{Candidate, Job, JobId, JobPayload, JobStatus, Query, Result, ScoutError};

pub use database::LibsqlJobStore;

/// Persistent or in-process holder of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new `QUEUED` job for `query`.
    async fn create(&self, query: Query) -> Result<Job>;

    /// Fetch a job, or [`ScoutError::NotFound`].
    async fn get(&self, job_id: JobId) -> Result<Job>;

    /// Move a job to `status`. Rejects edges the state machine does not have
    /// and payloads that do not fit the target status.
    async fn transition(&self, job_id: JobId, status: JobStatus, payload: JobPayload)
    -> Result<Job>;

    /// Set the cooperative cancellation flag. A no-op on terminal jobs.
    async fn request_cancel(&self, job_id: JobId) -> Result<Job>;

    /// Jobs in `status` (all jobs when `None`), oldest first.
    async fn list_by_status(&self, status: Option<JobStatus>) -> Result<Vec<Job>>;
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Apply a status change to `job` in place, or leave it untouched and return
/// the reason the change is not allowed.
pub fn apply_transition(job: &mut Job, next: JobStatus, payload: JobPayload) -> Result<()> {
    if !job.status.can_transition_to(next) {
        return Err(ScoutError::InvalidTransition {
            job_id: job.job_id,
            from: job.status,
            to: next,
        });
    }

    match (next, payload) {
        (JobStatus::Running, JobPayload::Empty) => {}
        (JobStatus::Succeeded, JobPayload::Results(results)) => {
            validate_results(&results)?;
            job.results = results;
        }
        (JobStatus::Failed, JobPayload::Error(message)) => {
            if message.trim().is_empty() {
                return Err(ScoutError::validation("a failed job needs an error message"));
            }
            job.error = Some(message);
        }
        (status, payload) => {
            return Err(ScoutError::validation(format!(
                "{} payload does not fit a transition to {status}",
                payload_kind(&payload)
            )));
        }
    }

    job.status = next;
    job.updated_at = Utc::now();
    Ok(())
}

/// Every stored result carries evidence and the list is in rank order.
fn validate_results(results: &[Candidate]) -> Result<()> {
    if let Some(bare) = results.iter().find(|c| !c.has_evidence()) {
        return Err(ScoutError::validation(format!(
            "candidate '{}' has no evidence",
            bare.name
        )));
    }
    if let Some(pair) = results
        .windows(2)
        .find(|w| w[0].rank_cmp(&w[1]).is_gt())
    {
        return Err(ScoutError::validation(format!(
            "results out of order: '{}' ranked before '{}'",
            pair[0].name, pair[1].name
        )));
    }
    Ok(())
}

fn payload_kind(payload: &JobPayload) -> &'static str {
    match payload {
        JobPayload::Empty => "empty",
        JobPayload::Results(_) => "results",
        JobPayload::Error(_) => "error",
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-process store. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, query: Query) -> Result<Job> {
        let job = Job::new(query);
        self.jobs.write().await.insert(job.job_id, job.clone());
        debug!(job_id = %job.job_id, "job created");
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(ScoutError::NotFound(job_id))
    }

    async fn transition(
        &self,
        job_id: JobId,
        status: JobStatus,
        payload: JobPayload,
    ) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(ScoutError::NotFound(job_id))?;
        apply_transition(job, status, payload)?;
        debug!(%job_id, status = status.as_str(), "job transitioned");
        Ok(job.clone())
    }

    async fn request_cancel(&self, job_id: JobId) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(ScoutError::NotFound(job_id))?;
        if !job.status.is_terminal() && !job.cancel_requested {
            job.cancel_requested = true;
            job.updated_at = Utc::now();
        }
        Ok(job.clone())
    }

    async fn list_by_status(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.job_id);
        Ok(jobs)
    }
}

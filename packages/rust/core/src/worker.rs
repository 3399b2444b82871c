//! Job execution: a pool of worker tasks over a shared job-id queue, and the
//! client-facing [`ResearchService`] handle.
//!
//! A worker claims a job with the `QUEUED -> RUNNING` transition. The store
//! lets exactly one claim succeed, so a job id enqueued twice still runs once.
//! Recovery of jobs left by a previous process is an explicit step.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use subscout_shared::{Job, JobId, JobPayload, JobStatus, JobView, Query, Result, ScoutError};
use subscout_storage::JobStore;

use crate::pipeline::{CANCELLED_MESSAGE, ResearchPipeline};

/// Error recorded on jobs found `RUNNING` when the pool starts.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>;

/// Counts from [`WorkerPool::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recovery {
    /// `RUNNING` jobs marked failed.
    pub interrupted: usize,
    /// `QUEUED` jobs handed to the workers.
    pub requeued: usize,
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// N worker tasks consuming one job-id queue.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<JobId>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` tasks over an empty queue.
    ///
    /// Jobs already in the store are left alone; see [`WorkerPool::recover`].
    pub fn start(store: Arc<dyn JobStore>, pipeline: ResearchPipeline, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&queue),
                    Arc::clone(&store),
                    pipeline.clone(),
                ))
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), "worker pool started");

        Self { tx, workers }
    }

    /// Take over the jobs a previous owner of `store` left behind.
    ///
    /// `RUNNING` jobs are failed, never re-run. `QUEUED` jobs are enqueued
    /// oldest first. Only call this when no other process is working the
    /// same store.
    pub async fn recover(&self, store: &dyn JobStore) -> Result<Recovery> {
        let interrupted = store.list_by_status(Some(JobStatus::Running)).await?;
        for job in &interrupted {
            if let Err(e) = store
                .transition(
                    job.job_id,
                    JobStatus::Failed,
                    JobPayload::Error(INTERRUPTED_MESSAGE.into()),
                )
                .await
            {
                warn!(job_id = %job.job_id, error = %e, "could not fail interrupted job");
            }
        }

        let queued = store.list_by_status(Some(JobStatus::Queued)).await?;
        for job in &queued {
            self.enqueue(job.job_id)?;
        }

        let recovery = Recovery {
            interrupted: interrupted.len(),
            requeued: queued.len(),
        };
        info!(
            interrupted = recovery.interrupted,
            requeued = recovery.requeued,
            "recovered persisted jobs"
        );
        Ok(recovery)
    }

    /// Hand a job id to the next free worker.
    pub fn enqueue(&self, job_id: JobId) -> Result<()> {
        self.tx
            .send(job_id)
            .map_err(|_| ScoutError::JobAbort("worker pool is not running".into()))
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task did not complete");
            }
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    queue: JobQueue,
    store: Arc<dyn JobStore>,
    pipeline: ResearchPipeline,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(job_id) = next else { break };
        debug!(worker, %job_id, "picked up job");
        run_job(store.as_ref(), &pipeline, job_id).await;
    }
}

/// Claim, run and finish one job. Never panics on store errors; a job that
/// cannot be claimed is dropped.
#[instrument(skip(store, pipeline))]
pub(crate) async fn run_job(store: &dyn JobStore, pipeline: &ResearchPipeline, job_id: JobId) {
    let job = match store
        .transition(job_id, JobStatus::Running, JobPayload::Empty)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            debug!(error = %e, "job not claimable, dropping");
            return;
        }
    };

    if job.cancel_requested {
        fail(store, job_id, CANCELLED_MESSAGE.into()).await;
        return;
    }

    match pipeline.run(job_id, &job.query, store).await {
        Ok(results) => {
            let count = results.len();
            match store
                .transition(job_id, JobStatus::Succeeded, JobPayload::Results(results))
                .await
            {
                Ok(_) => info!(results = count, "job succeeded"),
                Err(e) => {
                    error!(error = %e, "results rejected by job store");
                    fail(store, job_id, e.to_string()).await;
                }
            }
        }
        Err(ScoutError::JobAbort(reason)) => fail(store, job_id, reason).await,
        Err(e) => fail(store, job_id, e.to_string()).await,
    }
}

async fn fail(store: &dyn JobStore, job_id: JobId, reason: String) {
    warn!(%job_id, reason = %reason, "job failed");
    if let Err(e) = store
        .transition(job_id, JobStatus::Failed, JobPayload::Error(reason))
        .await
    {
        error!(%job_id, error = %e, "could not record job failure");
    }
}

// ---------------------------------------------------------------------------
// ResearchService
// ---------------------------------------------------------------------------

/// Submit/poll/cancel handle over a job store and its worker pool.
pub struct ResearchService {
    store: Arc<dyn JobStore>,
    pool: WorkerPool,
}

impl ResearchService {
    pub fn start(store: Arc<dyn JobStore>, pipeline: ResearchPipeline, workers: usize) -> Self {
        let pool = WorkerPool::start(Arc::clone(&store), pipeline, workers);
        Self { store, pool }
    }

    /// Fail interrupted jobs and resume queued ones. See [`WorkerPool::recover`].
    pub async fn recover(&self) -> Result<Recovery> {
        self.pool.recover(self.store.as_ref()).await
    }

    /// Record a `QUEUED` job and hand it to the pool.
    pub async fn submit(&self, query: Query) -> Result<Job> {
        let job = self.store.create(query).await?;
        self.pool.enqueue(job.job_id)?;
        info!(job_id = %job.job_id, "job submitted");
        Ok(job)
    }

    /// Current client view of a job.
    pub async fn poll(&self, job_id: JobId) -> Result<JobView> {
        let job = self.store.get(job_id).await?;
        Ok(JobView::from(&job))
    }

    /// Ask a job to stop at its next stage boundary.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobView> {
        let job = self.store.request_cancel(job_id).await?;
        info!(%job_id, status = job.status.as_str(), "cancellation requested");
        Ok(JobView::from(&job))
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// Let in-flight and queued jobs finish, then stop the workers.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use subscout_extractor::{FieldExtractor, PageExtractor};
    use subscout_shared::{PartialCandidate, RawEvidence};
    use subscout_storage::MemoryJobStore;

    use super::*;
    use crate::pipeline::tests::{build, hit, query, scenario_pipeline};

    async fn wait_for_terminal(service: &ResearchService, job_id: JobId) -> JobView {
        for _ in 0..500 {
            let view = service.poll(job_id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn submit_and_poll_to_success() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let service = ResearchService::start(store, scenario_pipeline(), 2);

        let job = service.submit(query()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let view = wait_for_terminal(&service, job.job_id).await;
        assert_eq!(view.status, JobStatus::Succeeded);
        assert!(view.error.is_none());
        let results = view.results.unwrap();
        assert_eq!(results[0].name, "XYZ Mechanical");
        assert!(results[0].score >= 90);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn restart_fails_running_and_resumes_queued() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let stale = store.create(query()).await.unwrap();
        store
            .transition(stale.job_id, JobStatus::Running, JobPayload::Empty)
            .await
            .unwrap();
        let waiting = store.create(query()).await.unwrap();

        let service = ResearchService::start(Arc::clone(&store), scenario_pipeline(), 1);
        let recovery = service.recover().await.unwrap();
        assert_eq!(
            recovery,
            Recovery {
                interrupted: 1,
                requeued: 1
            }
        );

        let stale = service.poll(stale.job_id).await.unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some(INTERRUPTED_MESSAGE));

        let waiting = wait_for_terminal(&service, waiting.job_id).await;
        assert_eq!(waiting.status, JobStatus::Succeeded);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn start_leaves_jobs_of_other_owners_alone() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let foreign = store.create(query()).await.unwrap();
        store
            .transition(foreign.job_id, JobStatus::Running, JobPayload::Empty)
            .await
            .unwrap();
        let stale = store.create(query()).await.unwrap();

        let service = ResearchService::start(Arc::clone(&store), scenario_pipeline(), 1);
        let own = service.submit(query()).await.unwrap();
        let own = wait_for_terminal(&service, own.job_id).await;
        assert_eq!(own.status, JobStatus::Succeeded);
        service.shutdown().await;

        let foreign = store.get(foreign.job_id).await.unwrap();
        assert_eq!(foreign.status, JobStatus::Running);
        assert!(foreign.error.is_none());
        assert_eq!(store.get(stale.job_id).await.unwrap().status, JobStatus::Queued);

        // The owner of the running job can still finish it.
        store
            .transition(foreign.job_id, JobStatus::Succeeded, JobPayload::Results(Vec::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_before_claim_fails_without_running() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();
        store.request_cancel(job.job_id).await.unwrap();

        run_job(&store, &scenario_pipeline(), job.job_id).await;

        let job = store.get(job.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(job.results.is_empty());
    }

    #[tokio::test]
    async fn empty_discovery_fails_the_job() {
        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();

        run_job(&store, &build(Vec::new(), Arc::new(PageExtractor::new())), job.job_id).await;

        let view = JobView::from(&store.get(job.job_id).await.unwrap());
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.results.is_none());
        assert_eq!(
            view.error.as_deref(),
            Some(crate::pipeline::NO_EVIDENCE_MESSAGE)
        );
    }

    /// Counts extraction calls so tests can tell how many runs happened.
    struct CountingExtractor(AtomicUsize);

    #[async_trait]
    impl FieldExtractor for CountingExtractor {
        async fn extract(&self, raw: &RawEvidence) -> Result<Vec<PartialCandidate>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            PageExtractor::new().extract(raw).await
        }
    }

    #[tokio::test]
    async fn a_job_runs_at_most_once() {
        let counter = Arc::new(CountingExtractor(AtomicUsize::new(0)));
        let pipeline = build(
            vec![hit(
                "XYZ Mechanical | About",
                "https://xyzmechanical.com/about",
                "Commercial HVAC contractor serving Austin, TX 78701.",
            )],
            counter.clone(),
        );

        let store = MemoryJobStore::new();
        let job = store.create(query()).await.unwrap();

        tokio::join!(
            run_job(&store, &pipeline, job.job_id),
            run_job(&store, &pipeline, job.job_id),
        );
        let single_run = counter.0.load(Ordering::SeqCst);
        assert!(single_run > 0);

        // A late duplicate of a finished job is dropped at claim time.
        run_job(&store, &pipeline, job.job_id).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), single_run);

        let job = store.get(job.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.results.len(), 1);
    }

    #[tokio::test]
    async fn poll_and_cancel_unknown_job() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let service = ResearchService::start(store, scenario_pipeline(), 1);

        let missing = JobId::new();
        assert!(matches!(
            service.poll(missing).await,
            Err(ScoutError::NotFound(id)) if id == missing
        ));
        assert!(service.cancel(missing).await.is_err());

        service.shutdown().await;
    }
}

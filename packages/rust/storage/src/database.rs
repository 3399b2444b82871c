//! libSQL-backed job store (embedded, offline mode).
//!
//! Writes are serialized through a process-local lock, and every status
//! change is a conditional `UPDATE ... WHERE status = ?` so a second claim of
//! the same job can never succeed.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use subscout_shared::{Candidate, Job, JobId, JobPayload, JobStatus, Query, Result, ScoutError};

use crate::migrations;
use crate::{JobStore, apply_transition};

const JOB_COLUMNS: &str =
    "job_id, status, query_json, results_json, error, cancel_requested, created_at, updated_at";

/// Job store persisted in a libSQL database file.
pub struct LibsqlJobStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> ScoutError {
    ScoutError::Storage(e.to_string())
}

impl LibsqlJobStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ScoutError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        match self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    async fn fetch(&self, job_id: JobId) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![job_id.to_string()])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row_to_job(&row),
            None => Err(ScoutError::NotFound(job_id)),
        }
    }
}

#[async_trait]
impl JobStore for LibsqlJobStore {
    async fn create(&self, query: Query) -> Result<Job> {
        let job = Job::new(query);
        let query_json = serde_json::to_string(&job.query).map_err(storage_err)?;

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO jobs (job_id, status, query_json, cancel_requested, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    job.job_id.to_string(),
                    job.status.as_str(),
                    query_json,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;

        debug!(job_id = %job.job_id, "job created");
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Job> {
        self.fetch(job_id).await
    }

    async fn transition(
        &self,
        job_id: JobId,
        status: JobStatus,
        payload: JobPayload,
    ) -> Result<Job> {
        let _guard = self.write_lock.lock().await;

        let mut job = self.fetch(job_id).await?;
        let from = job.status;
        apply_transition(&mut job, status, payload)?;

        let results_json = match job.status {
            JobStatus::Succeeded => Some(serde_json::to_string(&job.results).map_err(storage_err)?),
            _ => None,
        };

        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1, results_json = ?2, error = ?3, updated_at = ?4
                 WHERE job_id = ?5 AND status = ?6",
                params![
                    job.status.as_str(),
                    results_json,
                    job.error.clone(),
                    job.updated_at.to_rfc3339(),
                    job_id.to_string(),
                    from.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            // Another connection moved the job since it was read.
            let current = self.fetch(job_id).await?;
            return Err(ScoutError::InvalidTransition {
                job_id,
                from: current.status,
                to: status,
            });
        }

        debug!(%job_id, status = status.as_str(), "job transitioned");
        Ok(job)
    }

    async fn request_cancel(&self, job_id: JobId) -> Result<Job> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE jobs SET cancel_requested = 1, updated_at = ?1
                 WHERE job_id = ?2 AND cancel_requested = 0 AND status IN ('QUEUED', 'RUNNING')",
                params![Utc::now().to_rfc3339(), job_id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        self.fetch(job_id).await
    }

    async fn list_by_status(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut rows = match status {
            Some(status) => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY job_id");
                self.conn.query(&sql, params![status.as_str()]).await
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY job_id");
                self.conn.query(&sql, params![]).await
            }
        }
        .map_err(storage_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }
}

/// Convert a `jobs` row to a [`Job`].
fn row_to_job(row: &libsql::Row) -> Result<Job> {
    let job_id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(1).map_err(storage_err)?;
    let query_json: String = row.get(2).map_err(storage_err)?;
    let results_json: Option<String> = row.get::<String>(3).ok();
    let error: Option<String> = row.get::<String>(4).ok();
    let cancel_requested: i64 = row.get(5).unwrap_or(0);

    let query: Query = serde_json::from_str(&query_json)
        .map_err(|e| ScoutError::Storage(format!("invalid stored query: {e}")))?;
    let results: Vec<Candidate> = match results_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| ScoutError::Storage(format!("invalid stored results: {e}")))?,
        None => Vec::new(),
    };

    Ok(Job {
        job_id: job_id
            .parse()
            .map_err(|e| ScoutError::Storage(format!("invalid job id '{job_id}': {e}")))?,
        query,
        status: status.parse()?,
        results,
        error,
        cancel_requested: cancel_requested != 0,
        created_at: parse_time(row, 6)?,
        updated_at: parse_time(row, 7)?,
    })
}

fn parse_time(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row.get(idx).map_err(storage_err)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScoutError::Storage(format!("invalid date: {e}")))
}

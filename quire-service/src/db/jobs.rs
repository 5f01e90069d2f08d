//! Processing job queue operations.
//!
//! All state transitions are guarded UPDATEs that require the expected
//! current status, so a row can only move along the job state machine no
//! matter how many workers or API calls race on it.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use strum::IntoEnumIterator;

use super::Database;
use super::models::{JobStats, JobType, ProcessingJob};
use super::search_index::{self, IndexChange};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

const JOB_COLUMNS: &str = "id, document_id, org_id, job_type, status, priority, input_params, \
     output_data, error_message, error_code, retry_count, max_retries, lease_expires_at, \
     next_retry_at, started_at, completed_at, created_at, created_by_id";

/// Outcome of a transactional job completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Job row flipped to completed and the document write committed
    Applied,
    /// Job was no longer running; nothing was written
    JobNotRunning,
    /// The document version moved since the caller read it; rolled back
    VersionConflict,
}

impl Database {
    /// Insert a new job.
    ///
    /// A unique-constraint failure here is the partial active-pair index:
    /// an active job already exists for the same (document, job type), so
    /// it surfaces as `DuplicateActiveJob` rather than a database error.
    pub fn insert_job(&self, job: &ProcessingJob) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        let input_params_json = job
            .input_params
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        conn.execute(
            r#"
            INSERT INTO processing_jobs (id, document_id, org_id, job_type, status, priority, input_params, retry_count, max_retries, created_at, created_by_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.id,
                job.document_id,
                job.org_id,
                job.job_type.as_str(),
                job.status.as_str(),
                job.priority.as_i64(),
                input_params_json,
                job.retry_count as i64,
                job.max_retries as i64,
                job.created_at.to_rfc3339(),
                job.created_by_id,
            ],
        )
        .map_err(|e| {
            let unique_violation = matches!(
                &e,
                rusqlite::Error::SqliteFailure(err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            );
            if unique_violation {
                ServiceError::DuplicateActiveJob {
                    document_id: job.document_id.clone(),
                    job_type: job.job_type.as_str().to_string(),
                }
            } else {
                ServiceError::Database(DatabaseError::Query(e))
            }
        })?;

        Ok(())
    }

    /// Get a job by ID
    pub fn get_job(&self, id: &str) -> ServiceResult<Option<ProcessingJob>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM processing_jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            |row| ProcessingJob::from_row(row),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// ID of the active (pending, running or retrying) job for a
    /// (document, job type) pair, if any
    pub fn get_active_job_id(
        &self,
        document_id: &str,
        job_type: JobType,
    ) -> ServiceResult<Option<String>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT id FROM processing_jobs WHERE document_id = ?1 AND job_type = ?2 \
             AND status IN ('pending', 'running', 'retrying')",
            params![document_id, job_type.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Claim the next pending job for a worker.
    ///
    /// Highest priority first, then FIFO by creation time with ID as the
    /// final tie-break. The claimed job moves to running with a lease
    /// deadline; selection and claim happen under one connection lock.
    pub fn lease_next_job(
        &self,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> ServiceResult<Option<ProcessingJob>> {
        let conn = self.conn.lock().unwrap();

        let candidate: Option<String> = conn
            .query_row(
                "SELECT id FROM processing_jobs WHERE status = 'pending' \
                 ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = conn
            .execute(
                "UPDATE processing_jobs SET status = 'running', started_at = ?1, lease_expires_at = ?2 \
                 WHERE id = ?3 AND status = 'pending'",
                params![now.to_rfc3339(), lease_expires_at.to_rfc3339(), id],
            )
            .map_err(DatabaseError::Query)?;

        if claimed == 0 {
            return Ok(None);
        }

        conn.query_row(
            &format!("SELECT {} FROM processing_jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            |row| ProcessingJob::from_row(row),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Finalize a running job as completed and merge its output into the
    /// document's searchable representation, in one transaction.
    ///
    /// The completion is guarded on `status = 'running'` and the document
    /// write on `search_version`; when either guard misses the whole
    /// transaction rolls back. A cancel that lands first therefore keeps
    /// the row terminal and the document untouched.
    pub fn complete_job_applying(
        &self,
        id: &str,
        output_json: &str,
        document_id: &str,
        expected_version: i64,
        change: &IndexChange,
        now: DateTime<Utc>,
    ) -> ServiceResult<CompletionOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let completed = tx
            .execute(
                "UPDATE processing_jobs SET status = 'completed', output_data = ?1, \
                 completed_at = ?2, lease_expires_at = NULL, error_message = NULL, error_code = NULL \
                 WHERE id = ?3 AND status = 'running'",
                params![output_json, now.to_rfc3339(), id],
            )
            .map_err(DatabaseError::Query)?;
        if completed == 0 {
            return Ok(CompletionOutcome::JobNotRunning);
        }

        if !search_index::apply_change(&tx, document_id, expected_version, change, now)? {
            // Dropping the transaction rolls the completion back
            return Ok(CompletionOutcome::VersionConflict);
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(CompletionOutcome::Applied)
    }

    /// Finalize a running job as failed
    pub fn fail_job(
        &self,
        id: &str,
        message: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE processing_jobs SET status = 'failed', error_message = ?1, error_code = ?2, \
                 completed_at = ?3, lease_expires_at = NULL WHERE id = ?4 AND status = 'running'",
                params![message, code, now.to_rfc3339(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Park a running job for a later retry attempt
    pub fn mark_job_retrying(
        &self,
        id: &str,
        new_retry_count: u32,
        next_retry_at: DateTime<Utc>,
        message: &str,
        code: &str,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE processing_jobs SET status = 'retrying', retry_count = ?1, next_retry_at = ?2, \
                 error_message = ?3, error_code = ?4, lease_expires_at = NULL \
                 WHERE id = ?5 AND status = 'running'",
                params![
                    new_retry_count as i64,
                    next_retry_at.to_rfc3339(),
                    message,
                    code,
                    id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Cancel an active job. Running jobs are finalized here; the worker
    /// notices the cooperative token and discards its result.
    pub fn cancel_job(&self, id: &str, now: DateTime<Utc>) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE processing_jobs SET status = 'cancelled', completed_at = ?1, \
                 lease_expires_at = NULL, next_retry_at = NULL \
                 WHERE id = ?2 AND status IN ('pending', 'running', 'retrying')",
                params![now.to_rfc3339(), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Move retrying jobs whose backoff has elapsed back to pending
    pub fn promote_due_retries(&self, now: DateTime<Utc>) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE processing_jobs SET status = 'pending', next_retry_at = NULL \
                 WHERE status = 'retrying' AND next_retry_at <= ?1",
                params![now.to_rfc3339()],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Requeue running jobs whose lease has expired (worker crashed or
    /// stalled). Re-execution of already-finished work is possible here;
    /// completion merges are idempotent to absorb it.
    pub fn requeue_expired_leases(&self, now: DateTime<Utc>) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id FROM processing_jobs WHERE status = 'running' AND lease_expires_at <= ?1",
            )
            .map_err(DatabaseError::Query)?;
        let expired: Vec<String> = stmt
            .query_map(params![now.to_rfc3339()], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .collect();

        for id in &expired {
            conn.execute(
                "UPDATE processing_jobs SET status = 'pending', lease_expires_at = NULL \
                 WHERE id = ?1 AND status = 'running'",
                params![id],
            )
            .map_err(DatabaseError::Query)?;
        }

        Ok(expired)
    }

    /// Queue depth counters, grouped by status and by job type
    pub fn job_stats(&self) -> ServiceResult<JobStats> {
        let conn = self.conn.lock().unwrap();

        let count_status = |status: &str| -> Result<i64, DatabaseError> {
            conn.query_row(
                "SELECT COUNT(*) FROM processing_jobs WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)
        };

        let mut by_type = std::collections::BTreeMap::new();
        for job_type in JobType::iter() {
            by_type.insert(job_type.as_str().to_string(), 0);
        }

        let mut stmt = conn
            .prepare("SELECT job_type, COUNT(*) FROM processing_jobs GROUP BY job_type")
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(DatabaseError::Query)?;
        for row in rows {
            let (job_type, count) = row.map_err(DatabaseError::Query)?;
            by_type.insert(job_type, count);
        }

        Ok(JobStats {
            pending: count_status("pending")?,
            running: count_status("running")?,
            retrying: count_status("retrying")?,
            completed: count_status("completed")?,
            failed: count_status("failed")?,
            cancelled: count_status("cancelled")?,
            by_type,
        })
    }
}

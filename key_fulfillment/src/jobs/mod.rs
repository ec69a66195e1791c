//! Background Job Tracker.
//!
//! Persists the status of long-running operations. Each write is conditioned
//! on the job still being `pending` or `running`, so a completed or failed row
//! is never modified again.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::{SqliteConnection, insert_into, update};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{FulfillmentError, Result};
use crate::models::JobStatus;
use crate::models::job::{BackgroundJob, BackgroundJobRow, NewBackgroundJob};
use crate::schema::background_jobs::dsl as bj;
use crate::tz::to_rfc3339_millis;

const LIVE: [&str; 2] = ["pending", "running"];

/// Percentage of `processed` over `total`, truncated; 0 when `total` is 0.
pub fn percent(processed: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((i64::from(processed) * 100) / i64::from(total)).clamp(0, 100) as i32
}

/// Job status store.
#[derive(Clone)]
pub struct JobTracker {
    clock: Arc<dyn Clock>,
}

impl JobTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn now(&self) -> String {
        to_rfc3339_millis(self.clock.now())
    }

    /// New `pending` job with progress 0.
    pub fn create(&self, conn: &mut SqliteConnection, job_type: &str, metadata: &Value) -> Result<BackgroundJob> {
        if job_type.trim().is_empty() {
            return Err(FulfillmentError::Validation("job type must not be empty".into()));
        }
        let now = self.now();
        let row = NewBackgroundJob {
            job_type,
            status: JobStatus::Pending.as_str(),
            metadata: metadata.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        let stored: BackgroundJobRow = insert_into(bj::background_jobs)
            .values(&row)
            .returning(BackgroundJobRow::as_returning())
            .get_result(conn)?;
        info!(job_id = stored.id, job_type, "job created");
        stored.try_into()
    }

    /// Live job by id.
    pub fn get(&self, conn: &mut SqliteConnection, id: i32) -> Result<BackgroundJob> {
        bj::background_jobs
            .filter(bj::id.eq(id))
            .filter(bj::deleted_at.is_null())
            .select(BackgroundJobRow::as_select())
            .first(conn)
            .optional()?
            .ok_or(FulfillmentError::NotFound { entity: "job", id })?
            .try_into()
    }

    /// pending -> running. Starting a running job is a no-op.
    pub fn start(&self, conn: &mut SqliteConnection, id: i32) -> Result<BackgroundJob> {
        let now = self.now();
        let n = update(bj::background_jobs)
            .filter(bj::id.eq(id))
            .filter(bj::status.eq("pending"))
            .filter(bj::deleted_at.is_null())
            .set((bj::status.eq("running"), bj::updated_at.eq(now.as_str())))
            .execute(conn)?;
        let job = self.get(conn, id)?;
        if n == 1 || job.status == JobStatus::Running {
            debug!(job_id = id, "job running");
            return Ok(job);
        }
        Err(invalid(id, job.status, JobStatus::Running))
    }

    /// Records `processed` of `total` items. A pending job becomes running.
    ///
    /// `processed` may never go below the stored value and `progress` never
    /// decreases, even if `total` grows.
    pub fn update_progress(
        &self,
        conn: &mut SqliteConnection,
        id: i32,
        processed: i32,
        total: i32,
    ) -> Result<BackgroundJob> {
        if processed < 0 || total < 0 || processed > total {
            return Err(FulfillmentError::Validation(format!(
                "invalid progress {processed}/{total} for job {id}"
            )));
        }
        let current = self.get(conn, id)?;
        if current.status.is_terminal() {
            return Err(invalid(id, current.status, JobStatus::Running));
        }
        if processed < current.processed_items {
            warn!(job_id = id, stored = current.processed_items, processed, "progress regression rejected");
            return Err(FulfillmentError::InvalidTransition {
                entity: "job",
                id,
                from: format!("processed {}", current.processed_items),
                to: format!("processed {processed}"),
            });
        }
        let progress = current.progress.max(percent(processed, total));
        let now = self.now();
        let n = update(bj::background_jobs)
            .filter(bj::id.eq(id))
            .filter(bj::status.eq_any(LIVE))
            .filter(bj::processed_items.le(processed))
            .filter(bj::progress.le(progress))
            .filter(bj::deleted_at.is_null())
            .set((
                bj::status.eq("running"),
                bj::processed_items.eq(processed),
                bj::total_items.eq(total),
                bj::progress.eq(progress),
                bj::updated_at.eq(now.as_str()),
            ))
            .execute(conn)?;
        if n == 0 {
            return Err(self.explain_rejection(conn, id, JobStatus::Running));
        }
        debug!(job_id = id, processed, total, progress, "job progress");
        self.get(conn, id)
    }

    /// -> completed: `processed_items = total_items`, `progress = 100`.
    pub fn complete(&self, conn: &mut SqliteConnection, id: i32, result: &Value) -> Result<BackgroundJob> {
        let now = self.now();
        let n = update(bj::background_jobs)
            .filter(bj::id.eq(id))
            .filter(bj::status.eq_any(LIVE))
            .filter(bj::deleted_at.is_null())
            .set((
                bj::status.eq("completed"),
                bj::processed_items.eq(bj::total_items),
                bj::progress.eq(100),
                bj::result.eq(Some(result.to_string())),
                bj::completed_at.eq(Some(now.as_str())),
                bj::updated_at.eq(now.as_str()),
            ))
            .execute(conn)?;
        if n == 0 {
            return Err(self.explain_rejection(conn, id, JobStatus::Completed));
        }
        info!(job_id = id, "job completed");
        self.get(conn, id)
    }

    /// -> failed, with an error message and optionally the partial result.
    pub fn fail(
        &self,
        conn: &mut SqliteConnection,
        id: i32,
        error: &str,
        result: Option<&Value>,
    ) -> Result<BackgroundJob> {
        let now = self.now();
        let n = update(bj::background_jobs)
            .filter(bj::id.eq(id))
            .filter(bj::status.eq_any(LIVE))
            .filter(bj::deleted_at.is_null())
            .set((
                bj::status.eq("failed"),
                bj::error.eq(Some(error)),
                bj::result.eq(result.map(Value::to_string)),
                bj::completed_at.eq(Some(now.as_str())),
                bj::updated_at.eq(now.as_str()),
            ))
            .execute(conn)?;
        if n == 0 {
            return Err(self.explain_rejection(conn, id, JobStatus::Failed));
        }
        warn!(job_id = id, error, "job failed");
        self.get(conn, id)
    }

    /// Most recent live jobs of a type, newest first.
    pub fn list_by_type(&self, conn: &mut SqliteConnection, job_type: &str, limit: i64) -> Result<Vec<BackgroundJob>> {
        bj::background_jobs
            .filter(bj::job_type.eq(job_type))
            .filter(bj::deleted_at.is_null())
            .order(bj::id.desc())
            .limit(limit)
            .select(BackgroundJobRow::as_select())
            .load(conn)?
            .into_iter()
            .map(BackgroundJob::try_from)
            .collect()
    }

    fn explain_rejection(&self, conn: &mut SqliteConnection, id: i32, to: JobStatus) -> FulfillmentError {
        match self.get(conn, id) {
            Ok(job) if job.status.is_terminal() => invalid(id, job.status, to),
            Ok(job) => FulfillmentError::InvalidTransition {
                entity: "job",
                id,
                from: format!("processed {}", job.processed_items),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }
}

fn invalid(id: i32, from: JobStatus, to: JobStatus) -> FulfillmentError {
    FulfillmentError::InvalidTransition {
        entity: "job",
        id,
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_truncates_and_handles_empty_jobs() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
    }
}

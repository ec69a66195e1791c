use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, parse_metadata};
use crate::error::FulfillmentError;
use crate::schema::background_jobs;
use crate::tz::{parse_opt, parse_ts_to_utc};

/// Status of a background job. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownVariant {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

/// Raw row of [`crate::schema::background_jobs`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = background_jobs, check_for_backend(diesel::sqlite::Sqlite))]
pub struct BackgroundJobRow {
    pub id: i32,
    pub job_type: String,
    pub status: String,
    pub progress: i32,
    pub total_items: i32,
    pub processed_items: i32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = background_jobs)]
pub struct NewBackgroundJob<'a> {
    pub job_type: &'a str,
    pub status: &'a str,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A job with its columns decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundJob {
    pub id: i32,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: i32,
    pub total_items: i32,
    pub processed_items: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<BackgroundJobRow> for BackgroundJob {
    type Error = FulfillmentError;

    fn try_from(row: BackgroundJobRow) -> Result<Self, Self::Error> {
        Ok(BackgroundJob {
            id: row.id,
            status: row.status.parse()?,
            result: row.result.as_deref().map(parse_metadata).transpose()?,
            metadata: parse_metadata(&row.metadata)?,
            created_at: parse_ts_to_utc(&row.created_at)?,
            updated_at: parse_ts_to_utc(&row.updated_at)?,
            completed_at: parse_opt(row.completed_at.as_deref())?,
            job_type: row.job_type,
            progress: row.progress,
            total_items: row.total_items,
            processed_items: row.processed_items,
            error: row.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("done".parse::<JobStatus>().is_err());
    }
}

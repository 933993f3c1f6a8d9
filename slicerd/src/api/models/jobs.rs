use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{AnyJob, JobId, JobStatus};

/// Returned by `POST /jobs` once the job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub status_url: String,
}

/// Current state of a job, as returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: JobId,
    pub status: JobStatus,
    /// Set once the job has succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcode_path: Option<String>,
    /// Set once the job has failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResponse {
    pub fn from_job(job: &AnyJob, public_prefix: &str) -> Self {
        let (queued_at, started_at, finished_at) = match job {
            AnyJob::Queued(j) => (j.state.queued_at, None, None),
            AnyJob::Running(j) => (j.state.queued_at, Some(j.state.started_at), None),
            AnyJob::Succeeded(j) => (j.state.queued_at, Some(j.state.started_at), Some(j.state.finished_at)),
            AnyJob::Failed(j) => (j.state.queued_at, j.state.started_at, Some(j.state.finished_at)),
        };

        let (gcode_path, error, details) = match job {
            AnyJob::Succeeded(j) => (Some(j.data.output.public_path(public_prefix)), None, None),
            AnyJob::Failed(j) => (None, Some("Slicing failed".to_string()), Some(j.state.reason.details())),
            AnyJob::Queued(_) | AnyJob::Running(_) => (None, None, None),
        };

        Self {
            id: job.id(),
            status: job.status(),
            gcode_path,
            error,
            details,
            queued_at,
            started_at,
            finished_at,
        }
    }
}

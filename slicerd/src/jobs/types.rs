//! Core types for slicing jobs.
//!
//! Jobs use the typestate pattern: a [`Job<T>`] can only be moved through the transitions that
//! are valid for its current state `T`. [`AnyJob`] erases the state for storage and reporting.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::slicer::{SliceCommand, SliceParams};
use crate::storage::{GeneratedOutput, StoredModel};

/// Marker trait for valid job states.
pub trait JobState: Send + Sync {}

pub type JobId = Uuid;

/// A slicing job in state `T`.
#[derive(Debug, Clone)]
pub struct Job<T: JobState> {
    pub state: T,
    pub data: JobData,
}

/// Everything needed to run the slicer for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobData {
    pub id: JobId,
    pub model: StoredModel,
    pub output: GeneratedOutput,
    pub params: SliceParams,
}

impl JobData {
    pub fn new(model: StoredModel, output: GeneratedOutput, params: SliceParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            output,
            params,
        }
    }

    pub fn command(&self) -> SliceCommand {
        SliceCommand {
            input: self.model.path.clone(),
            output: self.output.path.clone(),
            params: self.params.clone(),
        }
    }
}

// ============================================================================
// Job States
// ============================================================================

/// Waiting for a free worker.
#[derive(Debug, Clone)]
pub struct Queued {
    pub queued_at: DateTime<Utc>,
}

impl JobState for Queued {}

/// The slicer process is running.
#[derive(Debug, Clone)]
pub struct Running {
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl JobState for Running {}

/// The slicer exited with status 0.
#[derive(Debug, Clone)]
pub struct Succeeded {
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobState for Succeeded {}

/// The slicer did not produce a result.
#[derive(Debug, Clone)]
pub struct Failed {
    pub reason: FailureReason,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl JobState for Failed {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Non-zero exit, or killed by a signal (`exit_code` is `None`)
    Exit { exit_code: Option<i32>, stderr: String },
    /// Exceeded the per-job timeout and was killed
    Timeout { after: Duration },
    /// The slicer could not be started or its output could not be collected
    Launch { message: String },
}

impl FailureReason {
    /// Diagnostic text for clients. For exit failures this is the slicer's stderr, unmodified.
    pub fn details(&self) -> String {
        match self {
            FailureReason::Exit { stderr, .. } => stderr.clone(),
            FailureReason::Timeout { after } => {
                format!("Slicer did not finish within {}", humantime::format_duration(*after))
            }
            FailureReason::Launch { message } => message.clone(),
        }
    }
}

// ============================================================================
// Unified Job Representation
// ============================================================================

/// Lowercase state name as reported over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A job in any state.
#[derive(Debug, Clone)]
pub enum AnyJob {
    Queued(Job<Queued>),
    Running(Job<Running>),
    Succeeded(Job<Succeeded>),
    Failed(Job<Failed>),
}

impl AnyJob {
    pub fn id(&self) -> JobId {
        self.data().id
    }

    pub fn data(&self) -> &JobData {
        match self {
            AnyJob::Queued(j) => &j.data,
            AnyJob::Running(j) => &j.data,
            AnyJob::Succeeded(j) => &j.data,
            AnyJob::Failed(j) => &j.data,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            AnyJob::Queued(_) => JobStatus::Queued,
            AnyJob::Running(_) => JobStatus::Running,
            AnyJob::Succeeded(_) => JobStatus::Succeeded,
            AnyJob::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, AnyJob::Queued(_))
    }

    /// Check if this job is in a terminal state (Succeeded or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnyJob::Succeeded(_) | AnyJob::Failed(_))
    }

    pub fn as_queued(&self) -> Option<&Job<Queued>> {
        match self {
            AnyJob::Queued(j) => Some(j),
            _ => None,
        }
    }
}

impl From<Job<Queued>> for AnyJob {
    fn from(j: Job<Queued>) -> Self {
        AnyJob::Queued(j)
    }
}

impl From<Job<Running>> for AnyJob {
    fn from(j: Job<Running>) -> Self {
        AnyJob::Running(j)
    }
}

impl From<Job<Succeeded>> for AnyJob {
    fn from(j: Job<Succeeded>) -> Self {
        AnyJob::Succeeded(j)
    }
}

impl From<Job<Failed>> for AnyJob {
    fn from(j: Job<Failed>) -> Self {
        AnyJob::Failed(j)
    }
}

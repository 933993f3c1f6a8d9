//! Slicing job queue.
//!
//! Uploads become [`Job`]s that move `Queued -> Running -> Succeeded | Failed`. A bounded
//! [`InMemoryJobStore`] provides admission control, and a [`Daemon`] runs at most
//! `max_concurrent` slicer processes at a time, each under a timeout. [`JobManager`] ties the two
//! together for the HTTP layer.

use thiserror::Error;

pub mod daemon;
pub mod manager;
pub mod store;
pub mod transitions;
pub mod types;

pub use daemon::{Daemon, DaemonConfig};
pub use manager::JobManager;
pub use store::{InMemoryJobStore, JobCounts, JobStore};
pub use types::{AnyJob, FailureReason, Job, JobData, JobId, JobStatus};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is in an invalid state: {state}")]
    InvalidState { id: JobId, state: String },

    #[error("Job manager is shutting down")]
    Closed,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use super::JobData;
    use crate::slicer::SliceParams;
    use crate::storage::{GeneratedOutput, StoredModel, replace_extension};

    pub fn sample_job_data(name: &str) -> JobData {
        let output_name = replace_extension(name, "gcode");
        JobData::new(
            StoredModel {
                original_name: name.to_string(),
                file_name: name.to_string(),
                path: PathBuf::from("/tmp").join(name),
            },
            GeneratedOutput {
                path: PathBuf::from("/tmp").join(&output_name),
                file_name: output_name,
            },
            SliceParams::default(),
        )
    }
}

//! Front door to the job queue for the HTTP layer.
//!
//! Combines an [`InMemoryJobStore`] with a [`Daemon`] so handlers can submit work, look jobs up
//! and wait for results without knowing how jobs are scheduled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::daemon::{Daemon, DaemonConfig};
use super::store::{InMemoryJobStore, JobCounts, JobStore};
use super::types::{AnyJob, Job, JobData, JobId};
use super::JobError;
use crate::slicer::Slicer;

/// # Example
/// ```ignore
/// let manager = JobManager::new(Arc::new(CommandSlicer::new("prusa-slicer")), DaemonConfig::default(), timeout);
/// let daemon = manager.run(shutdown.clone());
///
/// let id = manager.submit(data).await?;
/// let finished = manager.wait_for_terminal(id).await?;
/// ```
pub struct JobManager {
    store: Arc<InMemoryJobStore>,
    slicer: Arc<dyn Slicer>,
    config: DaemonConfig,
    job_timeout: Duration,
    wakeup: Arc<Notify>,
}

impl JobManager {
    /// # Arguments
    /// * `slicer` - runs the external slicing program
    /// * `config` - concurrency limit, queue capacity and polling intervals
    /// * `job_timeout` - how long a single slicer run may take before it is killed
    pub fn new(slicer: Arc<dyn Slicer>, config: DaemonConfig, job_timeout: Duration) -> Self {
        Self {
            store: Arc::new(InMemoryJobStore::new(config.queue_capacity).with_retained_jobs(config.retained_jobs)),
            slicer,
            config,
            job_timeout,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Queue a job and wake the daemon.
    ///
    /// # Errors
    /// `QueueFull` when `queue_capacity` jobs are already waiting.
    #[tracing::instrument(skip(self, data), fields(job_id = %data.id, input = %data.model.file_name))]
    pub async fn submit(&self, data: JobData) -> Result<JobId, JobError> {
        let id = data.id;
        self.store.submit(Job::new(data)).await?;
        self.wakeup.notify_one();
        tracing::debug!("Job queued");
        Ok(id)
    }

    pub async fn get(&self, id: JobId) -> Result<AnyJob, JobError> {
        self.store.get(id).await
    }

    pub async fn counts(&self) -> JobCounts {
        self.store.counts().await
    }

    /// Wait until the job has succeeded or failed and return its final state.
    pub async fn wait_for_terminal(&self, id: JobId) -> Result<AnyJob, JobError> {
        // Subscribe before the first lookup so a transition in between is not missed
        let mut updates = self.store.subscribe();

        let current = self.store.get(id).await?;
        if current.is_terminal() {
            return Ok(current);
        }

        loop {
            match updates.recv().await {
                Ok(job) if job.id() == id && job.is_terminal() => return Ok(job),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(lagged_count = n, job_id = %id, "Job status stream lagged, re-reading job");
                    let current = self.store.get(id).await?;
                    if current.is_terminal() {
                        return Ok(current);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(JobError::Closed),
            }
        }
    }

    /// Spawn the daemon. It stops claiming work once `shutdown` is cancelled and finishes the
    /// jobs already running.
    pub fn run(&self, shutdown: CancellationToken) -> JoinHandle<Result<(), JobError>> {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            queue_capacity = self.config.queue_capacity,
            job_timeout = %humantime::format_duration(self.job_timeout),
            "Starting job daemon"
        );

        let daemon = Arc::new(Daemon::new(
            self.store.clone(),
            self.slicer.clone(),
            self.config.clone(),
            self.job_timeout,
            self.wakeup.clone(),
        ));

        tokio::spawn(daemon.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::sample_job_data;
    use crate::jobs::types::JobStatus;
    use crate::slicer::MockSlicer;

    fn config(queue_capacity: usize) -> DaemonConfig {
        DaemonConfig {
            max_concurrent: 1,
            queue_capacity,
            // Long interval: progress must come from wakeups, not polling
            claim_interval: Duration::from_secs(60),
            status_log_interval: None,
            retained_jobs: 16,
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_submit_and_wait() {
        let slicer = MockSlicer::new();
        slicer.add_success("done");
        let manager = JobManager::new(Arc::new(slicer.clone()), config(4), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let handle = manager.run(shutdown.clone());

        let id = manager.submit(sample_job_data("cube.stl")).await.unwrap();
        let finished = manager.wait_for_terminal(id).await.unwrap();

        assert_eq!(finished.status(), JobStatus::Succeeded);
        assert_eq!(manager.counts().await.succeeded, 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_for_finished_job() {
        let slicer = MockSlicer::new();
        slicer.add_failure(3, "boom");
        let manager = JobManager::new(Arc::new(slicer), config(4), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let handle = manager.run(shutdown.clone());

        let id = manager.submit(sample_job_data("cube.stl")).await.unwrap();
        manager.wait_for_terminal(id).await.unwrap();

        let again = manager.wait_for_terminal(id).await.unwrap();
        assert_eq!(again.status(), JobStatus::Failed);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_queue_full_without_daemon() {
        let manager = JobManager::new(Arc::new(MockSlicer::new()), config(1), Duration::from_secs(5));

        manager.submit(sample_job_data("a.stl")).await.unwrap();
        let result = manager.submit(sample_job_data("b.stl")).await;

        assert!(matches!(result, Err(JobError::QueueFull { capacity: 1 })));
        assert_eq!(manager.counts().await.queued, 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let manager = JobManager::new(Arc::new(MockSlicer::new()), config(1), Duration::from_secs(5));
        let id = uuid::Uuid::new_v4();
        assert!(matches!(manager.wait_for_terminal(id).await, Err(JobError::NotFound(found)) if found == id));
    }
}

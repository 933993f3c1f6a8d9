//! Worker daemon: claims queued jobs and runs them with bounded concurrency.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::JobError;
use super::store::JobStore;
use crate::slicer::Slicer;

/// Configuration for the job daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Maximum number of slicer processes running at once
    pub max_concurrent: usize,
    /// Maximum number of jobs waiting for a worker; further submissions are rejected
    pub queue_capacity: usize,
    /// How long to sleep between claim attempts when nothing wakes the daemon
    #[serde(with = "humantime_serde")]
    pub claim_interval: Duration,
    /// Interval for logging daemon status. Set to null to disable.
    #[serde(with = "humantime_serde")]
    pub status_log_interval: Option<Duration>,
    /// How many finished jobs stay queryable; the oldest are forgotten first
    pub retained_jobs: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 32,
            claim_interval: Duration::from_millis(500),
            status_log_interval: Some(Duration::from_secs(30)),
            retained_jobs: 256,
        }
    }
}

/// Daemon that processes slicing jobs.
pub struct Daemon<S: JobStore> {
    store: Arc<S>,
    slicer: Arc<dyn Slicer>,
    config: DaemonConfig,
    job_timeout: Duration,
    permits: Arc<Semaphore>,
    wakeup: Arc<Notify>,
    jobs_in_flight: Arc<AtomicUsize>,
}

impl<S: JobStore + 'static> Daemon<S> {
    pub fn new(store: Arc<S>, slicer: Arc<dyn Slicer>, config: DaemonConfig, job_timeout: Duration, wakeup: Arc<Notify>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            store,
            slicer,
            config,
            job_timeout,
            wakeup,
            jobs_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the daemon loop until `shutdown` is cancelled, then wait for running jobs to finish.
    #[tracing::instrument(skip_all, fields(max_concurrent = self.config.max_concurrent))]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), JobError> {
        tracing::info!("Job daemon starting main processing loop");

        if let Some(interval) = self.config.status_log_interval {
            let jobs_in_flight = self.jobs_in_flight.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => {
                            tracing::debug!(jobs_in_flight = jobs_in_flight.load(Ordering::Relaxed), "Daemon status");
                        }
                    }
                }
            });
        }

        let mut join_set: JoinSet<Result<(), JobError>> = JoinSet::new();

        loop {
            // Reap finished tasks (non-blocking)
            while let Some(result) = join_set.try_join_next() {
                log_task_result(result);
            }

            let available = self.permits.available_permits();
            let claimed = if available > 0 {
                self.store.claim_jobs(available).await?
            } else {
                Vec::new()
            };

            if !claimed.is_empty() {
                tracing::debug!(claimed_count = claimed.len(), "Claimed queued jobs");
            }

            for job in claimed {
                let job_id = job.data.id;
                // Only this loop takes permits, and we claimed no more than were available
                let permit = self
                    .permits
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| JobError::InvalidState {
                        id: job_id,
                        state: "claimed without a free worker".to_string(),
                    })?;

                let store = self.store.clone();
                let slicer = self.slicer.clone();
                let timeout = self.job_timeout;
                let jobs_in_flight = self.jobs_in_flight.clone();
                let wakeup = self.wakeup.clone();

                jobs_in_flight.fetch_add(1, Ordering::Relaxed);

                join_set.spawn(async move {
                    // Permit is held for the duration of this task
                    let _permit = permit;
                    let _guard = scopeguard::guard((), |_| {
                        jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
                        // A worker is free again
                        wakeup.notify_one();
                    });

                    tracing::info!(job_id = %job_id, input = %job.data.model.file_name, "Running slicer");

                    match job.execute(slicer.as_ref(), timeout, store.as_ref()).await? {
                        Ok(succeeded) => {
                            tracing::info!(
                                job_id = %job_id,
                                output = %succeeded.data.output.file_name,
                                "Slicing succeeded"
                            );
                        }
                        Err(failed) => {
                            tracing::warn!(job_id = %job_id, reason = ?failed.state.reason, "Slicing failed");
                        }
                    }
                    Ok(())
                });
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.config.claim_interval) => {}
                Some(result) = join_set.join_next(), if !join_set.is_empty() => log_task_result(result),
            }
        }

        tracing::info!(running = join_set.len(), "Job daemon stopping, waiting for running jobs");
        while let Some(result) = join_set.join_next().await {
            log_task_result(result);
        }
        Ok(())
    }
}

fn log_task_result(result: Result<Result<(), JobError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => tracing::trace!("Job task completed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Job task failed"),
        Err(join_error) => tracing::error!(error = %join_error, "Job task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::test_support::sample_job_data;
    use crate::jobs::types::{AnyJob, Job, JobStatus};
    use crate::slicer::MockSlicer;

    fn test_config(max_concurrent: usize) -> DaemonConfig {
        DaemonConfig {
            max_concurrent,
            queue_capacity: 16,
            claim_interval: Duration::from_millis(20),
            status_log_interval: None,
            retained_jobs: 64,
        }
    }

    async fn wait_until_terminal(store: &InMemoryJobStore, ids: &[uuid::Uuid]) -> Vec<AnyJob> {
        for _ in 0..200 {
            let mut jobs = Vec::new();
            for id in ids {
                jobs.push(store.get(*id).await.unwrap());
            }
            if jobs.iter().all(AnyJob::is_terminal) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("jobs did not finish in time");
    }

    #[test_log::test(tokio::test)]
    async fn test_daemon_processes_jobs() {
        let store = Arc::new(InMemoryJobStore::new(16));
        let slicer = MockSlicer::new();
        slicer.add_success("ok");
        slicer.add_failure(1, "bad mesh");

        let first = Job::new(sample_job_data("a.stl"));
        let second = Job::new(sample_job_data("b.stl"));
        let ids = [first.data.id, second.data.id];
        store.submit(first).await.unwrap();
        store.submit(second).await.unwrap();

        let daemon = Arc::new(Daemon::new(
            store.clone(),
            Arc::new(slicer.clone()),
            test_config(1),
            Duration::from_secs(5),
            Arc::new(Notify::new()),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(daemon.run(shutdown.clone()));

        let jobs = wait_until_terminal(&store, &ids).await;
        assert_eq!(jobs[0].status(), JobStatus::Succeeded);
        assert_eq!(jobs[1].status(), JobStatus::Failed);
        assert_eq!(slicer.call_count(), 2);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_daemon_bounds_concurrency() {
        let store = Arc::new(InMemoryJobStore::new(16));
        let slicer = MockSlicer::new().with_delay(Duration::from_millis(100));
        let mut ids = Vec::new();
        for i in 0..6 {
            slicer.add_success("ok");
            let job = Job::new(sample_job_data(&format!("part-{i}.stl")));
            ids.push(job.data.id);
            store.submit(job).await.unwrap();
        }

        let daemon = Arc::new(Daemon::new(
            store.clone(),
            Arc::new(slicer.clone()),
            test_config(2),
            Duration::from_secs(5),
            Arc::new(Notify::new()),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(daemon.run(shutdown.clone()));

        let jobs = wait_until_terminal(&store, &ids).await;
        assert!(jobs.iter().all(|j| j.status() == JobStatus::Succeeded));
        assert_eq!(slicer.call_count(), 6);
        assert_eq!(slicer.peak_concurrency(), 2);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let store = Arc::new(InMemoryJobStore::new(16));
        let slicer = MockSlicer::new().with_delay(Duration::from_millis(200));
        slicer.add_success("ok");

        let job = Job::new(sample_job_data("a.stl"));
        let id = job.data.id;
        store.submit(job).await.unwrap();

        let daemon = Arc::new(Daemon::new(
            store.clone(),
            Arc::new(slicer.clone()),
            test_config(1),
            Duration::from_secs(5),
            Arc::new(Notify::new()),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(daemon.run(shutdown.clone()));

        // Let the daemon pick the job up, then stop it mid-run
        for _ in 0..50 {
            if store.get(id).await.unwrap().status() == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(store.get(id).await.unwrap().status(), JobStatus::Succeeded);
    }
}

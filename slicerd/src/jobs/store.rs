//! Job storage.
//!
//! [`JobStore`] provides the atomic operations the daemon needs; the type system already
//! guarantees that only valid transitions are attempted, so implementations just record the new
//! state. [`InMemoryJobStore`] keeps every unfinished job plus a bounded number of finished ones,
//! and broadcasts every change to subscribers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use super::JobError;
use super::types::{AnyJob, Job, JobId, JobState, Queued, Running};

/// Finished jobs kept by [`InMemoryJobStore::new`] unless overridden.
pub const DEFAULT_RETAINED_JOBS: usize = 256;

/// Number of jobs in each state. Finished counts only cover retained jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobCounts {
    fn slot(&mut self, job: &AnyJob) -> &mut usize {
        match job {
            AnyJob::Queued(_) => &mut self.queued,
            AnyJob::Running(_) => &mut self.running,
            AnyJob::Succeeded(_) => &mut self.succeeded,
            AnyJob::Failed(_) => &mut self.failed,
        }
    }
}

pub trait JobStore: Send + Sync {
    /// Add a new queued job.
    ///
    /// # Errors
    /// - `QueueFull` if the queue is at capacity
    /// - `InvalidState` if a job with the same ID already exists
    fn submit(&self, job: Job<Queued>) -> impl Future<Output = Result<(), JobError>> + Send;

    /// Atomically move up to `limit` of the oldest queued jobs to `Running`.
    fn claim_jobs(&self, limit: usize) -> impl Future<Output = Result<Vec<Job<Running>>, JobError>> + Send;

    /// Record a job's new state.
    ///
    /// # Errors
    /// - `NotFound` if the job doesn't exist
    /// - `InvalidState` if the stored job is already terminal
    fn persist<T: JobState + Clone>(&self, job: &Job<T>) -> impl Future<Output = Result<(), JobError>> + Send
    where
        AnyJob: From<Job<T>>;

    fn get(&self, id: JobId) -> impl Future<Output = Result<AnyJob, JobError>> + Send;

    fn counts(&self) -> impl Future<Output = JobCounts> + Send;
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, AnyJob>,
    /// Queued job IDs, oldest first
    queue: VecDeque<JobId>,
    /// Terminal job IDs, oldest first
    finished: VecDeque<JobId>,
    counts: JobCounts,
}

impl Inner {
    /// Store `job` under `id`, keeping `counts` in step with the map.
    fn put(&mut self, id: JobId, job: AnyJob) {
        *self.counts.slot(&job) += 1;
        if let Some(previous) = self.jobs.insert(id, job) {
            *self.counts.slot(&previous) -= 1;
        }
    }

    /// Forget the oldest finished jobs until at most `retained` remain.
    fn evict_finished(&mut self, retained: usize) {
        while self.finished.len() > retained {
            let Some(id) = self.finished.pop_front() else {
                break;
            };
            if let Some(job) = self.jobs.remove(&id) {
                *self.counts.slot(&job) -= 1;
                tracing::trace!(job_id = %id, "Evicted finished job");
            }
        }
    }
}

#[derive(Clone)]
pub struct InMemoryJobStore {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
    retained: usize,
    status_tx: broadcast::Sender<AnyJob>,
}

impl InMemoryJobStore {
    /// Create a store that admits at most `capacity` queued jobs.
    pub fn new(capacity: usize) -> Self {
        // Each job broadcasts three transitions; leave room for bursts of submissions
        let (status_tx, _) = broadcast::channel(capacity.max(1) * 8 + 64);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            capacity,
            retained: DEFAULT_RETAINED_JOBS,
            status_tx,
        }
    }

    /// Keep at most `retained` finished jobs. Older ones are dropped and look unknown to `get`.
    pub fn with_retained_jobs(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }

    /// Receive every job state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AnyJob> {
        self.status_tx.subscribe()
    }

    fn broadcast(&self, job: AnyJob) {
        // No subscribers is fine
        let _ = self.status_tx.send(job);
    }
}

impl JobStore for InMemoryJobStore {
    async fn submit(&self, job: Job<Queued>) -> Result<(), JobError> {
        let id = job.data.id;
        {
            let mut inner = self.inner.write();

            if inner.jobs.contains_key(&id) {
                return Err(JobError::InvalidState {
                    id,
                    state: "already submitted".to_string(),
                });
            }
            if inner.queue.len() >= self.capacity {
                return Err(JobError::QueueFull { capacity: self.capacity });
            }

            inner.put(id, job.clone().into());
            inner.queue.push_back(id);
        }

        self.broadcast(job.into());
        Ok(())
    }

    async fn claim_jobs(&self, limit: usize) -> Result<Vec<Job<Running>>, JobError> {
        let now = chrono::Utc::now();
        let mut claimed = Vec::new();
        {
            let mut inner = self.inner.write();

            while claimed.len() < limit {
                let Some(id) = inner.queue.pop_front() else {
                    break;
                };
                let Some(queued) = inner.jobs.get(&id).and_then(AnyJob::as_queued) else {
                    continue;
                };

                let running = Job {
                    state: Running {
                        queued_at: queued.state.queued_at,
                        started_at: now,
                    },
                    data: queued.data.clone(),
                };
                inner.put(id, running.clone().into());
                claimed.push(running);
            }
        }

        for job in &claimed {
            self.broadcast(job.clone().into());
        }
        Ok(claimed)
    }

    async fn persist<T: JobState + Clone>(&self, job: &Job<T>) -> Result<(), JobError>
    where
        AnyJob: From<Job<T>>,
    {
        let id = job.data.id;
        let updated: AnyJob = job.clone().into();
        {
            let mut inner = self.inner.write();
            let existing = inner.jobs.get(&id).ok_or(JobError::NotFound(id))?;

            // Don't overwrite terminal states
            if existing.is_terminal() {
                return Err(JobError::InvalidState {
                    id,
                    state: "terminal".to_string(),
                });
            }
            inner.put(id, updated.clone());

            if updated.is_terminal() {
                inner.finished.push_back(id);
                inner.evict_finished(self.retained);
            }
        }

        self.broadcast(updated);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<AnyJob, JobError> {
        self.inner.read().jobs.get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    async fn counts(&self) -> JobCounts {
        self.inner.read().counts
    }
}

use std::time::Duration;

use super::JobError;
use super::store::JobStore;
use super::types::{FailureReason, Failed, Job, Queued, Running, Succeeded};
use crate::slicer::Slicer;

impl Job<Queued> {
    pub fn new(data: super::JobData) -> Self {
        Job {
            state: Queued {
                queued_at: chrono::Utc::now(),
            },
            data,
        }
    }
}

impl Job<Running> {
    pub async fn succeed<S: JobStore>(self, store: &S) -> Result<Job<Succeeded>, JobError> {
        let job = Job {
            state: Succeeded {
                queued_at: self.state.queued_at,
                started_at: self.state.started_at,
                finished_at: chrono::Utc::now(),
            },
            data: self.data,
        };
        store.persist(&job).await?;
        Ok(job)
    }

    pub async fn fail<S: JobStore>(self, reason: FailureReason, store: &S) -> Result<Job<Failed>, JobError> {
        let job = Job {
            state: Failed {
                reason,
                queued_at: self.state.queued_at,
                started_at: Some(self.state.started_at),
                finished_at: chrono::Utc::now(),
            },
            data: self.data,
        };
        store.persist(&job).await?;
        Ok(job)
    }

    /// Run the slicer for this job and record the outcome.
    ///
    /// Returns:
    /// - `Ok(Ok(succeeded))` if the slicer exited with status 0
    /// - `Ok(Err(failed))` on a non-zero exit, a timeout or a launch failure
    /// - `Err(_)` only if the outcome could not be stored
    pub async fn execute<S: JobStore>(
        self,
        slicer: &dyn Slicer,
        timeout: Duration,
        store: &S,
    ) -> Result<Result<Job<Succeeded>, Job<Failed>>, JobError> {
        let command = self.data.command();

        // Dropping the slicer future on timeout kills the child process
        let reason = match tokio::time::timeout(timeout, slicer.slice(&command)).await {
            Ok(Ok(output)) if output.success() => {
                tracing::trace!(job_id = %self.data.id, stdout = %output.stdout, "Slicer output");
                return self.succeed(store).await.map(Ok);
            }
            Ok(Ok(output)) => FailureReason::Exit {
                exit_code: output.exit_code,
                stderr: output.stderr,
            },
            Ok(Err(e)) => FailureReason::Launch { message: e.to_string() },
            Err(_elapsed) => FailureReason::Timeout { after: timeout },
        };

        self.fail(reason, store).await.map(Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::test_support::sample_job_data;
    use crate::slicer::{MockSlicer, SlicerError};

    async fn running_job(store: &InMemoryJobStore) -> Job<Running> {
        store.submit(Job::new(sample_job_data("cube.stl"))).await.unwrap();
        store.claim_jobs(1).await.unwrap().pop().unwrap()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let store = InMemoryJobStore::new(4);
        let slicer = MockSlicer::new();
        slicer.add_success("Slicing result exported");

        let job = running_job(&store).await;
        let succeeded = job.execute(&slicer, Duration::from_secs(5), &store).await.unwrap().unwrap();

        assert!(succeeded.state.finished_at >= succeeded.state.started_at);
        assert_eq!(slicer.get_calls()[0], succeeded.data.command());
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let store = InMemoryJobStore::new(4);
        let slicer = MockSlicer::new();
        slicer.add_failure(1, "Error: object has no facets\n");

        let job = running_job(&store).await;
        let failed = job.execute(&slicer, Duration::from_secs(5), &store).await.unwrap().unwrap_err();

        assert_eq!(
            failed.state.reason,
            FailureReason::Exit {
                exit_code: Some(1),
                stderr: "Error: object has no facets\n".to_string()
            }
        );
        assert_eq!(failed.state.reason.details(), "Error: object has no facets\n");
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let store = InMemoryJobStore::new(4);
        let slicer = MockSlicer::new().with_delay(Duration::from_secs(5));
        slicer.add_success("too late");

        let job = running_job(&store).await;
        let failed = job.execute(&slicer, Duration::from_millis(50), &store).await.unwrap().unwrap_err();

        assert_eq!(
            failed.state.reason,
            FailureReason::Timeout {
                after: Duration::from_millis(50)
            }
        );
        assert_eq!(failed.state.reason.details(), "Slicer did not finish within 50ms");
    }

    #[tokio::test]
    async fn test_execute_launch_failure() {
        let store = InMemoryJobStore::new(4);
        let slicer = MockSlicer::new();
        slicer.add_response(Err(SlicerError::Other("prusa-slicer: not found".to_string())));

        let job = running_job(&store).await;
        let failed = job.execute(&slicer, Duration::from_secs(5), &store).await.unwrap().unwrap_err();

        assert!(matches!(failed.state.reason, FailureReason::Launch { .. }));
        assert_eq!(failed.state.reason.details(), "prusa-slicer: not found");
    }
}

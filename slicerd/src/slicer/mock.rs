use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{SliceCommand, SliceOutput, Slicer, SlicerError};

/// Slicer stand-in for tests.
///
/// Responses are returned in FIFO order. Every call is recorded, and the peak number of
/// overlapping calls is tracked so concurrency limits can be asserted.
///
/// # Example
/// ```ignore
/// let slicer = MockSlicer::new().with_output_contents("; filament used [mm] = 10\n");
/// slicer.add_success("sliced");
/// slicer.add_failure(1, "Error: manifold");
/// ```
#[derive(Clone, Default)]
pub struct MockSlicer {
    responses: Arc<Mutex<VecDeque<Result<SliceOutput, SlicerError>>>>,
    calls: Arc<Mutex<Vec<SliceCommand>>>,
    delay: Option<Duration>,
    output_contents: Option<String>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
}

impl MockSlicer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// On a successful response, write these contents to the requested output path.
    pub fn with_output_contents(mut self, contents: impl Into<String>) -> Self {
        self.output_contents = Some(contents.into());
        self
    }

    pub fn add_response(&self, response: Result<SliceOutput, SlicerError>) {
        self.responses.lock().push_back(response);
    }

    pub fn add_success(&self, stdout: &str) {
        self.add_response(Ok(SliceOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }));
    }

    pub fn add_failure(&self, exit_code: i32, stderr: &str) {
        self.add_response(Ok(SliceOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }));
    }

    pub fn get_calls(&self) -> Vec<SliceCommand> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Slicer for MockSlicer {
    async fn slice(&self, command: &SliceCommand) -> Result<SliceOutput, SlicerError> {
        self.calls.lock().push(command.clone());

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, Ordering::SeqCst);
        let running = self.running.clone();
        let _guard = scopeguard::guard((), move |_| {
            running.fetch_sub(1, Ordering::SeqCst);
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SlicerError::Other(format!("No mock response configured for {}", command.input.display()))));

        if let (Ok(output), Some(contents)) = (&response, &self.output_contents)
            && output.success()
        {
            tokio::fs::write(&command.output, contents)
                .await
                .map_err(|e| SlicerError::Other(format!("Failed to write mock output {}: {e}", command.output.display())))?;
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slicer::SliceParams;
    use std::path::PathBuf;

    fn command() -> SliceCommand {
        SliceCommand {
            input: PathBuf::from("/tmp/cube.stl"),
            output: PathBuf::from("/tmp/cube.gcode"),
            params: SliceParams::default(),
        }
    }

    #[tokio::test]
    async fn test_responses_in_order() {
        let mock = MockSlicer::new();
        mock.add_success("first");
        mock.add_failure(2, "second");

        let first = mock.slice(&command()).await.unwrap();
        assert!(first.success());
        assert_eq!(first.stdout, "first");

        let second = mock.slice(&command()).await.unwrap();
        assert_eq!(second.exit_code, Some(2));
        assert_eq!(second.stderr, "second");

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.get_calls()[0], command());
    }

    #[tokio::test]
    async fn test_output_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockSlicer::new().with_output_contents("G28\n");
        mock.add_success("");
        let command = SliceCommand {
            output: dir.path().join("missing-dir").join("cube.gcode"),
            ..command()
        };

        match mock.slice(&command).await {
            Err(SlicerError::Other(message)) => assert!(message.starts_with("Failed to write mock output")),
            other => panic!("expected a write error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_response_configured() {
        let mock = MockSlicer::new();
        assert!(matches!(mock.slice(&command()).await, Err(SlicerError::Other(_))));
    }
}

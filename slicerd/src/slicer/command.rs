use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::{SliceCommand, SliceOutput, Slicer, SlicerError};

/// Runs a PrusaSlicer-compatible executable as a child process.
#[derive(Debug, Clone)]
pub struct CommandSlicer {
    program: PathBuf,
}

impl CommandSlicer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl Slicer for CommandSlicer {
    #[tracing::instrument(skip_all, fields(program = %self.program.display(), input = %command.input.display()))]
    async fn slice(&self, command: &SliceCommand) -> Result<SliceOutput, SlicerError> {
        tracing::debug!(args = ?command.args(), "Launching slicer");

        let child = Command::new(&self.program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SlicerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let output = child.wait_with_output().await.map_err(SlicerError::Wait)?;

        let result = SliceOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(exit_code = ?result.exit_code, stderr_len = result.stderr.len(), "Slicer exited");
        Ok(result)
    }
}

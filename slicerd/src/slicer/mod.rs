//! Invocation of the external slicing program.
//!
//! The [`Slicer`] trait abstracts "run the slicer on this input", so the job daemon can be tested
//! without a real slicer installed. [`CommandSlicer`] runs a PrusaSlicer-compatible executable;
//! [`MockSlicer`] returns canned results in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

pub mod command;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use command::CommandSlicer;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockSlicer;

pub const DEFAULT_LAYER_HEIGHT: &str = "0.2";
pub const DEFAULT_INFILL: &str = "15%";
pub const DEFAULT_NOZZLE: &str = "0.4";

/// Print settings forwarded to the slicer unchanged.
///
/// Values are kept as the strings the client sent; the slicer is responsible for rejecting
/// anything it cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SliceParams {
    pub layer_height: String,
    pub infill: String,
    pub nozzle: String,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            layer_height: DEFAULT_LAYER_HEIGHT.to_string(),
            infill: DEFAULT_INFILL.to_string(),
            nozzle: DEFAULT_NOZZLE.to_string(),
        }
    }
}

/// One slicer run: input model, output location and print settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceCommand {
    pub input: PathBuf,
    pub output: PathBuf,
    pub params: SliceParams,
}

impl SliceCommand {
    /// Command line arguments in the order the slicer expects them.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "-g".into(),
            self.input.clone().into(),
            "--layer-height".into(),
            self.params.layer_height.clone().into(),
            "--fill-density".into(),
            self.params.infill.clone().into(),
            "--nozzle-diameter".into(),
            self.params.nozzle.clone().into(),
            "--output".into(),
            self.output.clone().into(),
        ]
    }
}

/// What the slicer process left behind once it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SliceOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum SlicerError {
    #[error("Failed to launch slicer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect slicer output: {0}")]
    Wait(#[source] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Slicer: Send + Sync {
    /// Run the slicer to completion.
    ///
    /// A non-zero exit is not an error here: it is reported through [`SliceOutput::exit_code`].
    /// Errors mean the process could not be run at all. Dropping the returned future must stop
    /// the process, which is how the job daemon enforces its timeout.
    async fn slice(&self, command: &SliceCommand) -> Result<SliceOutput, SlicerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_order() {
        let command = SliceCommand {
            input: PathBuf::from("/app/files/cube.stl"),
            output: PathBuf::from("/app/files/cube.gcode"),
            params: SliceParams {
                layer_height: "0.1".to_string(),
                infill: "40%".to_string(),
                nozzle: "0.6".to_string(),
            },
        };

        let args: Vec<String> = command.args().into_iter().map(|a| a.into_string().unwrap()).collect();
        assert_eq!(
            args,
            [
                "-g",
                "/app/files/cube.stl",
                "--layer-height",
                "0.1",
                "--fill-density",
                "40%",
                "--nozzle-diameter",
                "0.6",
                "--output",
                "/app/files/cube.gcode",
            ]
        );
    }

    #[test]
    fn test_default_params() {
        let params = SliceParams::default();
        assert_eq!(params.layer_height, "0.2");
        assert_eq!(params.infill, "15%");
        assert_eq!(params.nozzle, "0.4");
    }
}

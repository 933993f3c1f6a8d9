//! Storage for uploaded models and the files generated from them.
//!
//! Handlers receive a [`ModelStorage`] trait object from [`crate::AppState`] rather than writing
//! to a hardcoded directory. The only implementation is [`FilesystemStorage`], which keeps every
//! file in one flat directory that is also served under the public route prefix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod filesystem;

pub use filesystem::FilesystemStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Client-supplied name is not a single plain path component
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How stored file names are derived from client-supplied names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
    /// Store under the uploaded name. A later upload with the same name replaces the earlier one.
    #[default]
    Original,
    /// Prefix the uploaded name with a fresh UUID so uploads never collide.
    Unique,
}

/// An uploaded model that has been written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredModel {
    /// Name the client uploaded the file as
    pub original_name: String,
    /// Name the file is stored under
    pub file_name: String,
    pub path: PathBuf,
}

/// Where the slicer is told to write its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOutput {
    pub file_name: String,
    pub path: PathBuf,
}

impl GeneratedOutput {
    /// Route under which the file can be downloaded, e.g. `/files/part.gcode`.
    pub fn public_path(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.file_name)
    }
}

#[async_trait]
pub trait ModelStorage: Send + Sync {
    /// Persist uploaded bytes, replacing any file already stored under the same name.
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredModel, StorageError>;

    /// Output location for a stored model: same name with its extension replaced by `extension`.
    fn output_for(&self, model: &StoredModel, extension: &str) -> GeneratedOutput;

    /// Resolve a stored file by name, failing if it does not exist.
    async fn locate(&self, file_name: &str) -> Result<PathBuf, StorageError>;

    /// Directory backing the public file route.
    fn root(&self) -> &Path;
}

/// Reject anything that is not a single, ordinary file name.
pub fn validate_file_name(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Replace the last dot-delimited extension of `file_name`, or append one if there is none.
pub fn replace_extension(file_name: &str, extension: &str) -> String {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    format!("{stem}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_extension() {
        assert_eq!(replace_extension("part.stl", "gcode"), "part.gcode");
        assert_eq!(replace_extension("bracket.v2.stl", "gcode"), "bracket.v2.gcode");
        assert_eq!(replace_extension("noext", "gcode"), "noext.gcode");
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("part.stl").is_ok());
        assert!(validate_file_name("my part (1).3mf").is_ok());
        for bad in ["", ".", "..", "../escape.stl", "dir/part.stl", "dir\\part.stl"] {
            assert!(
                matches!(validate_file_name(bad), Err(StorageError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_public_path_uses_basename_only() {
        let output = GeneratedOutput {
            file_name: "part.gcode".to_string(),
            path: PathBuf::from("/app/files/part.gcode"),
        };
        assert_eq!(output.public_path("/files"), "/files/part.gcode");
        assert_eq!(output.public_path("/files/"), "/files/part.gcode");
    }
}

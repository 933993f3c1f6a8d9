use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{GeneratedOutput, ModelStorage, NamingStrategy, StorageError, StoredModel, replace_extension, validate_file_name};

/// Flat-directory storage shared with the slicer process.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
    naming: NamingStrategy,
}

impl FilesystemStorage {
    /// Open (and create if needed) the storage directory.
    pub async fn open(root: impl Into<PathBuf>, naming: NamingStrategy) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        tracing::info!(root = %root.display(), ?naming, "Opened model storage");
        Ok(Self { root, naming })
    }

    fn stored_name(&self, original_name: &str) -> String {
        match self.naming {
            NamingStrategy::Original => original_name.to_string(),
            NamingStrategy::Unique => format!("{}-{}", Uuid::new_v4(), original_name),
        }
    }
}

#[async_trait]
impl ModelStorage for FilesystemStorage {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredModel, StorageError> {
        validate_file_name(original_name)?;

        let file_name = self.stored_name(original_name);
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, bytes).await.map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(file_name = %file_name, "Stored uploaded model");

        Ok(StoredModel {
            original_name: original_name.to_string(),
            file_name,
            path,
        })
    }

    fn output_for(&self, model: &StoredModel, extension: &str) -> GeneratedOutput {
        let file_name = replace_extension(&model.file_name, extension);
        GeneratedOutput {
            path: self.root.join(&file_name),
            file_name,
        }
    }

    async fn locate(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        validate_file_name(file_name).map_err(|_| StorageError::NotFound(file_name.to_string()))?;

        let path = self.root.join(file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound(file_name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(file_name.to_string())),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_overwrites_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::open(dir.path(), NamingStrategy::Original).await.unwrap();

        let first = storage.save("cube.stl", b"first").await.unwrap();
        let second = storage.save("cube.stl", b"second").await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(second.path, dir.path().join("cube.stl"));
        assert_eq!(tokio::fs::read(&second.path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_unique_naming_keeps_both_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::open(dir.path(), NamingStrategy::Unique).await.unwrap();

        let first = storage.save("cube.stl", b"first").await.unwrap();
        let second = storage.save("cube.stl", b"second").await.unwrap();

        assert_ne!(first.file_name, second.file_name);
        assert!(first.file_name.ends_with("-cube.stl"));
        assert_eq!(first.original_name, "cube.stl");
        assert_eq!(tokio::fs::read(&first.path).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&second.path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_output_for_replaces_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::open(dir.path(), NamingStrategy::Original).await.unwrap();
        let model = storage.save("bracket.stl", b"solid").await.unwrap();

        let output = storage.output_for(&model, "gcode");
        assert_eq!(output.file_name, "bracket.gcode");
        assert_eq!(output.path, dir.path().join("bracket.gcode"));
    }

    #[tokio::test]
    async fn test_save_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::open(dir.path().join("files"), NamingStrategy::Original).await.unwrap();

        let result = storage.save("../outside.stl", b"x").await;
        assert!(matches!(result, Err(StorageError::InvalidName(_))));
        assert!(!dir.path().join("outside.stl").exists());
    }

    #[tokio::test]
    async fn test_locate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::open(dir.path(), NamingStrategy::Original).await.unwrap();
        storage.save("cube.stl", b"x").await.unwrap();

        assert_eq!(storage.locate("cube.stl").await.unwrap(), dir.path().join("cube.stl"));
        assert!(matches!(storage.locate("missing.gcode").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.locate("../cube.stl").await, Err(StorageError::NotFound(_))));
    }
}

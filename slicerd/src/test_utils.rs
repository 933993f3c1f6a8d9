//! Test utilities for integration testing (available with `test-utils` feature).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tempfile::TempDir;

use crate::config::{Config, SlicerConfig};
use crate::jobs::DaemonConfig;
use crate::slicer::MockSlicer;
use crate::{Application, BackgroundServices};

/// A test server backed by a temporary storage directory.
///
/// The directory and background services live as long as this struct.
pub struct TestApp {
    pub server: TestServer,
    pub bg_services: BackgroundServices,
    dir: TempDir,
}

impl TestApp {
    /// Storage directory the server reads and writes.
    pub fn files_dir(&self) -> PathBuf {
        self.dir.path().join("files")
    }

    /// Put a file straight into storage, as if the slicer had generated it.
    pub async fn write_file(&self, name: &str, contents: &str) {
        tokio::fs::write(self.files_dir().join(name), contents)
            .await
            .expect("Failed to write test file");
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        slicer: SlicerConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        jobs: DaemonConfig {
            max_concurrent: 2,
            queue_capacity: 8,
            claim_interval: Duration::from_millis(20),
            status_log_interval: None,
            retained_jobs: 64,
        },
        ..Default::default()
    }
}

pub async fn create_test_app(slicer: MockSlicer) -> TestApp {
    create_test_app_with_config(create_test_config(), slicer).await
}

/// Start an application with `config`, storing files in a fresh temporary directory.
pub async fn create_test_app_with_config(mut config: Config, slicer: MockSlicer) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    config.storage.dir = dir.path().join("files");

    let app = Application::with_slicer(config, Arc::new(slicer))
        .await
        .expect("Failed to create application");
    let (server, bg_services) = app.into_test_server();

    TestApp { server, bg_services, dir }
}

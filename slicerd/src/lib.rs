//! # slicerd: HTTP front-end for a command-line 3D slicer
//!
//! `slicerd` accepts 3D model uploads over HTTP, runs an external PrusaSlicer-compatible program
//! on them and serves the resulting G-code. It also estimates a print price from the filament
//! usage the slicer writes into its output.
//!
//! ## Overview
//!
//! A client uploads a model as multipart form data together with optional print settings
//! (`layer_height`, `infill`, `nozzle`). The model is written to a flat storage directory, and a
//! slicing job is queued. A background daemon runs the slicer for queued jobs, never more than
//! `jobs.max_concurrent` at a time and each under `slicer.timeout`. The client either waits for
//! the result (`POST /slice`) or polls for it (`POST /jobs`, then `GET /jobs/{id}`). Generated
//! files are served back under the public prefix, `/files` by default.
//!
//! ## Architecture
//!
//! - **[`api`]**: Axum handlers and request/response models
//! - **[`storage`]**: the [`storage::ModelStorage`] trait and its filesystem implementation
//! - **[`slicer`]**: the [`slicer::Slicer`] trait and the subprocess runner
//! - **[`jobs`]**: typestate jobs, the bounded in-memory job store and the worker daemon
//! - **[`pricing`]**: filament marker scanning and price calculation
//! - **[`config`]**, **[`telemetry`]**, **[`errors`]**: configuration, tracing setup, HTTP errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use slicerd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = slicerd::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     slicerd::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod pricing;
pub mod slicer;
pub mod storage;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};

pub use config::Config;

use crate::config::CorsOrigin;
use crate::jobs::JobManager;
use crate::pricing::PriceEstimator;
use crate::slicer::{CommandSlicer, Slicer};
use crate::storage::{FilesystemStorage, ModelStorage};

/// Shared state for all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .storage(storage)
///     .jobs(jobs)
///     .estimator(estimator)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn ModelStorage>,
    pub jobs: Arc<JobManager>,
    pub estimator: PriceEstimator,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a path, but Url always serializes one
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(max_age);
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Stored and generated files are served from the storage root under `config.public_prefix`.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{estimates, health, jobs, slice};

    let files = ServeDir::new(state.storage.root());

    let router = Router::new()
        .route("/slice", post(slice::slice_model))
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/estimates/{file_name}", get(estimates::estimate_price))
        .route("/healthz", get(health::healthz))
        .nest_service(&state.config.public_prefix, files)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .with_state(state.clone());

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks that run alongside the HTTP server: currently the job daemon.
///
/// Dropping this struct cancels the shutdown token through `drop_guard`, which stops the daemon.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Stop claiming new jobs and wait for running slicer processes to finish
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(jobs: &JobManager, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();

    let daemon = jobs.run(shutdown_token.clone());
    let handle = tokio::spawn(async move {
        match daemon.await {
            Ok(Ok(())) => info!("Job daemon stopped"),
            Ok(Err(e)) => tracing::error!("Job daemon error: {}", e),
            Err(e) => tracing::error!("Job daemon panicked: {}", e),
        }
    });

    BackgroundServices {
        background_tasks: vec![handle],
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The running service.
///
/// 1. **Create**: [`Application::new`] opens storage and starts the job daemon
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests
/// 3. **Shutdown**: once the shutdown future resolves, in-flight requests and jobs are finished
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create an application that runs `config.slicer.program` as the slicer
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let slicer = Arc::new(CommandSlicer::new(config.slicer.program.clone()));
        Self::with_slicer(config, slicer).await
    }

    /// Create an application with a specific [`Slicer`] implementation
    pub async fn with_slicer(config: Config, slicer: Arc<dyn Slicer>) -> anyhow::Result<Self> {
        debug!("Starting slicerd with configuration: {:#?}", config);

        let storage = FilesystemStorage::open(&config.storage.dir, config.storage.naming).await?;
        let jobs = Arc::new(JobManager::new(slicer, config.jobs.clone(), config.slicer.timeout));
        let estimator = PriceEstimator::new(config.pricing.marker.clone(), config.pricing.price_per_mm);

        let bg_services = setup_background_services(&jobs, CancellationToken::new());

        let app_state = AppState::builder()
            .config(config.clone())
            .storage(Arc::new(storage))
            .jobs(jobs)
            .estimator(estimator)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "slicerd listening on http://{}, serving files from {} under {}",
            bind_addr,
            self.config.storage.dir.display(),
            self.config.public_prefix
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Waiting for running slicing jobs...");
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

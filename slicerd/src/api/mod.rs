//! HTTP API.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request and response bodies
//!
//! # Routes
//!
//! - `POST /slice`: upload a model and wait for the slicer to finish
//! - `POST /jobs`, `GET /jobs/{id}`: the same upload, queued and polled
//! - `GET /estimates/{filename}`: price estimate for a generated file
//! - `GET /healthz`: liveness and queue depth
//!
//! Stored and generated files are served under the configured public prefix (`/files` by default).

pub mod handlers;
pub mod models;

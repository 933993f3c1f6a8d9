//! Application configuration.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be changed with the `-f` flag or the `SLICERD_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SLICERD_` override YAML values
//!
//! Nested values use double underscores, e.g. `SLICERD_JOBS__MAX_CONCURRENT=4` sets
//! `jobs.max_concurrent`.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! SLICERD_PORT=8080
//! SLICERD_STORAGE__DIR=/var/lib/slicerd/files
//! SLICERD_SLICER__PROGRAM=/opt/prusa/prusa-slicer
//! SLICERD_SLICER__TIMEOUT=2m
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;
use crate::jobs::DaemonConfig;
use crate::pricing::FilamentStrategy;
use crate::storage::NamingStrategy;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SLICERD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Route prefix under which stored and generated files are served
    pub public_prefix: String,
    /// Largest accepted request body, in bytes
    pub max_upload_bytes: usize,
    /// Export traces over OTLP (configured via the standard `OTEL_*` environment variables)
    pub enable_otel_export: bool,
    pub storage: StorageConfig,
    pub slicer: SlicerConfig,
    /// Worker pool and queue settings
    pub jobs: DaemonConfig,
    pub pricing: PricingConfig,
    pub cors: CorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_prefix: "/files".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            enable_otel_export: false,
            storage: StorageConfig::default(),
            slicer: SlicerConfig::default(),
            jobs: DaemonConfig::default(),
            pricing: PricingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Where uploads and generated files live.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub naming: NamingStrategy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/app/files"),
            naming: NamingStrategy::Original,
        }
    }
}

/// External slicer program settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlicerConfig {
    /// Executable name or path, resolved through `PATH` when not absolute
    pub program: PathBuf,
    /// Extension given to generated files (without the dot)
    pub output_extension: String,
    /// A slicer run taking longer than this is killed and its job fails
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("prusa-slicer"),
            output_extension: "gcode".to_string(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Price estimation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingConfig {
    /// Substring identifying the filament usage line in generated files
    pub marker: String,
    /// Price per millimetre of filament
    pub price_per_mm: Decimal,
    /// Strategy used when a request does not name one
    pub strategy: FilamentStrategy,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            marker: "filament used".to_string(),
            price_per_mm: Decimal::new(2, 2),
            strategy: FilamentStrategy::Last,
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this long
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: None,
        }
    }
}

/// An allowed CORS origin.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        if self.jobs.max_concurrent == 0 {
            return Err(invalid("jobs.max_concurrent must be at least 1".to_string()));
        }

        if self.jobs.queue_capacity == 0 {
            return Err(invalid("jobs.queue_capacity must be at least 1".to_string()));
        }

        if self.jobs.retained_jobs == 0 {
            return Err(invalid("jobs.retained_jobs must be at least 1".to_string()));
        }

        if self.jobs.claim_interval.is_zero() {
            return Err(invalid("jobs.claim_interval cannot be 0".to_string()));
        }

        if self.slicer.timeout.is_zero() {
            return Err(invalid("slicer.timeout cannot be 0".to_string()));
        }

        if self.slicer.output_extension.is_empty() || self.slicer.output_extension.contains(['.', '/', '\\']) {
            return Err(invalid(format!(
                "slicer.output_extension ({:?}) must be a non-empty extension without dots or separators, e.g. \"gcode\"",
                self.slicer.output_extension
            )));
        }

        if !self.public_prefix.starts_with('/') || self.public_prefix.len() < 2 || self.public_prefix.ends_with('/') {
            return Err(invalid(format!(
                "public_prefix ({:?}) must start with '/' and must not end with '/', e.g. \"/files\"",
                self.public_prefix
            )));
        }

        if self.pricing.marker.is_empty() {
            return Err(invalid("pricing.marker cannot be empty".to_string()));
        }

        if self.pricing.price_per_mm.is_sign_negative() {
            return Err(invalid(format!(
                "pricing.price_per_mm ({}) cannot be negative",
                self.pricing.price_per_mm
            )));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(invalid(
                "CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            ));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values
            .merge(Env::prefixed("SLICERD_").split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

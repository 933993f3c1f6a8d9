use crate::jobs::JobError;
use crate::pricing::PricingError;
use crate::storage::StorageError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Multipart body had no `model` file part
    #[error("No model uploaded")]
    MissingModel,

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Upload exceeded the configured body limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// The slicer ran but did not produce a result. `details` is shown to the caller verbatim.
    #[error("Slicing failed: {details}")]
    SlicingFailed { details: String },

    /// Admission control rejected the job
    #[error("Slicing queue is full ({capacity} jobs queued)")]
    QueueFull { capacity: usize },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingModel | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::SlicingFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::MissingModel => "No model uploaded".to_string(),
            Error::BadRequest { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} {id} not found"),
            Error::SlicingFailed { .. } => "Slicing failed".to_string(),
            Error::QueueFull { .. } => "Slicing queue is full".to_string(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::SlicingFailed { .. } => {
                tracing::warn!("{}", self);
            }
            Error::QueueFull { .. } => {
                tracing::warn!("Rejected job: {}", self);
            }
            Error::MissingModel | Error::BadRequest { .. } | Error::PayloadTooLarge { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = match &self {
            Error::SlicingFailed { details } => json!({
                "error": self.user_message(),
                "details": details,
            }),
            _ => json!({ "error": self.user_message() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName(_) => Error::BadRequest {
                message: "Invalid model filename".to_string(),
            },
            StorageError::NotFound(name) => Error::NotFound {
                resource: "File".to_string(),
                id: name,
            },
            StorageError::Io { .. } => Error::Internal {
                operation: err.to_string(),
            },
        }
    }
}

impl From<JobError> for Error {
    fn from(err: JobError) -> Self {
        match err {
            JobError::QueueFull { capacity } => Error::QueueFull { capacity },
            JobError::NotFound(id) => Error::NotFound {
                resource: "Job".to_string(),
                id: id.to_string(),
            },
            JobError::InvalidState { .. } | JobError::Closed => Error::Internal {
                operation: err.to_string(),
            },
        }
    }
}

impl From<PricingError> for Error {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound => Error::NotFound {
                resource: "File".to_string(),
                id: err.file_name().unwrap_or_default(),
            },
            PricingError::Io { .. } => Error::Internal {
                operation: err.to_string(),
            },
            PricingError::FilamentOverflow { .. } | PricingError::PriceOverflow { .. } => Error::BadRequest {
                message: "Filament usage is too large to price".to_string(),
            },
        }
    }
}

impl From<MultipartError> for Error {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge {
                message: "Upload exceeds the maximum allowed size".to_string(),
            }
        } else {
            Error::BadRequest {
                message: format!("Failed to parse multipart data: {}", err.body_text()),
            }
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

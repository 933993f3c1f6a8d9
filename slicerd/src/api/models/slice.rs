use axum::body::Bytes;
use serde::{Deserialize, Serialize};

use crate::slicer::SliceParams;

/// Parsed multipart body shared by `POST /slice` and `POST /jobs`.
#[derive(Debug, Clone)]
pub struct SliceUpload {
    /// File name supplied by the client for the `model` part
    pub model_name: String,
    pub model: Bytes,
    /// Missing form fields are filled with defaults; empty ones are passed through
    pub params: SliceParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceResponse {
    pub message: String,
    /// Public path of the generated file, e.g. `/files/part.gcode`
    pub gcode_path: String,
}

impl SliceResponse {
    pub fn success(gcode_path: String) -> Self {
        Self {
            message: "Slicing successful".to_string(),
            gcode_path,
        }
    }
}

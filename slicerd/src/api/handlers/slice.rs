use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
};

use crate::AppState;
use crate::api::models::slice::{SliceResponse, SliceUpload};
use crate::errors::{Error, Result};
use crate::jobs::{AnyJob, JobData};
use crate::slicer::SliceParams;

/// Read the `model` file part and the optional print settings from a multipart body.
///
/// A request that is not multipart at all, or whose `model` part has no file name, is treated as
/// having no model, as is a body that cannot be parsed. Only the first `model` part is used.
pub(crate) async fn read_slice_upload(multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<SliceUpload> {
    let Ok(mut multipart) = multipart else {
        return Err(Error::MissingModel);
    };

    let mut model = None;
    let mut params = SliceParams::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(e.into()),
            Err(e) => {
                // An unreadable body carries no model
                tracing::debug!(error = %e.body_text(), "Stopped reading malformed multipart body");
                break;
            }
        };

        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "model" if model.is_none() => {
                let Some(file_name) = field.file_name().filter(|name| !name.is_empty()).map(str::to_string) else {
                    continue;
                };
                let bytes = field.bytes().await?;
                tracing::debug!(file_name = %file_name, size = bytes.len(), "Received model upload");
                model = Some((file_name, bytes));
            }
            "layer_height" => params.layer_height = field.text().await?,
            "infill" => params.infill = field.text().await?,
            "nozzle" => params.nozzle = field.text().await?,
            other => {
                tracing::trace!(field = other, "Ignoring multipart field");
            }
        }
    }

    let (model_name, model) = model.ok_or(Error::MissingModel)?;
    Ok(SliceUpload {
        model_name,
        model,
        params,
    })
}

/// Store the uploaded model and describe the slicer run for it.
pub(crate) async fn stage_job(state: &AppState, upload: SliceUpload) -> Result<JobData> {
    let model = state.storage.save(&upload.model_name, &upload.model).await?;
    let output = state.storage.output_for(&model, &state.config.slicer.output_extension);
    Ok(JobData::new(model, output, upload.params))
}

/// Slice an uploaded model and wait for the result.
///
/// The slicer runs on the job queue; this handler only waits for the job to finish, so a full
/// queue is reported as 503 instead of piling up processes.
#[tracing::instrument(skip_all)]
pub async fn slice_model(State(state): State<AppState>, multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<Json<SliceResponse>> {
    let upload = read_slice_upload(multipart).await?;
    let data = stage_job(&state, upload).await?;
    let id = state.jobs.submit(data).await?;

    match state.jobs.wait_for_terminal(id).await? {
        AnyJob::Succeeded(job) => {
            let gcode_path = job.data.output.public_path(&state.config.public_prefix);
            Ok(Json(SliceResponse::success(gcode_path)))
        }
        AnyJob::Failed(job) => Err(Error::SlicingFailed {
            details: job.state.reason.details(),
        }),
        other => Err(Error::Internal {
            operation: format!("wait for job {id}: stopped waiting in state {:?}", other.status()),
        }),
    }
}

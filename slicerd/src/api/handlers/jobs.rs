use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{StatusCode, header},
    response::IntoResponse,
};

use super::slice::{read_slice_upload, stage_job};
use crate::AppState;
use crate::api::models::jobs::{JobCreatedResponse, JobResponse};
use crate::errors::Result;
use crate::jobs::{JobId, JobStatus};

/// Queue a slicing job and return immediately with a URL to poll.
#[tracing::instrument(skip_all)]
pub async fn create_job(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    let upload = read_slice_upload(multipart).await?;
    let data = stage_job(&state, upload).await?;
    let id = state.jobs.submit(data).await?;

    let status_url = format!("/jobs/{id}");
    tracing::info!(job_id = %id, "Accepted slicing job");

    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, status_url.clone())],
        Json(JobCreatedResponse {
            id,
            status: JobStatus::Queued,
            status_url,
        }),
    ))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<JobId>) -> Result<Json<JobResponse>> {
    let job = state.jobs.get(id).await?;
    Ok(Json(JobResponse::from_job(&job, &state.config.public_prefix)))
}

#[cfg(test)]
mod tests {
    use crate::api::models::jobs::{JobCreatedResponse, JobResponse};
    use crate::jobs::JobStatus;
    use crate::slicer::MockSlicer;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config};
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::json;
    use std::time::Duration;

    fn model_form(file_name: &str) -> MultipartForm {
        MultipartForm::new().add_part("model", Part::bytes(b"solid".as_slice()).file_name(file_name))
    }

    async fn poll_until_finished(server: &axum_test::TestServer, url: &str) -> JobResponse {
        for _ in 0..100 {
            let job: JobResponse = server.get(url).await.json();
            if matches!(job.status, JobStatus::Succeeded | JobStatus::Failed) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job at {url} did not finish");
    }

    #[test_log::test(tokio::test)]
    async fn test_create_and_poll_job() {
        let slicer = MockSlicer::new().with_delay(Duration::from_millis(50));
        slicer.add_success("");
        let app = create_test_app(slicer).await;

        let response = app.server.post("/jobs").multipart(model_form("gear.stl")).await;
        response.assert_status(StatusCode::ACCEPTED);
        let created: JobCreatedResponse = response.json();
        assert_eq!(created.status, JobStatus::Queued);
        assert_eq!(created.status_url, format!("/jobs/{}", created.id));
        assert_eq!(response.header("location"), created.status_url.as_str());

        let job = poll_until_finished(&app.server, &created.status_url).await;
        assert_eq!(job.id, created.id);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.gcode_path.as_deref(), Some("/files/gear.gcode"));
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_reports_details() {
        let slicer = MockSlicer::new();
        slicer.add_failure(2, "Error: non-manifold mesh\n");
        let app = create_test_app(slicer).await;

        let created: JobCreatedResponse = app.server.post("/jobs").multipart(model_form("gear.stl")).await.json();
        let job = poll_until_finished(&app.server, &created.status_url).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Slicing failed"));
        assert_eq!(job.details.as_deref(), Some("Error: non-manifold mesh\n"));
        assert!(job.gcode_path.is_none());
    }

    #[tokio::test]
    async fn test_timed_out_job() {
        let slicer = MockSlicer::new().with_delay(Duration::from_secs(10));
        slicer.add_success("");
        let mut config = create_test_config();
        config.slicer.timeout = Duration::from_millis(50);
        let app = create_test_app_with_config(config, slicer).await;

        let response = app.server.post("/slice").multipart(model_form("slow.stl")).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({
            "error": "Slicing failed",
            "details": "Slicer did not finish within 50ms",
        }));
    }

    #[tokio::test]
    async fn test_queue_full() {
        // One worker, one queue slot: the first job runs, the second waits, the third is rejected
        let slicer = MockSlicer::new().with_delay(Duration::from_secs(10));
        let mut config = create_test_config();
        config.jobs.max_concurrent = 1;
        config.jobs.queue_capacity = 1;
        let app = create_test_app_with_config(config, slicer.clone()).await;

        let first: JobCreatedResponse = app.server.post("/jobs").multipart(model_form("a.stl")).await.json();
        for _ in 0..100 {
            if slicer.call_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let running: JobResponse = app.server.get(&first.status_url).await.json();
        assert_eq!(running.status, JobStatus::Running);

        app.server
            .post("/jobs")
            .multipart(model_form("b.stl"))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let rejected = app.server.post("/jobs").multipart(model_form("c.stl")).await;
        rejected.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        rejected.assert_json(&json!({ "error": "Slicing queue is full" }));

        let rejected = app.server.post("/slice").multipart(model_form("d.stl")).await;
        rejected.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_finished_job_is_forgotten_once_retention_is_exceeded() {
        let slicer = MockSlicer::new();
        slicer.add_success("");
        slicer.add_success("");
        let mut config = create_test_config();
        config.jobs.retained_jobs = 1;
        let app = create_test_app_with_config(config, slicer).await;

        let first: JobCreatedResponse = app.server.post("/jobs").multipart(model_form("a.stl")).await.json();
        poll_until_finished(&app.server, &first.status_url).await;

        let second: JobCreatedResponse = app.server.post("/jobs").multipart(model_form("b.stl")).await.json();
        poll_until_finished(&app.server, &second.status_url).await;

        let response = app.server.get(&first.status_url).await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "error": format!("Job {} not found", first.id) }));
        app.server.get(&second.status_url).await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let app = create_test_app(MockSlicer::new()).await;

        let response = app.server.get(&format!("/jobs/{}", uuid::Uuid::new_v4())).await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}

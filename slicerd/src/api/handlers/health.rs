use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queued: usize,
    pub running: usize,
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.jobs.counts().await;
    Json(HealthResponse {
        status: "ok",
        queued: counts.queued,
        running: counts.running,
    })
}

#[cfg(test)]
mod tests {
    use crate::slicer::MockSlicer;
    use crate::test_utils::create_test_app;
    use serde_json::json;

    #[tokio::test]
    async fn test_healthz() {
        let app = create_test_app(MockSlicer::new()).await;

        let response = app.server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok", "queued": 0, "running": 0 }));
    }
}

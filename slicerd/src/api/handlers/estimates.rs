use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::AppState;
use crate::api::models::estimates::{EstimateQuery, EstimateResponse};
use crate::errors::Result;

/// Estimate the print price of a stored file from its filament usage.
#[tracing::instrument(skip(state))]
pub async fn estimate_price(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Query(query): Query<EstimateQuery>,
) -> Result<Json<EstimateResponse>> {
    let strategy = query.strategy.unwrap_or(state.config.pricing.strategy);
    let path = state.storage.locate(&file_name).await?;
    let estimate = state.estimator.estimate_file(&path, strategy).await?;

    Ok(Json(EstimateResponse::new(file_name, strategy, estimate)))
}

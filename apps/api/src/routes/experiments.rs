use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::experiment::{Experiment, ExperimentReport};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartExperimentRequest {
    pub model_type: String,
    pub challenger_id: Uuid,
}

/// POST /api/v1/experiments
pub async fn handle_start_experiment(
    State(state): State<AppState>,
    Json(req): Json<StartExperimentRequest>,
) -> Result<(StatusCode, Json<Experiment>), AppError> {
    let experiment = state
        .pipeline
        .start_experiment(&req.model_type, req.challenger_id)
        .await?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /api/v1/experiments/:model_type
pub async fn handle_experiment_report(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
) -> Result<Json<ExperimentReport>, AppError> {
    Ok(Json(state.pipeline.experiment_report(&model_type).await?))
}

/// DELETE /api/v1/experiments/:model_type
pub async fn handle_end_experiment(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
) -> Result<Json<ExperimentReport>, AppError> {
    Ok(Json(state.pipeline.end_experiment(&model_type).await?))
}

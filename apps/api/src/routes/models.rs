use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::model::{MLModel, ModelMetrics};
use crate::models::profile::LabeledPair;
use crate::monitoring::MonitoringReport;
use crate::state::AppState;
use crate::training::ModelConfig;

#[derive(Deserialize)]
pub struct TrainRequest {
    pub pairs: Vec<LabeledPair>,
    #[serde(default)]
    pub config: Option<ModelConfig>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub pairs: Vec<LabeledPair>,
}

/// POST /api/v1/models/train
pub async fn handle_train(
    State(state): State<AppState>,
    Json(req): Json<TrainRequest>,
) -> Result<(StatusCode, Json<MLModel>), AppError> {
    let config = req.config.unwrap_or_else(|| ModelConfig {
        model_type: state.config.pipeline.default_model_type.clone(),
        ..ModelConfig::default()
    });
    let data = state.pipeline.build_training_data(&req.pairs).await?;
    let model = state.pipeline.train_model(data, config, req.name).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// GET /api/v1/models/active
pub async fn handle_active_models(
    State(state): State<AppState>,
) -> Result<Json<Vec<MLModel>>, AppError> {
    Ok(Json(state.pipeline.get_active_models().await?))
}

/// POST /api/v1/models/:id/deploy
pub async fn handle_deploy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MLModel>, AppError> {
    Ok(Json(state.pipeline.deploy_model(id).await?))
}

/// POST /api/v1/models/:id/evaluate
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<ModelMetrics>, AppError> {
    let data = state.pipeline.build_training_data(&req.pairs).await?;
    let metrics = state.pipeline.evaluate_model(id, data.samples()).await?;
    Ok(Json(metrics))
}

/// GET /api/v1/models/:id/metrics
pub async fn handle_model_metrics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ModelMetrics>, AppError> {
    state
        .pipeline
        .get_model_metrics(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No metrics recorded for model {id}")))
}

/// POST /api/v1/models/:id/retrain
pub async fn handle_retrain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MLModel>, AppError> {
    Ok(Json(state.pipeline.retrain_model(id).await?))
}

/// POST /api/v1/monitoring/run
pub async fn handle_run_monitoring(
    State(state): State<AppState>,
) -> Result<Json<MonitoringReport>, AppError> {
    Ok(Json(state.pipeline.monitor_models(Utc::now()).await?))
}

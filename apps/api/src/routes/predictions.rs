use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::features::FeatureVector;
use crate::models::model::{PredictionLogEntry, PredictionResult};
use crate::models::profile::{CandidateProfile, JobProfile};
use crate::pipeline::PredictOptions;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PairRequest {
    pub candidate: CandidateProfile,
    pub job: JobProfile,
}

#[derive(Deserialize)]
pub struct PredictRequest {
    pub candidate: CandidateProfile,
    pub job: JobProfile,
    #[serde(flatten)]
    pub options: PredictOptions,
}

#[derive(Deserialize)]
pub struct BatchPredictRequest {
    pub pairs: Vec<PairRequest>,
    #[serde(flatten)]
    pub options: PredictOptions,
}

#[derive(Deserialize)]
pub struct OutcomeRequest {
    pub positive: bool,
}

/// POST /api/v1/features
pub async fn handle_extract_features(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> Result<Json<FeatureVector>, AppError> {
    let features = state.pipeline.extract_features(&req.candidate, &req.job).await?;
    Ok(Json(features))
}

/// POST /api/v1/predictions
pub async fn handle_predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictionResult>, AppError> {
    let result = state
        .pipeline
        .predict_with(&req.candidate, &req.job, &req.options)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/predictions/batch
pub async fn handle_predict_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchPredictRequest>,
) -> Result<Json<Vec<PredictionResult>>, AppError> {
    let pairs: Vec<(CandidateProfile, JobProfile)> = req
        .pairs
        .into_iter()
        .map(|p| (p.candidate, p.job))
        .collect();
    let results = state.pipeline.predict_batch(&pairs, &req.options).await?;
    Ok(Json(results))
}

/// POST /api/v1/predictions/:id/outcome
pub async fn handle_record_outcome(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<PredictionLogEntry>, AppError> {
    let entry = state.pipeline.record_outcome(id, req.positive).await?;
    Ok(Json(entry))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::experiment::ExperimentError;
use crate::features::{EmbeddingError, ExtractionError};
use crate::pipeline::PipelineError;
use crate::registry::RegistryError;
use crate::serving::PredictionError;
use crate::training::TrainingError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active model: {0}")]
    NoActiveModel(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::NoActiveModel { .. } => AppError::NoActiveModel(message),
            PipelineError::ModelNotFound(_)
            | PipelineError::PredictionNotFound(_)
            | PipelineError::Registry(RegistryError::NotFound(_))
            | PipelineError::Experiment(ExperimentError::NotFound(_)) => AppError::NotFound(message),
            PipelineError::InvalidInput(_) | PipelineError::Experiment(ExperimentError::SameModel) => {
                AppError::Validation(message)
            }
            PipelineError::Experiment(ExperimentError::AlreadyRunning(_))
            | PipelineError::OutcomeAlreadyRecorded(_)
            | PipelineError::RetrainingInProgress(_) => AppError::Conflict(message),
            PipelineError::Extraction(ExtractionError::Embedding(EmbeddingError::Timeout(_)))
            | PipelineError::Prediction(PredictionError::Timeout(_)) => AppError::Timeout(message),
            PipelineError::Extraction(ExtractionError::MissingField { .. })
            | PipelineError::Extraction(ExtractionError::InvalidField { .. })
            | PipelineError::Prediction(PredictionError::DimensionMismatch { .. })
            | PipelineError::Prediction(PredictionError::MalformedFeatures(_))
            | PipelineError::Training(TrainingError::InsufficientData { .. })
            | PipelineError::Training(TrainingError::DimensionMismatch { .. })
            | PipelineError::Training(TrainingError::InvalidSample { .. })
            | PipelineError::Training(TrainingError::UnsupportedAlgorithm(_)) => {
                AppError::UnprocessableEntity(message)
            }
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::NoActiveModel(msg) => (StatusCode::NOT_FOUND, "NO_ACTIVE_MODEL", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Timeout(msg) => {
                tracing::warn!("Request timed out: {msg}");
                (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

/// GET /health
/// Returns service status, version and how many models are serving.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let active = state.pipeline.get_active_models().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "match-pipeline",
        "active_models": active.len()
    })))
}

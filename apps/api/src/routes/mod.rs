pub mod experiments;
pub mod health;
pub mod models;
pub mod predictions;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Features & serving
        .route("/api/v1/features", post(predictions::handle_extract_features))
        .route("/api/v1/predictions", post(predictions::handle_predict))
        .route(
            "/api/v1/predictions/batch",
            post(predictions::handle_predict_batch),
        )
        .route(
            "/api/v1/predictions/:id/outcome",
            post(predictions::handle_record_outcome),
        )
        // Model lifecycle
        .route("/api/v1/models/train", post(models::handle_train))
        .route("/api/v1/models/active", get(models::handle_active_models))
        .route("/api/v1/models/:id/deploy", post(models::handle_deploy))
        .route("/api/v1/models/:id/evaluate", post(models::handle_evaluate))
        .route("/api/v1/models/:id/metrics", get(models::handle_model_metrics))
        .route("/api/v1/models/:id/retrain", post(models::handle_retrain))
        .route("/api/v1/monitoring/run", post(models::handle_run_monitoring))
        // Experiments
        .route(
            "/api/v1/experiments",
            post(experiments::handle_start_experiment),
        )
        .route(
            "/api/v1/experiments/:model_type",
            get(experiments::handle_experiment_report).delete(experiments::handle_end_experiment),
        )
        .with_state(state)
}

//! Model Registry: durable source of truth for trained models and the prediction log.
//!
//! `activate` is the only writer of persisted `active` flags. Implementations must
//! deactivate every sibling of the same type and activate the target as one atomic unit,
//! serialized per model type.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::model::{MLModel, ModelMetrics, PredictionLogEntry};
use crate::training::data::TrainingSample;

pub use memory::InMemoryModelRegistry;
pub use postgres::PgModelRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model {0} not found")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt registry record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Result of storing an observed label. Labels are write-once.
#[derive(Debug, Clone)]
pub enum OutcomeUpdate {
    Recorded(PredictionLogEntry),
    /// The prediction already had a label; the stored entry is returned unchanged.
    AlreadyRecorded(PredictionLogEntry),
}

/// Result of an activation: the now-active model and the siblings it replaced.
#[derive(Debug, Clone)]
pub struct Activation {
    pub model: MLModel,
    pub deactivated: Vec<Uuid>,
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn insert(&self, model: &MLModel) -> Result<(), RegistryError>;

    async fn get(&self, id: Uuid) -> Result<Option<MLModel>, RegistryError>;

    async fn list_active(&self) -> Result<Vec<MLModel>, RegistryError>;

    /// All models of a type, oldest first.
    async fn list_by_type(&self, model_type: &str) -> Result<Vec<MLModel>, RegistryError>;

    async fn activate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Activation, RegistryError>;

    /// Persists the latest evaluation into the model's metadata.
    async fn record_metrics(&self, id: Uuid, metrics: &ModelMetrics) -> Result<(), RegistryError>;

    async fn log_prediction(&self, entry: &PredictionLogEntry) -> Result<(), RegistryError>;

    /// Stores the observed label for a logged prediction, first write wins.
    /// `None` if the prediction was never logged.
    async fn record_outcome(
        &self,
        prediction_id: Uuid,
        outcome: bool,
    ) -> Result<Option<OutcomeUpdate>, RegistryError>;

    /// `(score, observed label)` of the most recent `limit` labeled predictions a model served.
    async fn labeled_predictions(
        &self,
        model_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(f64, bool)>, RegistryError>;

    /// Most recent `limit` labeled predictions of a type, returned oldest first.
    async fn labeled_samples(
        &self,
        model_type: &str,
        limit: i64,
    ) -> Result<Vec<TrainingSample>, RegistryError>;
}

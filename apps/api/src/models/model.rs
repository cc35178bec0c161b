use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::features::FeatureVector;

/// Known metadata recorded for a trained model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    #[serde(default)]
    pub training_time_ms: Option<u64>,
    #[serde(default)]
    pub sample_count: Option<usize>,
    #[serde(default)]
    pub train_count: Option<usize>,
    #[serde(default)]
    pub validation_count: Option<usize>,
    #[serde(default)]
    pub test_count: Option<usize>,
    #[serde(default)]
    pub iterations: Option<usize>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub l2_penalty: Option<f64>,
    #[serde(default)]
    pub last_metrics: Option<ModelMetrics>,
    #[serde(default)]
    pub retrained_from: Option<Uuid>,
}

/// A trained scoring model as held by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MLModel {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub algorithm: String,
    pub accuracy: f64,
    /// Serialized `ModelArtifact`; opaque to everything but the model server.
    pub parameters: Value,
    pub active: bool,
    pub metadata: ModelMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl MLModel {
    /// Age used by the staleness rule: time since deployment, else since creation.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        let since = self.deployed_at.unwrap_or(self.created_at);
        (now - since).num_days()
    }
}

/// Durable registry row.
#[derive(Debug, Clone, FromRow)]
pub struct MLModelRow {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub model_type: String,
    pub algorithm: String,
    pub accuracy: f64,
    pub parameters: Value,
    pub active: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MLModelRow> for MLModel {
    type Error = serde_json::Error;

    fn try_from(row: MLModelRow) -> Result<Self, Self::Error> {
        Ok(MLModel {
            id: row.id,
            name: row.name,
            version: row.version,
            model_type: row.model_type,
            algorithm: row.algorithm,
            accuracy: row.accuracy,
            parameters: row.parameters,
            active: row.active,
            metadata: serde_json::from_value(row.metadata)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deployed_at: row.deployed_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc_roc: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AbGroup {
    Control,
    Challenger,
}

impl AbGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbGroup::Control => "control",
            AbGroup::Challenger => "challenger",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictionMetadata {
    pub processing_time_ms: u64,
    #[serde(default)]
    pub ab_group: Option<AbGroup>,
    #[serde(default)]
    pub experiment_id: Option<Uuid>,
    #[serde(default)]
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: Uuid,
    pub model_id: Uuid,
    pub model_name: String,
    pub model_version: String,
    pub prediction: f64,
    pub confidence: f64,
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
    pub metadata: PredictionMetadata,
}

/// Append-only audit record of a served prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub id: Uuid,
    pub model_id: Uuid,
    pub model_type: String,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub prediction: f64,
    pub confidence: f64,
    pub features: Vec<f64>,
    pub metadata: PredictionMetadata,
    pub outcome: Option<bool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PredictionLogRow {
    pub id: Uuid,
    pub model_id: Uuid,
    pub model_type: String,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub prediction: f64,
    pub confidence: f64,
    pub features: Value,
    pub metadata: Value,
    pub outcome: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PredictionLogRow> for PredictionLogEntry {
    type Error = serde_json::Error;

    fn try_from(row: PredictionLogRow) -> Result<Self, Self::Error> {
        Ok(PredictionLogEntry {
            id: row.id,
            model_id: row.model_id,
            model_type: row.model_type,
            candidate_id: row.candidate_id,
            job_id: row.job_id,
            prediction: row.prediction,
            confidence: row.confidence,
            features: serde_json::from_value(row.features)?,
            metadata: serde_json::from_value(row.metadata)?,
            outcome: row.outcome,
            created_at: row.created_at,
        })
    }
}

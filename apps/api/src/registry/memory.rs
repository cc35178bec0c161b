use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::model::{MLModel, ModelMetrics, PredictionLogEntry};
use crate::registry::{Activation, ModelRegistry, OutcomeUpdate, RegistryError};
use crate::training::data::TrainingSample;

#[derive(Default)]
struct MemoryState {
    models: HashMap<Uuid, MLModel>,
    prediction_log: Vec<PredictionLogEntry>,
}

/// Process-local registry. A single mutex guards all state, so activation is atomic
/// with respect to every other registry call.
#[derive(Default)]
pub struct InMemoryModelRegistry {
    state: Mutex<MemoryState>,
    reject_prediction_logs: AtomicBool,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `log_prediction` fail (exercises best-effort logging).
    pub fn reject_prediction_logs(&self, reject: bool) {
        self.reject_prediction_logs.store(reject, Ordering::SeqCst);
    }

    pub async fn prediction_log_len(&self) -> usize {
        self.state.lock().await.prediction_log.len()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn insert(&self, model: &MLModel) -> Result<(), RegistryError> {
        self.state.lock().await.models.insert(model.id, model.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MLModel>, RegistryError> {
        Ok(self.state.lock().await.models.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<MLModel>, RegistryError> {
        let state = self.state.lock().await;
        let mut active: Vec<MLModel> = state.models.values().filter(|m| m.active).cloned().collect();
        active.sort_by(|a, b| a.model_type.cmp(&b.model_type).then(b.deployed_at.cmp(&a.deployed_at)));
        Ok(active)
    }

    async fn list_by_type(&self, model_type: &str) -> Result<Vec<MLModel>, RegistryError> {
        let state = self.state.lock().await;
        let mut models: Vec<MLModel> = state
            .models
            .values()
            .filter(|m| m.model_type == model_type)
            .cloned()
            .collect();
        models.sort_by_key(|m| m.created_at);
        Ok(models)
    }

    async fn activate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Activation, RegistryError> {
        let mut state = self.state.lock().await;
        let model_type = state
            .models
            .get(&id)
            .map(|m| m.model_type.clone())
            .ok_or(RegistryError::NotFound(id))?;

        let mut deactivated = Vec::new();
        for model in state.models.values_mut() {
            if model.model_type == model_type && model.active && model.id != id {
                model.active = false;
                model.updated_at = at;
                deactivated.push(model.id);
            }
        }

        let model = state.models.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        model.active = true;
        model.deployed_at = Some(at);
        model.updated_at = at;

        Ok(Activation {
            model: model.clone(),
            deactivated,
        })
    }

    async fn record_metrics(&self, id: Uuid, metrics: &ModelMetrics) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        let model = state.models.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        model.metadata.last_metrics = Some(metrics.clone());
        model.updated_at = Utc::now();
        Ok(())
    }

    async fn log_prediction(&self, entry: &PredictionLogEntry) -> Result<(), RegistryError> {
        if self.reject_prediction_logs.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(
                "prediction log rejected writes".to_string(),
            ));
        }
        self.state.lock().await.prediction_log.push(entry.clone());
        Ok(())
    }

    async fn record_outcome(
        &self,
        prediction_id: Uuid,
        outcome: bool,
    ) -> Result<Option<OutcomeUpdate>, RegistryError> {
        let mut state = self.state.lock().await;
        Ok(state
            .prediction_log
            .iter_mut()
            .find(|e| e.id == prediction_id)
            .map(|e| {
                if e.outcome.is_some() {
                    return OutcomeUpdate::AlreadyRecorded(e.clone());
                }
                e.outcome = Some(outcome);
                OutcomeUpdate::Recorded(e.clone())
            }))
    }

    async fn labeled_predictions(
        &self,
        model_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(f64, bool)>, RegistryError> {
        let state = self.state.lock().await;
        Ok(state
            .prediction_log
            .iter()
            .rev()
            .filter(|e| e.model_id == model_id)
            .filter_map(|e| e.outcome.map(|label| (e.prediction, label)))
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn labeled_samples(
        &self,
        model_type: &str,
        limit: i64,
    ) -> Result<Vec<TrainingSample>, RegistryError> {
        let state = self.state.lock().await;
        let labeled: Vec<&PredictionLogEntry> = state
            .prediction_log
            .iter()
            .filter(|e| e.model_type == model_type && e.outcome.is_some())
            .collect();
        let skip = labeled.len().saturating_sub(limit.max(0) as usize);
        Ok(labeled[skip..]
            .iter()
            .filter_map(|e| {
                e.outcome.map(|label| TrainingSample {
                    features: e.features.clone(),
                    label,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::model::{ModelMetadata, PredictionMetadata};
    use serde_json::json;

    fn make_model(model_type: &str) -> MLModel {
        let now = Utc::now();
        MLModel {
            id: Uuid::new_v4(),
            name: "m".to_string(),
            version: "1.0.0".to_string(),
            model_type: model_type.to_string(),
            algorithm: "logistic_regression".to_string(),
            accuracy: 0.9,
            parameters: json!({}),
            active: false,
            metadata: ModelMetadata::default(),
            created_at: now,
            updated_at: now,
            deployed_at: None,
        }
    }

    fn make_entry(model_type: &str, outcome: Option<bool>, x: f64) -> PredictionLogEntry {
        PredictionLogEntry {
            id: Uuid::new_v4(),
            model_id: Uuid::new_v4(),
            model_type: model_type.to_string(),
            candidate_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            prediction: 0.7,
            confidence: 0.4,
            features: vec![x],
            metadata: PredictionMetadata::default(),
            outcome,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_activate_deactivates_same_type_only() {
        let registry = InMemoryModelRegistry::new();
        let a = make_model("match");
        let b = make_model("match");
        let other = make_model("ranking");
        for m in [&a, &b, &other] {
            registry.insert(m).await.unwrap();
        }
        registry.activate(a.id, Utc::now()).await.unwrap();
        registry.activate(other.id, Utc::now()).await.unwrap();
        let activation = registry.activate(b.id, Utc::now()).await.unwrap();

        assert_eq!(activation.deactivated, vec![a.id]);
        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|m| m.id == b.id));
        assert!(active.iter().any(|m| m.id == other.id));
    }

    #[tokio::test]
    async fn test_activate_unknown_id_is_not_found() {
        let registry = InMemoryModelRegistry::new();
        let err = registry.activate(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_labeled_samples_keeps_most_recent_in_order() {
        let registry = InMemoryModelRegistry::new();
        for (i, outcome) in [Some(true), None, Some(false), Some(true)].into_iter().enumerate() {
            registry
                .log_prediction(&make_entry("match", outcome, i as f64))
                .await
                .unwrap();
        }
        let samples = registry.labeled_samples("match", 2).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].features, vec![2.0]);
        assert_eq!(samples[1].features, vec![3.0]);
    }

    #[tokio::test]
    async fn test_record_outcome_updates_entry() {
        let registry = InMemoryModelRegistry::new();
        let entry = make_entry("match", None, 1.0);
        registry.log_prediction(&entry).await.unwrap();
        let updated = registry.record_outcome(entry.id, true).await.unwrap().unwrap();
        assert!(matches!(updated, OutcomeUpdate::Recorded(e) if e.outcome == Some(true)));
        assert!(registry.record_outcome(Uuid::new_v4(), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_outcome_is_write_once() {
        let registry = InMemoryModelRegistry::new();
        let entry = make_entry("match", None, 1.0);
        registry.log_prediction(&entry).await.unwrap();
        registry.record_outcome(entry.id, true).await.unwrap();

        let repeat = registry.record_outcome(entry.id, false).await.unwrap().unwrap();
        assert!(matches!(repeat, OutcomeUpdate::AlreadyRecorded(e) if e.outcome == Some(true)));
    }

    #[tokio::test]
    async fn test_rejected_logs_return_error() {
        let registry = InMemoryModelRegistry::new();
        registry.reject_prediction_logs(true);
        assert!(registry.log_prediction(&make_entry("match", None, 0.0)).await.is_err());
        assert_eq!(registry.prediction_log_len().await, 0);
    }
}

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::model::{MLModel, ModelMetrics};
use crate::registry::Activation;

#[derive(Default)]
struct CacheState {
    active_models: HashMap<Uuid, MLModel>,
    model_metrics: HashMap<Uuid, ModelMetrics>,
}

/// Process-local view of active models and their latest metrics.
///
/// Best-effort: the registry is authoritative and the cache can be rebuilt from it at any
/// time. Injected into the pipeline so tests (or a second pipeline) get an isolated copy.
#[derive(Default)]
pub struct ModelCache {
    state: RwLock<CacheState>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active set, e.g. when warming from the registry.
    pub async fn load_active(&self, models: Vec<MLModel>) {
        let mut state = self.state.write().await;
        state.active_models = models
            .into_iter()
            .filter(|m| m.active)
            .map(|m| (m.id, m))
            .collect();
        let metrics: Vec<(Uuid, ModelMetrics)> = state
            .active_models
            .values()
            .filter_map(|m| m.metadata.last_metrics.clone().map(|mm| (m.id, mm)))
            .collect();
        for (id, m) in metrics {
            state.model_metrics.entry(id).or_insert(m);
        }
    }

    /// Applies a registry activation under one write lock, so readers never observe
    /// two active models of a type or none where one existed.
    pub async fn apply_activation(&self, activation: &Activation) {
        let mut state = self.state.write().await;
        let model_type = &activation.model.model_type;
        state
            .active_models
            .retain(|id, m| &m.model_type != model_type && !activation.deactivated.contains(id));
        state
            .active_models
            .insert(activation.model.id, activation.model.clone());
    }

    /// Active models ordered by type.
    pub async fn active_models(&self) -> Vec<MLModel> {
        let state = self.state.read().await;
        let mut models: Vec<MLModel> = state.active_models.values().cloned().collect();
        models.sort_by(|a, b| a.model_type.cmp(&b.model_type));
        models
    }

    pub async fn active(&self, id: Uuid) -> Option<MLModel> {
        self.state.read().await.active_models.get(&id).cloned()
    }

    pub async fn active_for_type(&self, model_type: &str) -> Option<MLModel> {
        self.state
            .read()
            .await
            .active_models
            .values()
            .find(|m| m.model_type == model_type)
            .cloned()
    }

    pub async fn metrics(&self, id: Uuid) -> Option<ModelMetrics> {
        self.state.read().await.model_metrics.get(&id).cloned()
    }

    pub async fn set_metrics(&self, id: Uuid, metrics: ModelMetrics) {
        self.state.write().await.model_metrics.insert(id, metrics);
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.active_models.clear();
        state.model_metrics.clear();
    }
}

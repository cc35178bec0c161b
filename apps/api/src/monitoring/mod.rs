//! Health monitoring of active models.
//!
//! Each active model moves through `Healthy -> Degraded -> RetrainingTriggered ->
//! (Healthy | Degraded)`. A cycle is a pure function of `now`, the active models and
//! their latest accuracy; the orchestrator only remembers per-model state so a model
//! whose retraining is still in flight is never handed out for retraining again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::model::MLModel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Degraded,
    RetrainingTriggered,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub accuracy_threshold: f64,
    pub stale_accuracy_threshold: f64,
    pub retention_days: i64,
}

impl From<&PipelineConfig> for HealthThresholds {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            accuracy_threshold: config.accuracy_threshold,
            stale_accuracy_threshold: config.stale_accuracy_threshold,
            retention_days: config.retention_days,
        }
    }
}

/// Healthy or Degraded, judged from accuracy and age alone.
pub fn evaluate_health(
    model: &MLModel,
    accuracy: f64,
    now: DateTime<Utc>,
    thresholds: &HealthThresholds,
) -> HealthState {
    if accuracy < thresholds.accuracy_threshold {
        return HealthState::Degraded;
    }
    if model.age_days(now) > thresholds.retention_days && accuracy < thresholds.stale_accuracy_threshold {
        return HealthState::Degraded;
    }
    HealthState::Healthy
}

/// One model as seen by a monitoring cycle. `accuracy` is `None` when no metrics exist.
#[derive(Debug, Clone)]
pub struct Observation {
    pub model: MLModel,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model_id: Uuid,
    pub model_type: String,
    pub state: HealthState,
    pub accuracy: f64,
    pub age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub checked_at: DateTime<Utc>,
    pub models: Vec<ModelHealth>,
    /// Models that crossed a threshold this cycle.
    pub degraded: Vec<Uuid>,
    /// Models handed out for retraining this cycle.
    pub retraining: Vec<Uuid>,
    /// Models without metrics, left untouched.
    pub skipped: Vec<Uuid>,
}

pub struct MonitoringOrchestrator {
    thresholds: HealthThresholds,
    states: Mutex<HashMap<Uuid, HealthState>>,
}

impl MonitoringOrchestrator {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self, model_id: Uuid) -> Option<HealthState> {
        self.states.lock().await.get(&model_id).copied()
    }

    /// Runs one cycle. Degraded models are moved to `RetrainingTriggered` and listed in
    /// `retraining`; the caller owns launching the job and must call [`Self::complete`].
    pub async fn run_cycle(&self, observations: &[Observation], now: DateTime<Utc>) -> MonitoringReport {
        let mut states = self.states.lock().await;
        let mut report = MonitoringReport {
            checked_at: now,
            models: Vec::with_capacity(observations.len()),
            degraded: Vec::new(),
            retraining: Vec::new(),
            skipped: Vec::new(),
        };

        // Forget models that are no longer active unless a retrain is still running for them.
        states.retain(|id, state| {
            *state == HealthState::RetrainingTriggered || observations.iter().any(|o| o.model.id == *id)
        });

        for observation in observations {
            let model = &observation.model;
            let Some(accuracy) = observation.accuracy else {
                warn!("No metrics for model {} ({}); skipping this cycle", model.id, model.model_type);
                report.skipped.push(model.id);
                continue;
            };

            let current = states.get(&model.id).copied().unwrap_or(HealthState::Healthy);
            let next = match current {
                HealthState::RetrainingTriggered => HealthState::RetrainingTriggered,
                _ => match evaluate_health(model, accuracy, now, &self.thresholds) {
                    HealthState::Degraded => {
                        info!(
                            "Model {} ({}) degraded: accuracy {:.3}, age {} days",
                            model.id,
                            model.model_type,
                            accuracy,
                            model.age_days(now)
                        );
                        report.degraded.push(model.id);
                        report.retraining.push(model.id);
                        HealthState::RetrainingTriggered
                    }
                    _ => HealthState::Healthy,
                },
            };
            states.insert(model.id, next);

            report.models.push(ModelHealth {
                model_id: model.id,
                model_type: model.model_type.clone(),
                state: next,
                accuracy,
                age_days: model.age_days(now),
            });
        }

        report
    }

    /// Claims a retraining slot for a model outside the monitoring cycle. Returns `false`
    /// when a retrain for it is already in flight.
    pub async fn try_begin(&self, model_id: Uuid) -> bool {
        let mut states = self.states.lock().await;
        if states.get(&model_id) == Some(&HealthState::RetrainingTriggered) {
            return false;
        }
        states.insert(model_id, HealthState::RetrainingTriggered);
        true
    }

    /// Closes a retraining job: success returns the model to `Healthy`, failure leaves it
    /// `Degraded` so the next cycle retries.
    pub async fn complete(&self, model_id: Uuid, success: bool) {
        let state = if success {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };
        self.states.lock().await.insert(model_id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::model::ModelMetadata;
    use chrono::Duration;
    use serde_json::json;

    fn make_model(age_days: i64, now: DateTime<Utc>) -> MLModel {
        let deployed = now - Duration::days(age_days);
        MLModel {
            id: Uuid::new_v4(),
            name: "m".to_string(),
            version: "1.0.0".to_string(),
            model_type: "candidate_job_match".to_string(),
            algorithm: "logistic_regression".to_string(),
            accuracy: 0.9,
            parameters: json!({}),
            active: true,
            metadata: ModelMetadata::default(),
            created_at: deployed,
            updated_at: deployed,
            deployed_at: Some(deployed),
        }
    }

    fn thresholds() -> HealthThresholds {
        HealthThresholds::from(&PipelineConfig::default())
    }

    fn observe(model: &MLModel, accuracy: f64) -> Vec<Observation> {
        vec![Observation {
            model: model.clone(),
            accuracy: Some(accuracy),
        }]
    }

    #[test]
    fn test_low_accuracy_young_model_is_degraded() {
        let now = Utc::now();
        let model = make_model(10, now);
        assert_eq!(evaluate_health(&model, 0.75, now, &thresholds()), HealthState::Degraded);
    }

    #[test]
    fn test_stale_model_uses_stricter_threshold() {
        let now = Utc::now();
        assert_eq!(
            evaluate_health(&make_model(45, now), 0.82, now, &thresholds()),
            HealthState::Degraded
        );
        assert_eq!(
            evaluate_health(&make_model(10, now), 0.82, now, &thresholds()),
            HealthState::Healthy
        );
    }

    #[test]
    fn test_age_falls_back_to_created_at() {
        let now = Utc::now();
        let mut model = make_model(45, now);
        model.deployed_at = None;
        assert_eq!(evaluate_health(&model, 0.82, now, &thresholds()), HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_cycle_flags_degraded_and_triggers_once() {
        let now = Utc::now();
        let orchestrator = MonitoringOrchestrator::new(thresholds());
        let model = make_model(10, now);

        let first = orchestrator.run_cycle(&observe(&model, 0.75), now).await;
        assert_eq!(first.degraded, vec![model.id]);
        assert_eq!(first.retraining, vec![model.id]);
        assert_eq!(orchestrator.state(model.id).await, Some(HealthState::RetrainingTriggered));

        let second = orchestrator.run_cycle(&observe(&model, 0.75), now).await;
        assert!(second.retraining.is_empty());
        assert_eq!(second.models[0].state, HealthState::RetrainingTriggered);
    }

    #[tokio::test]
    async fn test_failed_retrain_is_retried_next_cycle() {
        let now = Utc::now();
        let orchestrator = MonitoringOrchestrator::new(thresholds());
        let model = make_model(10, now);

        orchestrator.run_cycle(&observe(&model, 0.7), now).await;
        orchestrator.complete(model.id, false).await;
        assert_eq!(orchestrator.state(model.id).await, Some(HealthState::Degraded));

        let retry = orchestrator.run_cycle(&observe(&model, 0.7), now).await;
        assert_eq!(retry.retraining, vec![model.id]);
    }

    #[tokio::test]
    async fn test_successful_retrain_returns_to_healthy() {
        let now = Utc::now();
        let orchestrator = MonitoringOrchestrator::new(thresholds());
        let model = make_model(10, now);
        orchestrator.run_cycle(&observe(&model, 0.7), now).await;
        orchestrator.complete(model.id, true).await;
        assert_eq!(orchestrator.state(model.id).await, Some(HealthState::Healthy));
    }

    #[tokio::test]
    async fn test_missing_metrics_are_skipped_without_aborting_cycle() {
        let now = Utc::now();
        let orchestrator = MonitoringOrchestrator::new(thresholds());
        let unmeasured = make_model(10, now);
        let healthy = make_model(10, now);
        let observations = vec![
            Observation {
                model: unmeasured.clone(),
                accuracy: None,
            },
            Observation {
                model: healthy.clone(),
                accuracy: Some(0.95),
            },
        ];

        let report = orchestrator.run_cycle(&observations, now).await;
        assert_eq!(report.skipped, vec![unmeasured.id]);
        assert_eq!(report.models.len(), 1);
        assert_eq!(report.models[0].state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_try_begin_refuses_in_flight_retrain() {
        let orchestrator = MonitoringOrchestrator::new(thresholds());
        let now = Utc::now();
        let model = make_model(10, now);
        let report = orchestrator
            .run_cycle(&[Observation { model: model.clone(), accuracy: Some(0.75) }], now)
            .await;
        assert_eq!(report.retraining, vec![model.id]);
        assert!(!orchestrator.try_begin(model.id).await);

        orchestrator.complete(model.id, true).await;
        assert!(orchestrator.try_begin(model.id).await);
        let report = orchestrator
            .run_cycle(&[Observation { model: model.clone(), accuracy: Some(0.75) }], now)
            .await;
        assert!(report.retraining.is_empty());
    }
}

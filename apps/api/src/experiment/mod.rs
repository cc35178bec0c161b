//! A/B testing between the active (control) model of a type and one challenger.
//!
//! Assignment is per request by default: a uniform draw against `traffic_split`.
//! Callers may pin a sticky key (user or session id), in which case the key is
//! hash-bucketed so the same key always lands in the same arm of an experiment.
//!
//! Arms are compared on observed accuracy with a two-proportion z-test. Until both arms
//! have `min_sample_size` outcomes the verdict is `Inconclusive`. When the difference is
//! not significant at `confidence_level`, the control is retained.

pub mod stats;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::features::fnv1a_64;
use crate::models::model::AbGroup;

const STICKY_BUCKETS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("an experiment is already running for type '{0}'")]
    AlreadyRunning(String),

    #[error("no experiment running for type '{0}'")]
    NotFound(String),

    #[error("control and challenger must be different models")]
    SameModel,
}

#[derive(Debug, Clone, Copy)]
pub struct AbSettings {
    pub traffic_split: f64,
    pub min_sample_size: u64,
    pub confidence_level: f64,
}

impl From<&PipelineConfig> for AbSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            traffic_split: config.traffic_split,
            min_sample_size: config.min_sample_size,
            confidence_level: config.confidence_level,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ArmStats {
    pub assignments: u64,
    pub outcomes: u64,
    pub correct: u64,
}

impl ArmStats {
    pub fn accuracy(&self) -> Option<f64> {
        (self.outcomes > 0).then(|| self.correct as f64 / self.outcomes as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub model_type: String,
    pub control_id: Uuid,
    pub challenger_id: Uuid,
    pub traffic_split: f64,
    pub started_at: DateTime<Utc>,
    pub control: ArmStats,
    pub challenger: ArmStats,
}

impl Experiment {
    fn arm_mut(&mut self, group: AbGroup) -> &mut ArmStats {
        match group {
            AbGroup::Control => &mut self.control,
            AbGroup::Challenger => &mut self.challenger,
        }
    }

    pub fn model_for(&self, group: AbGroup) -> Uuid {
        match group {
            AbGroup::Control => self.control_id,
            AbGroup::Challenger => self.challenger_id,
        }
    }

    pub fn involves(&self, model_id: Uuid) -> bool {
        self.control_id == model_id || self.challenger_id == model_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub experiment_id: Uuid,
    pub group: AbGroup,
    pub model_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Inconclusive,
    NoSignificantDifference,
    ControlWins,
    ChallengerWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub experiment: Experiment,
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
    pub verdict: Verdict,
    /// Model to keep serving: the challenger only when it wins outright.
    pub recommended_model_id: Uuid,
}

pub struct AbTestFramework {
    settings: AbSettings,
    experiments: RwLock<HashMap<String, Experiment>>,
    rng: Mutex<StdRng>,
}

impl AbTestFramework {
    pub fn new(settings: AbSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    pub fn with_seed(settings: AbSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: AbSettings, rng: StdRng) -> Self {
        Self {
            settings,
            experiments: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub async fn start(
        &self,
        model_type: &str,
        control_id: Uuid,
        challenger_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Experiment, ExperimentError> {
        if control_id == challenger_id {
            return Err(ExperimentError::SameModel);
        }
        let mut experiments = self.experiments.write().await;
        if experiments.contains_key(model_type) {
            return Err(ExperimentError::AlreadyRunning(model_type.to_string()));
        }
        let experiment = Experiment {
            id: Uuid::new_v4(),
            model_type: model_type.to_string(),
            control_id,
            challenger_id,
            traffic_split: self.settings.traffic_split,
            started_at: now,
            control: ArmStats::default(),
            challenger: ArmStats::default(),
        };
        info!(
            "Started experiment {} for '{}': control {} vs challenger {} ({:.0}% to challenger)",
            experiment.id,
            model_type,
            control_id,
            challenger_id,
            experiment.traffic_split * 100.0
        );
        experiments.insert(model_type.to_string(), experiment.clone());
        Ok(experiment)
    }

    pub async fn end(&self, model_type: &str) -> Result<ExperimentReport, ExperimentError> {
        let experiment = self
            .experiments
            .write()
            .await
            .remove(model_type)
            .ok_or_else(|| ExperimentError::NotFound(model_type.to_string()))?;
        let report = self.evaluate(experiment);
        info!(
            "Ended experiment {} for '{}': {:?}",
            report.experiment.id, model_type, report.verdict
        );
        Ok(report)
    }

    pub async fn get(&self, model_type: &str) -> Option<Experiment> {
        self.experiments.read().await.get(model_type).cloned()
    }

    /// Drops any experiment of `model_type` that references a model other than `active_id`
    /// as its control; returns the dropped experiment.
    pub async fn end_if_stale(&self, model_type: &str, active_id: Uuid) -> Option<Experiment> {
        let mut experiments = self.experiments.write().await;
        match experiments.get(model_type) {
            Some(e) if e.control_id != active_id => experiments.remove(model_type),
            _ => None,
        }
    }

    /// Routes one request; `None` when no experiment runs for the type.
    pub async fn assign(&self, model_type: &str, sticky_key: Option<&str>) -> Option<Assignment> {
        let mut experiments = self.experiments.write().await;
        let experiment = experiments.get_mut(model_type)?;

        let draw = match sticky_key {
            Some(key) => {
                let bucket = fnv1a_64(format!("{}:{}", experiment.id, key).as_bytes()) % STICKY_BUCKETS;
                bucket as f64 / STICKY_BUCKETS as f64
            }
            None => self.rng.lock().await.gen::<f64>(),
        };
        let group = if draw < experiment.traffic_split {
            AbGroup::Challenger
        } else {
            AbGroup::Control
        };
        experiment.arm_mut(group).assignments += 1;

        Some(Assignment {
            experiment_id: experiment.id,
            group,
            model_id: experiment.model_for(group),
        })
    }

    /// Tallies an observed outcome; ignored when the experiment has since ended.
    pub async fn record_outcome(&self, model_type: &str, experiment_id: Uuid, group: AbGroup, correct: bool) -> bool {
        let mut experiments = self.experiments.write().await;
        match experiments.get_mut(model_type) {
            Some(experiment) if experiment.id == experiment_id => {
                let arm = experiment.arm_mut(group);
                arm.outcomes += 1;
                if correct {
                    arm.correct += 1;
                }
                true
            }
            _ => false,
        }
    }

    pub async fn report(&self, model_type: &str) -> Result<ExperimentReport, ExperimentError> {
        let experiment = self
            .get(model_type)
            .await
            .ok_or_else(|| ExperimentError::NotFound(model_type.to_string()))?;
        Ok(self.evaluate(experiment))
    }

    fn evaluate(&self, experiment: Experiment) -> ExperimentReport {
        let (control, challenger) = (experiment.control, experiment.challenger);
        let min = self.settings.min_sample_size;

        if control.outcomes < min || challenger.outcomes < min || control.outcomes == 0 || challenger.outcomes == 0 {
            return ExperimentReport {
                recommended_model_id: experiment.control_id,
                experiment,
                z_score: None,
                p_value: None,
                verdict: Verdict::Inconclusive,
            };
        }

        let z = stats::two_proportion_z(control.correct, control.outcomes, challenger.correct, challenger.outcomes);
        let p = stats::two_sided_p_value(z);
        let verdict = if p >= 1.0 - self.settings.confidence_level {
            Verdict::NoSignificantDifference
        } else if z > 0.0 {
            Verdict::ChallengerWins
        } else {
            Verdict::ControlWins
        };
        let recommended_model_id = match verdict {
            Verdict::ChallengerWins => experiment.challenger_id,
            _ => experiment.control_id,
        };

        ExperimentReport {
            experiment,
            z_score: Some(z),
            p_value: Some(p),
            verdict,
            recommended_model_id,
        }
    }
}

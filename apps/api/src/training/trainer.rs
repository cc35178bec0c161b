//! Model Trainer: fits a scoring artifact from a pre-split dataset.
//!
//! `LogisticRegressionTrainer` runs full-batch gradient descent with L2 regularization,
//! bounded by `max_iterations`, stopping early once validation log-loss has not improved
//! for `early_stopping_patience` consecutive iterations. With tuning enabled it first
//! picks learning rate and L2 penalty by k-fold cross validation over the training rows.
//! The CPU-bound fit runs on the blocking pool so prediction serving is not starved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::training::artifact::{sigmoid, ModelArtifact, LOGISTIC_REGRESSION};
use crate::training::data::{DataSplit, TrainingSample};
use crate::training::TrainingError;

const LEARNING_RATE_GRID: [f64; 4] = [0.01, 0.05, 0.1, 0.5];
const L2_GRID: [f64; 3] = [0.0, 0.001, 0.01];
const MIN_IMPROVEMENT: f64 = 1e-6;
pub const MIN_TRAINING_SAMPLES: usize = 2;

/// Per-model training request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_l2_penalty")]
    pub l2_penalty: f64,
}

fn default_model_type() -> String {
    "candidate_job_match".to_string()
}

fn default_algorithm() -> String {
    LOGISTIC_REGRESSION.to_string()
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_l2_penalty() -> f64 {
    0.001
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            algorithm: default_algorithm(),
            learning_rate: default_learning_rate(),
            l2_penalty: default_l2_penalty(),
        }
    }
}

/// Iteration limits and tuning switches shared by every training run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    pub max_iterations: usize,
    pub early_stopping_patience: usize,
    pub hyperparameter_tuning: bool,
    pub cross_validation_folds: usize,
}

impl From<&PipelineConfig> for TrainingParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            early_stopping_patience: config.early_stopping_patience,
            hyperparameter_tuning: config.hyperparameter_tuning,
            cross_validation_folds: config.cross_validation_folds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainedArtifact {
    pub artifact: ModelArtifact,
    pub iterations: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub validation_loss: f64,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(
        &self,
        split: &DataSplit,
        config: &ModelConfig,
        params: TrainingParams,
    ) -> Result<TrainedArtifact, TrainingError>;
}

pub struct LogisticRegressionTrainer;

#[async_trait]
impl Trainer for LogisticRegressionTrainer {
    async fn train(
        &self,
        split: &DataSplit,
        config: &ModelConfig,
        params: TrainingParams,
    ) -> Result<TrainedArtifact, TrainingError> {
        if config.algorithm != LOGISTIC_REGRESSION {
            return Err(TrainingError::UnsupportedAlgorithm(config.algorithm.clone()));
        }
        if split.train.len() < MIN_TRAINING_SAMPLES {
            return Err(TrainingError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                actual: split.train.len(),
            });
        }

        let split = split.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || fit_with_tuning(&split, &config, params))
            .await
            .map_err(|e| TrainingError::Internal(format!("training task failed: {e}")))?
    }
}

fn fit_with_tuning(
    split: &DataSplit,
    config: &ModelConfig,
    params: TrainingParams,
) -> Result<TrainedArtifact, TrainingError> {
    let (learning_rate, l2_penalty) = if params.hyperparameter_tuning {
        tune(&split.train, config, params)?
    } else {
        (config.learning_rate, config.l2_penalty)
    };

    let validation = if split.validation.is_empty() {
        &split.train
    } else {
        &split.validation
    };
    let fitted = fit(&split.train, validation, learning_rate, l2_penalty, params)?;

    info!(
        "Trained {} in {} iterations (lr={}, l2={}, val_loss={:.4})",
        LOGISTIC_REGRESSION, fitted.iterations, learning_rate, l2_penalty, fitted.validation_loss
    );
    Ok(fitted)
}

/// Grid search scored by mean k-fold validation loss. Falls back to the configured
/// hyperparameters when there are fewer rows than folds.
fn tune(
    train: &[TrainingSample],
    config: &ModelConfig,
    params: TrainingParams,
) -> Result<(f64, f64), TrainingError> {
    let folds = params.cross_validation_folds;
    if folds < 2 || train.len() < folds {
        debug!(
            "Skipping hyperparameter tuning: {} rows for {} folds",
            train.len(),
            folds
        );
        return Ok((config.learning_rate, config.l2_penalty));
    }

    let mut best = (config.learning_rate, config.l2_penalty);
    let mut best_loss = f64::INFINITY;

    for lr in LEARNING_RATE_GRID {
        for l2 in L2_GRID {
            let mut total = 0.0;
            for k in 0..folds {
                let (fold_train, fold_val) = fold(train, folds, k);
                if fold_train.is_empty() || fold_val.is_empty() {
                    continue;
                }
                match fit(&fold_train, &fold_val, lr, l2, params) {
                    Ok(fitted) => total += fitted.validation_loss,
                    Err(TrainingError::NonConvergence(_)) => {
                        total = f64::INFINITY;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            let mean = total / folds as f64;
            debug!("CV lr={lr} l2={l2} mean_loss={mean:.4}");
            if mean < best_loss {
                best_loss = mean;
                best = (lr, l2);
            }
        }
    }

    if !best_loss.is_finite() {
        return Err(TrainingError::NonConvergence(
            "no hyperparameter combination converged".to_string(),
        ));
    }
    Ok(best)
}

/// Contiguous fold `k` of `folds` as validation, the rest as training.
fn fold(samples: &[TrainingSample], folds: usize, k: usize) -> (Vec<TrainingSample>, Vec<TrainingSample>) {
    let n = samples.len();
    let start = n * k / folds;
    let end = n * (k + 1) / folds;
    let validation = samples[start..end].to_vec();
    let train = samples[..start]
        .iter()
        .chain(&samples[end..])
        .cloned()
        .collect();
    (train, validation)
}

fn fit(
    train: &[TrainingSample],
    validation: &[TrainingSample],
    learning_rate: f64,
    l2_penalty: f64,
    params: TrainingParams,
) -> Result<TrainedArtifact, TrainingError> {
    let dim = train[0].features.len();
    let n = train.len() as f64;
    let mut weights = vec![0.0; dim];
    let mut bias = 0.0;

    let mut best = (weights.clone(), bias);
    let mut best_loss = f64::INFINITY;
    let mut stale = 0usize;
    let mut iterations = 0usize;

    for _ in 0..params.max_iterations {
        iterations += 1;

        let mut grad_w = vec![0.0; dim];
        let mut grad_b = 0.0;
        for sample in train {
            let p = sigmoid(dot(&weights, &sample.features) + bias);
            let err = p - if sample.label { 1.0 } else { 0.0 };
            for (g, x) in grad_w.iter_mut().zip(&sample.features) {
                *g += err * x;
            }
            grad_b += err;
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= learning_rate * (g / n + l2_penalty * *w);
        }
        bias -= learning_rate * grad_b / n;

        let loss = log_loss(&weights, bias, validation);
        if !loss.is_finite() {
            return Err(TrainingError::NonConvergence(format!(
                "loss diverged at iteration {iterations}"
            )));
        }

        if loss < best_loss - MIN_IMPROVEMENT {
            best_loss = loss;
            best = (weights.clone(), bias);
            stale = 0;
        } else {
            stale += 1;
            if params.early_stopping_patience > 0 && stale >= params.early_stopping_patience {
                debug!("Early stopping at iteration {iterations} (best loss {best_loss:.4})");
                break;
            }
        }
    }

    if !best_loss.is_finite() {
        return Err(TrainingError::NonConvergence(
            "no iteration produced a finite loss".to_string(),
        ));
    }

    let (weights, bias) = best;
    Ok(TrainedArtifact {
        artifact: ModelArtifact {
            algorithm: LOGISTIC_REGRESSION.to_string(),
            dimension: dim,
            weights,
            bias,
        },
        iterations,
        learning_rate,
        l2_penalty,
        validation_loss: best_loss,
    })
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn log_loss(weights: &[f64], bias: f64, samples: &[TrainingSample]) -> f64 {
    const EPS: f64 = 1e-12;
    let total: f64 = samples
        .iter()
        .map(|s| {
            let p = sigmoid(dot(weights, &s.features) + bias).clamp(EPS, 1.0 - EPS);
            if s.label {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / samples.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::TrainingData;

    fn params(max_iterations: usize, patience: usize, tuning: bool) -> TrainingParams {
        TrainingParams {
            max_iterations,
            early_stopping_patience: patience,
            hyperparameter_tuning: tuning,
            cross_validation_folds: 3,
        }
    }

    /// Linearly separable: label = x0 > 0.5.
    fn make_separable(n: usize) -> Vec<TrainingSample> {
        (0..n)
            .map(|i| {
                let x = (i % 10) as f64 / 10.0;
                TrainingSample {
                    features: vec![x, 1.0 - x],
                    label: x > 0.5,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_trainer_learns_separable_data() {
        let split = TrainingData::new(make_separable(100)).split(0.2, 0.2);
        let config = ModelConfig {
            learning_rate: 0.5,
            ..ModelConfig::default()
        };
        let trained = LogisticRegressionTrainer
            .train(&split, &config, params(2000, 50, false))
            .await
            .unwrap();
        let artifact = trained.artifact;
        assert_eq!(artifact.dimension, 2);
        assert!(artifact.probability(&[0.9, 0.1]) > 0.5);
        assert!(artifact.probability(&[0.1, 0.9]) < 0.5);
    }

    #[tokio::test]
    async fn test_max_iterations_is_respected() {
        let split = TrainingData::new(make_separable(50)).split(0.2, 0.2);
        let trained = LogisticRegressionTrainer
            .train(&split, &ModelConfig::default(), params(7, 0, false))
            .await
            .unwrap();
        assert_eq!(trained.iterations, 7);
    }

    #[tokio::test]
    async fn test_early_stopping_halts_before_max_iterations() {
        // A learning rate of zero never improves the loss after the first step.
        let split = TrainingData::new(make_separable(50)).split(0.2, 0.2);
        let config = ModelConfig {
            learning_rate: 0.0,
            ..ModelConfig::default()
        };
        let trained = LogisticRegressionTrainer
            .train(&split, &config, params(1000, 5, false))
            .await
            .unwrap();
        assert_eq!(trained.iterations, 6);
    }

    #[tokio::test]
    async fn test_too_few_samples_is_training_error() {
        let split = TrainingData::new(make_separable(1)).split(0.0, 0.0);
        let err = LogisticRegressionTrainer
            .train(&split, &ModelConfig::default(), params(10, 0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_rejected() {
        let split = TrainingData::new(make_separable(10)).split(0.2, 0.2);
        let config = ModelConfig {
            algorithm: "gbdt".to_string(),
            ..ModelConfig::default()
        };
        let err = LogisticRegressionTrainer
            .train(&split, &config, params(10, 0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn test_tuning_picks_a_grid_value() {
        let split = TrainingData::new(make_separable(60)).split(0.2, 0.2);
        let trained = LogisticRegressionTrainer
            .train(&split, &ModelConfig::default(), params(200, 10, true))
            .await
            .unwrap();
        assert!(LEARNING_RATE_GRID.contains(&trained.learning_rate));
        assert!(L2_GRID.contains(&trained.l2_penalty));
    }

    #[test]
    fn test_fold_partitions_all_rows() {
        let samples = make_separable(10);
        for k in 0..3 {
            let (train, val) = fold(&samples, 3, k);
            assert_eq!(train.len() + val.len(), 10);
            assert!(!val.is_empty());
        }
    }

    #[test]
    fn test_model_config_defaults_from_empty_json() {
        let config: ModelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.algorithm, LOGISTIC_REGRESSION);
        assert_eq!(config.model_type, "candidate_job_match");
    }
}

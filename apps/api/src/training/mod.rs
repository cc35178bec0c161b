// Offline training: dataset validation, index-based splitting, and fitting.
// A failed run never produces a registry row; the façade registers only on success.

pub mod artifact;
pub mod data;
pub mod trainer;

use thiserror::Error;

pub use artifact::{ModelArtifact, LOGISTIC_REGRESSION};
pub use data::{DataSplit, TrainingData, TrainingSample};
pub use trainer::{LogisticRegressionTrainer, ModelConfig, TrainedArtifact, Trainer, TrainingParams};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient training data: need at least {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("sample {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("sample {index} is invalid: {reason}")]
    InvalidSample { index: usize, reason: String },

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("training did not converge: {0}")]
    NonConvergence(String),

    #[error("training failed: {0}")]
    Internal(String),
}

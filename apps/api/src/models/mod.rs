pub mod model;
pub mod profile;

pub use model::{
    AbGroup, ConfusionMatrix, MLModel, MLModelRow, ModelMetadata, ModelMetrics, PredictionLogEntry,
    PredictionLogRow, PredictionMetadata, PredictionResult,
};
pub use profile::{CandidateProfile, JobProfile, LabeledPair};

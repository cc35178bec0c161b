use serde::Serialize;
use uuid::Uuid;

/// Lifecycle notifications published on the pipeline's broadcast channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ModelTrained {
        model_id: Uuid,
        model_type: String,
        version: String,
        accuracy: f64,
    },
    ModelDeployed {
        model_id: Uuid,
        model_type: String,
        deactivated: Vec<Uuid>,
    },
    ModelDegraded {
        model_id: Uuid,
        model_type: String,
        accuracy: f64,
    },
    RetrainingTriggered {
        model_id: Uuid,
        model_type: String,
    },
    RetrainingFailed {
        model_id: Uuid,
        model_type: String,
        reason: String,
    },
}

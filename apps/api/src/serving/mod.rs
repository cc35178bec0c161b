//! Model Server: keeps recently used artifacts in an LRU and scores feature vectors
//! within the configured prediction timeout.

pub mod cache;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::features::FeatureVector;
use crate::models::model::MLModel;
use crate::training::artifact::{ModelArtifact, LOGISTIC_REGRESSION};

pub use cache::{
    model_tag, prediction_key, CacheError, CachedScore, InMemoryPredictionCache, PredictionCache,
    RedisPredictionCache,
};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),

    #[error("feature vector has dimension {actual}, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed feature vector: {0}")]
    MalformedFeatures(String),

    #[error("model {model_id} has an unusable artifact: {reason}")]
    InvalidArtifact { model_id: Uuid, reason: String },

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Score {
    pub score: f64,
    pub confidence: f64,
    pub processing_time_ms: u64,
}

pub struct ModelServer {
    artifacts: Mutex<LruCache<Uuid, Arc<ModelArtifact>>>,
    timeout: Duration,
    batch_size: usize,
}

impl ModelServer {
    pub fn new(cache_size: usize, timeout: Duration, batch_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            artifacts: Mutex::new(LruCache::new(capacity)),
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn predict(&self, model: &MLModel, features: &FeatureVector) -> Result<Score, PredictionError> {
        let started = Instant::now();
        let values = features.values();
        tokio::time::timeout(self.timeout, async {
            let artifact = self.load(model).await?;
            score(&artifact, &values, started)
        })
        .await
        .map_err(|_| PredictionError::Timeout(self.timeout))?
    }

    /// Scores raw rows (e.g. a test set) in chunks of `batch_size`, yielding between chunks.
    /// The whole call shares one timeout budget, checked before every chunk after the first.
    pub async fn predict_rows(&self, model: &MLModel, rows: &[Vec<f64>]) -> Result<Vec<Score>, PredictionError> {
        let started = Instant::now();
        let artifact = self.load(model).await?;
        let mut scores = Vec::with_capacity(rows.len());
        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            if index > 0 && started.elapsed() >= self.timeout {
                return Err(PredictionError::Timeout(self.timeout));
            }
            let chunk_started = Instant::now();
            for row in chunk {
                scores.push(score(&artifact, row, chunk_started)?);
            }
            tokio::task::yield_now().await;
        }
        Ok(scores)
    }

    pub async fn predict_batch(
        &self,
        model: &MLModel,
        vectors: &[FeatureVector],
    ) -> Result<Vec<Score>, PredictionError> {
        let rows: Vec<Vec<f64>> = vectors.iter().map(|v| v.values()).collect();
        self.predict_rows(model, &rows).await
    }

    /// Drops a cached artifact; the next prediction with that model reloads it.
    pub async fn evict(&self, model_id: Uuid) -> bool {
        self.artifacts.lock().await.pop(&model_id).is_some()
    }

    async fn load(&self, model: &MLModel) -> Result<Arc<ModelArtifact>, PredictionError> {
        let mut cache = self.artifacts.lock().await;
        if let Some(artifact) = cache.get(&model.id) {
            return Ok(Arc::clone(artifact));
        }

        if model.algorithm != LOGISTIC_REGRESSION {
            return Err(PredictionError::UnsupportedAlgorithm(model.algorithm.clone()));
        }
        let artifact: ModelArtifact = serde_json::from_value(model.parameters.clone()).map_err(|e| {
            PredictionError::InvalidArtifact {
                model_id: model.id,
                reason: e.to_string(),
            }
        })?;
        if artifact.weights.len() != artifact.dimension {
            return Err(PredictionError::InvalidArtifact {
                model_id: model.id,
                reason: format!(
                    "{} weights for dimension {}",
                    artifact.weights.len(),
                    artifact.dimension
                ),
            });
        }

        debug!("Loaded artifact for model {} into cache", model.id);
        let artifact = Arc::new(artifact);
        cache.put(model.id, Arc::clone(&artifact));
        Ok(artifact)
    }
}

fn score(artifact: &ModelArtifact, values: &[f64], started: Instant) -> Result<Score, PredictionError> {
    if values.len() != artifact.dimension {
        return Err(PredictionError::DimensionMismatch {
            expected: artifact.dimension,
            actual: values.len(),
        });
    }
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(PredictionError::MalformedFeatures(format!(
            "non-finite value at index {pos}"
        )));
    }
    let p = artifact.probability(values);
    Ok(Score {
        score: p,
        confidence: (2.0 * p - 1.0).abs(),
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::NamedFeature;
    use crate::models::model::ModelMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn make_model(weights: Vec<f64>) -> MLModel {
        let now = Utc::now();
        let artifact = ModelArtifact {
            algorithm: LOGISTIC_REGRESSION.to_string(),
            dimension: weights.len(),
            weights,
            bias: 0.0,
        };
        MLModel {
            id: Uuid::new_v4(),
            name: "m".to_string(),
            version: "1.0.0".to_string(),
            model_type: "candidate_job_match".to_string(),
            algorithm: LOGISTIC_REGRESSION.to_string(),
            accuracy: 0.9,
            parameters: serde_json::to_value(&artifact).unwrap(),
            active: true,
            metadata: ModelMetadata::default(),
            created_at: now,
            updated_at: now,
            deployed_at: Some(now),
        }
    }

    fn make_vector(values: &[f64]) -> FeatureVector {
        FeatureVector {
            named: values
                .iter()
                .map(|v| NamedFeature {
                    name: "x".to_string(),
                    value: *v,
                })
                .collect(),
            embedding: vec![],
        }
    }

    fn server(cache_size: usize) -> ModelServer {
        ModelServer::new(cache_size, Duration::from_secs(1), 2)
    }

    #[tokio::test]
    async fn test_predict_returns_probability_and_confidence() {
        let model = make_model(vec![2.0, 0.0]);
        let score = server(2).predict(&model, &make_vector(&[1.0, 0.0])).await.unwrap();
        assert!(score.score > 0.8);
        assert!((score.confidence - (2.0 * score.score - 1.0)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error_not_default() {
        let model = make_model(vec![1.0, 1.0]);
        let err = server(2).predict(&model, &make_vector(&[1.0])).await.unwrap_err();
        assert!(matches!(
            err,
            PredictionError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_non_finite_features_rejected() {
        let model = make_model(vec![1.0]);
        let err = server(2).predict(&model, &make_vector(&[f64::INFINITY])).await.unwrap_err();
        assert!(matches!(err, PredictionError::MalformedFeatures(_)));
    }

    #[tokio::test]
    async fn test_cache_is_bounded_lru() {
        let server = server(2);
        let (a, b, c) = (make_model(vec![1.0]), make_model(vec![1.0]), make_model(vec![1.0]));
        let v = make_vector(&[0.5]);
        server.predict(&a, &v).await.unwrap();
        server.predict(&b, &v).await.unwrap();
        server.predict(&c, &v).await.unwrap();
        let artifacts = server.artifacts.lock().await;
        assert_eq!(artifacts.len(), 2);
        assert!(!artifacts.contains(&a.id));
    }

    #[tokio::test]
    async fn test_corrupt_parameters_are_invalid_artifact() {
        let mut model = make_model(vec![1.0]);
        model.parameters = json!({"weights": "nope"});
        let err = server(1).predict(&model, &make_vector(&[1.0])).await.unwrap_err();
        assert!(matches!(err, PredictionError::InvalidArtifact { .. }));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_rejected() {
        let mut model = make_model(vec![1.0]);
        model.algorithm = "gbdt".to_string();
        let err = server(1).predict(&model, &make_vector(&[1.0])).await.unwrap_err();
        assert!(matches!(err, PredictionError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn test_batch_scores_every_row_across_chunks() {
        let model = make_model(vec![1.0]);
        let vectors: Vec<FeatureVector> = (0..5).map(|i| make_vector(&[i as f64])).collect();
        let scores = server(1).predict_batch(&model, &vectors).await.unwrap();
        assert_eq!(scores.len(), 5);
        assert!(scores.windows(2).all(|w| w[0].score < w[1].score));
    }

    #[tokio::test]
    async fn test_evict_removes_artifact() {
        let server = server(2);
        let model = make_model(vec![1.0]);
        server.predict(&model, &make_vector(&[1.0])).await.unwrap();
        assert!(server.evict(model.id).await);
        assert!(!server.evict(model.id).await);
        assert!(server.artifacts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_over_budget_times_out_between_chunks() {
        let server = ModelServer::new(1, Duration::ZERO, 2);
        let model = make_model(vec![1.0]);
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let err = server.predict_rows(&model, &rows).await.unwrap_err();
        assert!(matches!(err, PredictionError::Timeout(_)));
    }
}

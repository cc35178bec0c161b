//! Matching pipeline façade: the single entry point for feature extraction, training,
//! serving, deployment, experiments and monitoring.
//!
//! Components are built lazily on first use, which also warms the model cache from the
//! registry. `deploy_model` is the only writer of the one-active-model-per-type invariant:
//! deployments of one type are serialized by a per-type lock (also held while a new
//! model of that type is versioned and inserted), the registry flips the flags
//! in one transaction and the cache applies the same activation under one write lock.

pub mod cache;
pub mod events;


use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::evaluation::{compute_metrics, DECISION_THRESHOLD};
use crate::experiment::{
    AbSettings, AbTestFramework, Assignment, Experiment, ExperimentError, ExperimentReport,
};
use crate::features::{
    EmbeddingProvider, ExtractionError, ExtractorConfig, FeatureExtractor, FeatureVector,
};
use crate::models::model::{
    MLModel, ModelMetadata, ModelMetrics, PredictionLogEntry, PredictionMetadata,
    PredictionResult,
};
use crate::models::profile::{CandidateProfile, JobProfile, LabeledPair};
use crate::monitoring::{HealthThresholds, MonitoringOrchestrator, MonitoringReport, Observation};
use crate::registry::{ModelRegistry, OutcomeUpdate, RegistryError};
use crate::serving::{
    model_tag, prediction_key, CachedScore, ModelServer, PredictionCache, PredictionError,
};
use crate::training::{
    ModelConfig, Trainer, TrainingData, TrainingError, TrainingParams, TrainingSample,
};

pub use cache::ModelCache;
pub use events::PipelineEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    #[error("failed to serialize model artifact: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no active model for type '{model_type}'")]
    NoActiveModel { model_type: String },

    #[error("model {0} not found")]
    ModelNotFound(Uuid),

    #[error("prediction {0} not found")]
    PredictionNotFound(Uuid),

    #[error("model {0} is already being retrained")]
    RetrainingInProgress(Uuid),

    #[error("prediction {0} already has a recorded outcome")]
    OutcomeAlreadyRecorded(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// How a prediction request is routed to a model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictOptions {
    /// Serve this exact model; A/B routing is skipped.
    #[serde(default)]
    pub model_id: Option<Uuid>,
    /// Restricts routing to one model type.
    #[serde(default)]
    pub model_type: Option<String>,
    /// Pins A/B assignment to a stable key such as a user or session id.
    #[serde(default)]
    pub sticky_key: Option<String>,
}

/// External collaborators of the pipeline.
pub struct PipelineDeps {
    pub registry: Arc<dyn ModelRegistry>,
    pub trainer: Arc<dyn Trainer>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub prediction_cache: Option<Arc<dyn PredictionCache>>,
    pub model_cache: Arc<ModelCache>,
    pub rng_seed: Option<u64>,
}

impl PipelineDeps {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        trainer: Arc<dyn Trainer>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            registry,
            trainer,
            embedder,
            prediction_cache: None,
            model_cache: Arc::new(ModelCache::new()),
            rng_seed: None,
        }
    }

    pub fn with_prediction_cache(mut self, cache: Arc<dyn PredictionCache>) -> Self {
        self.prediction_cache = Some(cache);
        self
    }

    pub fn with_model_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.model_cache = cache;
        self
    }

    /// Deterministic A/B draws.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

struct Components {
    extractor: FeatureExtractor,
    server: ModelServer,
    experiments: AbTestFramework,
    monitor: MonitoringOrchestrator,
}

struct Inner {
    config: PipelineConfig,
    registry: Arc<dyn ModelRegistry>,
    trainer: Arc<dyn Trainer>,
    embedder: Arc<dyn EmbeddingProvider>,
    prediction_cache: Option<Arc<dyn PredictionCache>>,
    models: Arc<ModelCache>,
    rng_seed: Option<u64>,
    components: OnceCell<Components>,
    type_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<PipelineEvent>,
}

struct Routed {
    model: MLModel,
    assignment: Option<Assignment>,
}

#[derive(Clone)]
pub struct MatchingPipeline {
    inner: Arc<Inner>,
}

impl MatchingPipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: deps.registry,
                trainer: deps.trainer,
                embedder: deps.embedder,
                prediction_cache: deps.prediction_cache,
                models: deps.model_cache,
                rng_seed: deps.rng_seed,
                components: OnceCell::new(),
                type_locks: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Forces lazy initialization; a no-op once initialized.
    pub async fn init(&self) -> Result<(), PipelineError> {
        self.components().await.map(|_| ())
    }

    async fn components(&self) -> Result<&Components, PipelineError> {
        self.inner
            .components
            .get_or_try_init(|| self.initialize())
            .await
    }

    async fn initialize(&self) -> Result<Components, PipelineError> {
        let config = &self.inner.config;
        let extractor = FeatureExtractor::new(
            ExtractorConfig::from(config),
            Arc::clone(&self.inner.embedder),
        )?;
        let server = ModelServer::new(
            config.model_cache_size,
            config.prediction_timeout,
            config.batch_size,
        );
        let settings = AbSettings::from(config);
        let experiments = match self.inner.rng_seed {
            Some(seed) => AbTestFramework::with_seed(settings, seed),
            None => AbTestFramework::new(settings),
        };
        let monitor = MonitoringOrchestrator::new(HealthThresholds::from(config));

        let active = self.inner.registry.list_active().await?;
        info!(
            "Pipeline initialized: {} active model(s), feature dimension {}",
            active.len(),
            extractor.dimension()
        );
        self.inner.models.load_active(active).await;

        Ok(Components {
            extractor,
            server,
            experiments,
            monitor,
        })
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }

    // ── Features ─────────────────────────────────────────────────────────────

    pub async fn extract_features(
        &self,
        candidate: &CandidateProfile,
        job: &JobProfile,
    ) -> Result<FeatureVector, PipelineError> {
        let components = self.components().await?;
        Ok(components.extractor.extract(candidate, job).await?)
    }

    /// Extracts a labeled dataset. Pairs with missing or invalid profile fields are skipped;
    /// embedding failures abort the build.
    pub async fn build_training_data(
        &self,
        pairs: &[LabeledPair],
    ) -> Result<TrainingData, PipelineError> {
        let components = self.components().await?;
        let mut samples = Vec::with_capacity(pairs.len());
        let mut skipped = 0usize;
        for (index, pair) in pairs.iter().enumerate() {
            match components.extractor.extract_sample(pair).await {
                Ok(sample) => samples.push(sample),
                Err(e @ (ExtractionError::MissingField { .. } | ExtractionError::InvalidField { .. })) => {
                    warn!("Skipping training pair {index}: {e}");
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if skipped > 0 {
            info!(
                "Built training data: {} samples, {} skipped",
                samples.len(),
                skipped
            );
        }
        Ok(TrainingData::new(samples))
    }

    // ── Training & evaluation ────────────────────────────────────────────────

    /// Trains and registers an inactive model. Nothing is registered when any step fails.
    pub async fn train_model(
        &self,
        data: TrainingData,
        config: ModelConfig,
        name: Option<String>,
    ) -> Result<MLModel, PipelineError> {
        self.train_inner(data, config, name, None).await
    }

    async fn train_inner(
        &self,
        data: TrainingData,
        config: ModelConfig,
        name: Option<String>,
        retrained_from: Option<Uuid>,
    ) -> Result<MLModel, PipelineError> {
        let components = self.components().await?;
        let settings = &self.inner.config;

        let dimension = data.validate()?;
        let expected = components.extractor.dimension();
        if dimension != expected {
            return Err(TrainingError::DimensionMismatch {
                index: 0,
                expected,
                actual: dimension,
            }
            .into());
        }

        let started = Instant::now();
        let sample_count = data.len();
        let split = data.split(settings.validation_split, settings.test_split);
        info!(
            "Training '{}' ({}) on {} samples: {} train / {} validation / {} test",
            config.model_type,
            config.algorithm,
            sample_count,
            split.train.len(),
            split.validation.len(),
            split.test.len()
        );

        let trained = self
            .inner
            .trainer
            .train(&split, &config, TrainingParams::from(settings))
            .await?;

        // Version assignment and insert are serialized per type.
        let lock = self.type_lock(&config.model_type).await;
        let _guard = lock.lock().await;
        let now = Utc::now();
        let existing = self.inner.registry.list_by_type(&config.model_type).await?;
        let version = next_version(&existing);
        let mut model = MLModel {
            id: Uuid::new_v4(),
            name: name.unwrap_or_else(|| format!("{}-v{}", config.model_type, version)),
            version,
            model_type: config.model_type.clone(),
            algorithm: trained.artifact.algorithm.clone(),
            accuracy: 0.0,
            parameters: serde_json::to_value(&trained.artifact)?,
            active: false,
            metadata: ModelMetadata {
                training_time_ms: None,
                sample_count: Some(sample_count),
                train_count: Some(split.train.len()),
                validation_count: Some(split.validation.len()),
                test_count: Some(split.test.len()),
                iterations: Some(trained.iterations),
                learning_rate: Some(trained.learning_rate),
                l2_penalty: Some(trained.l2_penalty),
                last_metrics: None,
                retrained_from,
            },
            created_at: now,
            updated_at: now,
            deployed_at: None,
        };

        let holdout = [&split.test, &split.validation, &split.train]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let metrics = self.score_samples(components, &model, holdout, now).await?;
        model.accuracy = metrics.accuracy;
        model.metadata.last_metrics = Some(metrics.clone());
        model.metadata.training_time_ms = Some(started.elapsed().as_millis() as u64);

        self.inner.registry.insert(&model).await?;
        self.inner.models.set_metrics(model.id, metrics).await;

        info!(
            "Trained model {} ({} v{}): accuracy {:.3} after {} iterations in {}ms",
            model.id,
            model.name,
            model.version,
            model.accuracy,
            trained.iterations,
            model.metadata.training_time_ms.unwrap_or_default()
        );
        self.emit(PipelineEvent::ModelTrained {
            model_id: model.id,
            model_type: model.model_type.clone(),
            version: model.version.clone(),
            accuracy: model.accuracy,
        });
        Ok(model)
    }

    /// Scores labeled samples with the given model and records the resulting metrics.
    pub async fn evaluate_model(
        &self,
        model_id: Uuid,
        samples: &[TrainingSample],
    ) -> Result<ModelMetrics, PipelineError> {
        if samples.is_empty() {
            return Err(PipelineError::InvalidInput(
                "evaluation needs at least one labeled sample".to_string(),
            ));
        }
        let components = self.components().await?;
        let model = self.find_model(model_id).await?;
        let metrics = self
            .score_samples(components, &model, samples, Utc::now())
            .await?;

        self.inner.registry.record_metrics(model.id, &metrics).await?;
        self.inner.models.set_metrics(model.id, metrics.clone()).await;
        info!(
            "Evaluated model {} on {} samples: accuracy {:.3}, f1 {:.3}",
            model.id,
            samples.len(),
            metrics.accuracy,
            metrics.f1_score
        );
        Ok(metrics)
    }

    async fn score_samples(
        &self,
        components: &Components,
        model: &MLModel,
        samples: &[TrainingSample],
        at: DateTime<Utc>,
    ) -> Result<ModelMetrics, PipelineError> {
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
        let labels: Vec<bool> = samples.iter().map(|s| s.label).collect();
        let scores: Vec<f64> = components
            .server
            .predict_rows(model, &rows)
            .await?
            .into_iter()
            .map(|s| s.score)
            .collect();
        Ok(compute_metrics(&scores, &labels, at))
    }

    // ── Serving ──────────────────────────────────────────────────────────────

    pub async fn predict(
        &self,
        candidate: &CandidateProfile,
        job: &JobProfile,
        model_id: Option<Uuid>,
    ) -> Result<PredictionResult, PipelineError> {
        let options = PredictOptions {
            model_id,
            ..PredictOptions::default()
        };
        self.predict_with(candidate, job, &options).await
    }

    /// Routing, extraction, cache lookup and scoring share one `prediction_timeout`.
    pub async fn predict_with(
        &self,
        candidate: &CandidateProfile,
        job: &JobProfile,
        options: &PredictOptions,
    ) -> Result<PredictionResult, PipelineError> {
        let components = self.components().await?;
        let started = Instant::now();
        let timeout = self.inner.config.prediction_timeout;

        let (routed, features, scored, cache_hit) = tokio::time::timeout(timeout, async {
            let routed = self.route(components, options).await?;
            let features = components.extractor.extract(candidate, job).await?;
            let (scored, cache_hit) = self.score_cached(components, &routed.model, &features).await?;
            Ok::<_, PipelineError>((routed, features, scored, cache_hit))
        })
        .await
        .map_err(|_| PredictionError::Timeout(timeout))??;

        let result = build_result(
            &routed,
            features,
            scored,
            started.elapsed().as_millis() as u64,
            cache_hit,
        );
        debug!(
            "Prediction {} by model {} ({}): {:.3}",
            result.id,
            result.model_id,
            result
                .metadata
                .ab_group
                .map(|g| g.as_str())
                .unwrap_or("direct"),
            result.prediction
        );
        self.log_prediction(&routed.model, candidate.id, job.id, &result)
            .await;
        Ok(result)
    }

    /// Scores many pairs against one routed model, in chunks of `batch_size`.
    pub async fn predict_batch(
        &self,
        pairs: &[(CandidateProfile, JobProfile)],
        options: &PredictOptions,
    ) -> Result<Vec<PredictionResult>, PipelineError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let components = self.components().await?;
        let started = Instant::now();
        let routed = self.route(components, options).await?;

        let mut vectors = Vec::with_capacity(pairs.len());
        for (candidate, job) in pairs {
            vectors.push(components.extractor.extract(candidate, job).await?);
        }
        let scores = components
            .server
            .predict_batch(&routed.model, &vectors)
            .await?;
        let elapsed = started.elapsed().as_millis() as u64;

        let mut results = Vec::with_capacity(pairs.len());
        for ((candidate, job), (features, score)) in pairs.iter().zip(vectors.into_iter().zip(scores)) {
            let scored = CachedScore {
                score: score.score,
                confidence: score.confidence,
            };
            let result = build_result(&routed, features, scored, elapsed, false);
            self.log_prediction(&routed.model, candidate.id, job.id, &result)
                .await;
            results.push(result);
        }
        info!(
            "Batch of {} predictions by model {} in {}ms",
            results.len(),
            routed.model.id,
            elapsed
        );
        Ok(results)
    }

    async fn route(
        &self,
        components: &Components,
        options: &PredictOptions,
    ) -> Result<Routed, PipelineError> {
        if let Some(id) = options.model_id {
            return Ok(Routed {
                model: self.find_model(id).await?,
                assignment: None,
            });
        }

        let model_type = options
            .model_type
            .as_deref()
            .unwrap_or(&self.inner.config.default_model_type);
        if self.inner.config.ab_testing_enabled {
            if let Some(assignment) = components
                .experiments
                .assign(model_type, options.sticky_key.as_deref())
                .await
            {
                return Ok(Routed {
                    model: self.find_model(assignment.model_id).await?,
                    assignment: Some(assignment),
                });
            }
        }

        let model = self
            .select_best_model(options.model_type.as_deref())
            .await?
            .ok_or_else(|| PipelineError::NoActiveModel {
                model_type: options
                    .model_type
                    .clone()
                    .unwrap_or_else(|| "*".to_string()),
            })?;
        Ok(Routed {
            model,
            assignment: None,
        })
    }

    async fn score_cached(
        &self,
        components: &Components,
        model: &MLModel,
        features: &FeatureVector,
    ) -> Result<(CachedScore, bool), PipelineError> {
        let Some(cache) = &self.inner.prediction_cache else {
            let score = components.server.predict(model, features).await?;
            return Ok((
                CachedScore {
                    score: score.score,
                    confidence: score.confidence,
                },
                false,
            ));
        };

        let key = prediction_key(model.id, features.content_hash());
        match cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedScore>(&raw) {
                Ok(hit) => return Ok((hit, true)),
                Err(e) => warn!("Discarding corrupt prediction cache entry {key}: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("Prediction cache read failed: {e}"),
        }

        let score = components.server.predict(model, features).await?;
        let scored = CachedScore {
            score: score.score,
            confidence: score.confidence,
        };
        match serde_json::to_string(&scored) {
            Ok(raw) => {
                if let Err(e) = cache
                    .set(
                        &key,
                        &raw,
                        self.inner.config.prediction_cache_ttl,
                        &[model_tag(model.id)],
                    )
                    .await
                {
                    warn!("Prediction cache write failed: {e}");
                }
            }
            Err(e) => warn!("Could not encode cached score: {e}"),
        }
        Ok((scored, false))
    }

    /// Best-effort: a failed or slow audit write never fails the prediction.
    async fn log_prediction(
        &self,
        model: &MLModel,
        candidate_id: Uuid,
        job_id: Uuid,
        result: &PredictionResult,
    ) {
        let entry = PredictionLogEntry {
            id: result.id,
            model_id: model.id,
            model_type: model.model_type.clone(),
            candidate_id,
            job_id,
            prediction: result.prediction,
            confidence: result.confidence,
            features: result.features.values(),
            metadata: result.metadata.clone(),
            outcome: None,
            created_at: result.timestamp,
        };
        let timeout = self.inner.config.prediction_timeout;
        match tokio::time::timeout(timeout, self.inner.registry.log_prediction(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to log prediction {}: {e}", entry.id),
            Err(_) => warn!("Timed out logging prediction {}", entry.id),
        }
    }

    async fn find_model(&self, id: Uuid) -> Result<MLModel, PipelineError> {
        if let Some(model) = self.inner.models.active(id).await {
            return Ok(model);
        }
        self.inner
            .registry
            .get(id)
            .await?
            .ok_or(PipelineError::ModelNotFound(id))
    }

    // ── Deployment ───────────────────────────────────────────────────────────

    pub async fn deploy_model(&self, model_id: Uuid) -> Result<MLModel, PipelineError> {
        let components = self.components().await?;
        let target = self
            .inner
            .registry
            .get(model_id)
            .await?
            .ok_or(PipelineError::ModelNotFound(model_id))?;

        let lock = self.type_lock(&target.model_type).await;
        let _guard = lock.lock().await;

        let activation = self
            .inner
            .registry
            .activate(model_id, Utc::now())
            .await
            .map_err(|e| match e {
                RegistryError::NotFound(id) => PipelineError::ModelNotFound(id),
                other => PipelineError::Registry(other),
            })?;
        self.inner.models.apply_activation(&activation).await;
        for id in &activation.deactivated {
            if components.server.evict(*id).await {
                debug!("Evicted artifact of deactivated model {id}");
            }
        }

        if let Some(cache) = &self.inner.prediction_cache {
            let affected = std::iter::once(activation.model.id).chain(activation.deactivated.iter().copied());
            for id in affected {
                if let Err(e) = cache.invalidate_tag(&model_tag(id)).await {
                    warn!("Failed to invalidate cached predictions of model {id}: {e}");
                }
            }
        }

        if let Some(stale) = components
            .experiments
            .end_if_stale(&target.model_type, model_id)
            .await
        {
            info!(
                "Ended experiment {} for '{}': its control is no longer active",
                stale.id, stale.model_type
            );
        }

        info!(
            "Deployed model {} ({} v{}) for '{}', deactivated {:?}",
            activation.model.id,
            activation.model.name,
            activation.model.version,
            activation.model.model_type,
            activation.deactivated
        );
        self.emit(PipelineEvent::ModelDeployed {
            model_id: activation.model.id,
            model_type: activation.model.model_type.clone(),
            deactivated: activation.deactivated.clone(),
        });
        Ok(activation.model)
    }

    /// Serializes deployments and version assignment of one model type.
    async fn type_lock(&self, model_type: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.type_locks.lock().await;
        Arc::clone(locks.entry(model_type.to_string()).or_default())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get_model_metrics(
        &self,
        model_id: Uuid,
    ) -> Result<Option<ModelMetrics>, PipelineError> {
        self.components().await?;
        if let Some(metrics) = self.inner.models.metrics(model_id).await {
            return Ok(Some(metrics));
        }
        let Some(model) = self.inner.registry.get(model_id).await? else {
            return Ok(None);
        };
        let metrics = model.metadata.last_metrics;
        if let Some(m) = &metrics {
            self.inner.models.set_metrics(model_id, m.clone()).await;
        }
        Ok(metrics)
    }

    pub async fn get_active_models(&self) -> Result<Vec<MLModel>, PipelineError> {
        self.components().await?;
        Ok(self.inner.models.active_models().await)
    }

    /// Highest accuracy among active models (optionally of one type), ties going to the
    /// most recent deployment.
    pub async fn select_best_model(
        &self,
        model_type: Option<&str>,
    ) -> Result<Option<MLModel>, PipelineError> {
        self.components().await?;
        let mut candidates = self.inner.models.active_models().await;
        if let Some(model_type) = model_type {
            candidates.retain(|m| m.model_type == model_type);
        }
        Ok(candidates.into_iter().max_by(|a, b| {
            a.accuracy
                .partial_cmp(&b.accuracy)
                .unwrap_or(Ordering::Equal)
                .then(a.deployed_at.cmp(&b.deployed_at))
        }))
    }

    // ── Outcomes & experiments ───────────────────────────────────────────────

    /// Stores the observed label of a served prediction and credits its A/B arm.
    /// A prediction is labeled once; repeats are rejected and never counted again.
    pub async fn record_outcome(
        &self,
        prediction_id: Uuid,
        positive: bool,
    ) -> Result<PredictionLogEntry, PipelineError> {
        let components = self.components().await?;
        let update = self
            .inner
            .registry
            .record_outcome(prediction_id, positive)
            .await?
            .ok_or(PipelineError::PredictionNotFound(prediction_id))?;
        let entry = match update {
            OutcomeUpdate::Recorded(entry) => entry,
            OutcomeUpdate::AlreadyRecorded(_) => {
                return Err(PipelineError::OutcomeAlreadyRecorded(prediction_id));
            }
        };

        if let (Some(experiment_id), Some(group)) =
            (entry.metadata.experiment_id, entry.metadata.ab_group)
        {
            let correct = (entry.prediction >= DECISION_THRESHOLD) == positive;
            components
                .experiments
                .record_outcome(&entry.model_type, experiment_id, group, correct)
                .await;
        }
        Ok(entry)
    }

    /// Starts an experiment of `challenger_id` against the active model of its type.
    pub async fn start_experiment(
        &self,
        model_type: &str,
        challenger_id: Uuid,
    ) -> Result<Experiment, PipelineError> {
        let components = self.components().await?;
        let control = self
            .inner
            .models
            .active_for_type(model_type)
            .await
            .ok_or_else(|| PipelineError::NoActiveModel {
                model_type: model_type.to_string(),
            })?;
        let challenger = self
            .inner
            .registry
            .get(challenger_id)
            .await?
            .ok_or(PipelineError::ModelNotFound(challenger_id))?;
        if challenger.model_type != model_type {
            return Err(PipelineError::InvalidInput(format!(
                "challenger {} is a '{}' model, not '{}'",
                challenger.id, challenger.model_type, model_type
            )));
        }
        Ok(components
            .experiments
            .start(model_type, control.id, challenger.id, Utc::now())
            .await?)
    }

    pub async fn experiment_report(
        &self,
        model_type: &str,
    ) -> Result<ExperimentReport, PipelineError> {
        let components = self.components().await?;
        Ok(components.experiments.report(model_type).await?)
    }

    pub async fn end_experiment(&self, model_type: &str) -> Result<ExperimentReport, PipelineError> {
        let components = self.components().await?;
        Ok(components.experiments.end(model_type).await?)
    }

    // ── Monitoring & retraining ──────────────────────────────────────────────

    /// One monitoring cycle at `now`. Retraining jobs are spawned in the background;
    /// their completion is reported through [`PipelineEvent`]s.
    pub async fn monitor_models(&self, now: DateTime<Utc>) -> Result<MonitoringReport, PipelineError> {
        let components = self.components().await?;
        let active = self.inner.models.active_models().await;

        let mut observations = Vec::with_capacity(active.len());
        for model in active {
            let accuracy = self.measure_accuracy(&model, now).await;
            observations.push(Observation { model, accuracy });
        }

        let report = components.monitor.run_cycle(&observations, now).await;

        for health in report
            .models
            .iter()
            .filter(|h| report.degraded.contains(&h.model_id))
        {
            self.emit(PipelineEvent::ModelDegraded {
                model_id: health.model_id,
                model_type: health.model_type.clone(),
                accuracy: health.accuracy,
            });
        }
        for model_id in &report.retraining {
            let model_type = observations
                .iter()
                .find(|o| o.model.id == *model_id)
                .map(|o| o.model.model_type.clone())
                .unwrap_or_default();
            info!("Retraining triggered for model {model_id} ({model_type})");
            self.emit(PipelineEvent::RetrainingTriggered {
                model_id: *model_id,
                model_type: model_type.clone(),
            });
            self.spawn_retraining(*model_id, model_type);
        }

        info!(
            "Monitoring cycle: {} checked, {} degraded, {} skipped",
            report.models.len(),
            report.degraded.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Live outcomes when enough exist, else cached metrics, else the persisted ones.
    async fn measure_accuracy(&self, model: &MLModel, now: DateTime<Utc>) -> Option<f64> {
        let config = &self.inner.config;
        match self
            .inner
            .registry
            .labeled_predictions(model.id, config.retraining_sample_limit)
            .await
        {
            Ok(outcomes) if outcomes.len() as u64 >= config.min_sample_size.max(1) => {
                let (scores, labels): (Vec<f64>, Vec<bool>) = outcomes.into_iter().unzip();
                let metrics = compute_metrics(&scores, &labels, now);
                let accuracy = metrics.accuracy;
                self.inner.models.set_metrics(model.id, metrics).await;
                return Some(accuracy);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read outcomes of model {}: {e}", model.id),
        }

        if let Some(metrics) = self.inner.models.metrics(model.id).await {
            return Some(metrics.accuracy);
        }
        model.metadata.last_metrics.as_ref().map(|m| m.accuracy)
    }

    /// The monitoring cycle has already claimed the retraining slot of `model_id`.
    fn spawn_retraining(&self, model_id: Uuid, model_type: String) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let Ok(components) = pipeline.components().await else {
                return;
            };
            let outcome = match pipeline.inner.registry.get(model_id).await {
                Ok(Some(previous)) => pipeline.retrain_from(previous).await,
                Ok(None) => Err(PipelineError::ModelNotFound(model_id)),
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(successor) => {
                    info!(
                        "Retrained model {} as {} (v{})",
                        model_id, successor.id, successor.version
                    );
                    components.monitor.complete(model_id, true).await;
                }
                Err(e) => {
                    warn!("Retraining of model {model_id} failed: {e}");
                    components.monitor.complete(model_id, false).await;
                    pipeline.emit(PipelineEvent::RetrainingFailed {
                        model_id,
                        model_type,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    /// Trains a successor from the labeled prediction log of the model's type and deploys it.
    /// Refused while another retrain of the same model is in flight.
    pub async fn retrain_model(&self, model_id: Uuid) -> Result<MLModel, PipelineError> {
        let components = self.components().await?;
        let previous = self
            .inner
            .registry
            .get(model_id)
            .await?
            .ok_or(PipelineError::ModelNotFound(model_id))?;
        if !components.monitor.try_begin(model_id).await {
            return Err(PipelineError::RetrainingInProgress(model_id));
        }

        let outcome = self.retrain_from(previous).await;
        components.monitor.complete(model_id, outcome.is_ok()).await;
        outcome
    }

    async fn retrain_from(&self, previous: MLModel) -> Result<MLModel, PipelineError> {
        let samples = self
            .inner
            .registry
            .labeled_samples(&previous.model_type, self.inner.config.retraining_sample_limit)
            .await?;
        info!(
            "Retraining model {} on {} labeled predictions",
            previous.id,
            samples.len()
        );

        let defaults = ModelConfig::default();
        let config = ModelConfig {
            model_type: previous.model_type.clone(),
            algorithm: previous.algorithm.clone(),
            learning_rate: previous
                .metadata
                .learning_rate
                .unwrap_or(defaults.learning_rate),
            l2_penalty: previous.metadata.l2_penalty.unwrap_or(defaults.l2_penalty),
        };
        let successor = self
            .train_inner(
                TrainingData::new(samples),
                config,
                Some(previous.name.clone()),
                Some(previous.id),
            )
            .await?;
        self.deploy_model(successor.id).await
    }
}

fn build_result(
    routed: &Routed,
    features: FeatureVector,
    scored: CachedScore,
    processing_time_ms: u64,
    cache_hit: bool,
) -> PredictionResult {
    PredictionResult {
        id: Uuid::new_v4(),
        model_id: routed.model.id,
        model_name: routed.model.name.clone(),
        model_version: routed.model.version.clone(),
        prediction: scored.score,
        confidence: scored.confidence,
        features,
        timestamp: Utc::now(),
        metadata: PredictionMetadata {
            processing_time_ms,
            ab_group: routed.assignment.map(|a| a.group),
            experiment_id: routed.assignment.map(|a| a.experiment_id),
            cache_hit,
        },
    }
}

/// Next minor version after the highest existing `major.minor`; `1.0.0` for the first model.
pub fn next_version(existing: &[MLModel]) -> String {
    existing
        .iter()
        .filter_map(|m| parse_version(&m.version))
        .max()
        .map(|(major, minor)| format!("{major}.{}.0", minor + 1))
        .unwrap_or_else(|| "1.0.0".to_string())
}

fn parse_version(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

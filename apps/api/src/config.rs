use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Which durable registry backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Postgres,
    Memory,
}

/// Service configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub registry_backend: RegistryBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub embedding_service_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub monitor_interval: Duration,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let registry_backend = match optional_env("REGISTRY_BACKEND").as_deref() {
            None | Some("postgres") => RegistryBackend::Postgres,
            Some("memory") => RegistryBackend::Memory,
            Some(other) => bail!("REGISTRY_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        };

        let database_url = match registry_backend {
            RegistryBackend::Postgres => Some(require_env("DATABASE_URL")?),
            RegistryBackend::Memory => optional_env("DATABASE_URL"),
        };

        let pipeline = PipelineConfig::from_env()?;
        pipeline.validate()?;

        Ok(Config {
            registry_backend,
            database_url,
            redis_url: optional_env("REDIS_URL"),
            embedding_service_url: optional_env("EMBEDDING_SERVICE_URL"),
            port: parse_env("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            monitor_interval: Duration::from_secs(parse_env("MONITOR_INTERVAL_SECS", 3600u64)?),
            pipeline,
        })
    }
}

/// Every tunable of the matching pipeline. `Default` gives the reference values.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // feature extraction
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub normalize_numeric: bool,
    pub embedding_timeout: Duration,

    // training
    pub validation_split: f64,
    pub test_split: f64,
    pub cross_validation_folds: usize,
    pub hyperparameter_tuning: bool,
    pub max_iterations: usize,
    pub early_stopping_patience: usize,

    // serving
    pub model_cache_size: usize,
    pub prediction_timeout: Duration,
    pub batch_size: usize,
    pub prediction_cache_ttl: Duration,
    pub default_model_type: String,

    // experiments
    pub ab_testing_enabled: bool,
    pub traffic_split: f64,
    pub min_sample_size: u64,
    pub confidence_level: f64,

    // monitoring
    pub accuracy_threshold: f64,
    pub stale_accuracy_threshold: f64,
    pub retention_days: i64,
    pub retraining_sample_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimension: 384,
            normalize_numeric: true,
            embedding_timeout: Duration::from_millis(2000),
            validation_split: 0.2,
            test_split: 0.2,
            cross_validation_folds: 5,
            hyperparameter_tuning: false,
            max_iterations: 1000,
            early_stopping_patience: 10,
            model_cache_size: 10,
            prediction_timeout: Duration::from_millis(5000),
            batch_size: 32,
            prediction_cache_ttl: Duration::from_secs(300),
            default_model_type: "candidate_job_match".to_string(),
            ab_testing_enabled: true,
            traffic_split: 0.1,
            min_sample_size: 100,
            confidence_level: 0.95,
            accuracy_threshold: 0.80,
            stale_accuracy_threshold: 0.85,
            retention_days: 30,
            retraining_sample_limit: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            embedding_model: optional_env("MATCH_EMBEDDING_MODEL").unwrap_or(d.embedding_model),
            embedding_dimension: parse_env("MATCH_EMBEDDING_DIMENSION", d.embedding_dimension)?,
            normalize_numeric: parse_env("MATCH_NORMALIZE_NUMERIC", d.normalize_numeric)?,
            embedding_timeout: Duration::from_millis(parse_env(
                "MATCH_EMBEDDING_TIMEOUT_MS",
                d.embedding_timeout.as_millis() as u64,
            )?),
            validation_split: parse_env("MATCH_VALIDATION_SPLIT", d.validation_split)?,
            test_split: parse_env("MATCH_TEST_SPLIT", d.test_split)?,
            cross_validation_folds: parse_env("MATCH_CV_FOLDS", d.cross_validation_folds)?,
            hyperparameter_tuning: parse_env("MATCH_HYPERPARAMETER_TUNING", d.hyperparameter_tuning)?,
            max_iterations: parse_env("MATCH_MAX_ITERATIONS", d.max_iterations)?,
            early_stopping_patience: parse_env("MATCH_EARLY_STOPPING_PATIENCE", d.early_stopping_patience)?,
            model_cache_size: parse_env("MATCH_MODEL_CACHE_SIZE", d.model_cache_size)?,
            prediction_timeout: Duration::from_millis(parse_env(
                "MATCH_PREDICTION_TIMEOUT_MS",
                d.prediction_timeout.as_millis() as u64,
            )?),
            batch_size: parse_env("MATCH_BATCH_SIZE", d.batch_size)?,
            prediction_cache_ttl: Duration::from_secs(parse_env(
                "MATCH_PREDICTION_CACHE_TTL_SECS",
                d.prediction_cache_ttl.as_secs(),
            )?),
            default_model_type: optional_env("MATCH_DEFAULT_MODEL_TYPE").unwrap_or(d.default_model_type),
            ab_testing_enabled: parse_env("MATCH_AB_TESTING_ENABLED", d.ab_testing_enabled)?,
            traffic_split: parse_env("MATCH_AB_TRAFFIC_SPLIT", d.traffic_split)?,
            min_sample_size: parse_env("MATCH_AB_MIN_SAMPLE_SIZE", d.min_sample_size)?,
            confidence_level: parse_env("MATCH_AB_CONFIDENCE_LEVEL", d.confidence_level)?,
            accuracy_threshold: parse_env("MATCH_ACCURACY_THRESHOLD", d.accuracy_threshold)?,
            stale_accuracy_threshold: parse_env("MATCH_STALE_ACCURACY_THRESHOLD", d.stale_accuracy_threshold)?,
            retention_days: parse_env("MATCH_RETENTION_DAYS", d.retention_days)?,
            retraining_sample_limit: parse_env("MATCH_RETRAINING_SAMPLE_LIMIT", d.retraining_sample_limit)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.validation_split) || !(0.0..1.0).contains(&self.test_split) {
            bail!("validation and test splits must be in [0, 1)");
        }
        if self.validation_split + self.test_split >= 1.0 {
            bail!("validation + test split must leave room for a training set");
        }
        if self.embedding_dimension == 0 {
            bail!("embedding dimension must be positive");
        }
        if self.model_cache_size == 0 || self.batch_size == 0 {
            bail!("model cache size and batch size must be positive");
        }
        if !(0.0..=1.0).contains(&self.traffic_split) {
            bail!("traffic split must be in [0, 1]");
        }
        if self.confidence_level <= 0.0 || self.confidence_level >= 1.0 {
            bail!("confidence level must be in (0, 1)");
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.default_model_type, "candidate_job_match");
    }

    #[test]
    fn test_splits_must_leave_training_room() {
        let config = PipelineConfig {
            validation_split: 0.5,
            test_split: 0.5,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_traffic_split_out_of_range_rejected() {
        let config = PipelineConfig {
            traffic_split: 1.5,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confidence_level_bounds() {
        let config = PipelineConfig {
            confidence_level: 1.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_uses_default_when_unset() {
        let value: u64 = parse_env("MATCH_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}

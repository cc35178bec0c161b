//! Feature Extractor: turns a (candidate, job) pair into a fixed-shape `FeatureVector`.
//!
//! Named signals (in this exact order):
//! 1. skill_overlap            Jaccard over candidate skills vs required ∪ preferred
//! 2. required_skill_coverage  share of required skills the candidate lists (1.0 if none)
//! 3. preferred_skill_coverage share of preferred skills the candidate lists (0.0 if none)
//! 4. experience_years         years, squashed to [0, 1] when normalizing
//! 5. experience_gap           years − minimum, tanh-squashed when normalizing
//! 6. meets_min_experience     0 / 1
//! 7. education_match          1.0 at or above requirement, else rank ratio
//! 8. seniority_distance       |candidate − job| rank distance
//! 9. location_match           1 same city / remote-compatible, 0 otherwise, 0.5 unknown
//! 10. salary_fit              1 within band, max/desired above it, 0.5 unknown
//! 11. title_similarity        token Jaccard of headline vs job title
//! 12. embedding_similarity    cosine of the two text embeddings
//!
//! followed by the element-wise product of both embeddings (`embedding_dimension` wide).
//! The extractor holds configuration only; identical inputs yield bit-identical vectors.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::features::embedding::{cosine_similarity, tokenize, EmbeddingError, EmbeddingProvider};
use crate::features::vector::{FeatureVector, NamedFeature};
use crate::models::profile::{CandidateProfile, JobProfile, LabeledPair, WorkArrangement};
use crate::training::data::TrainingSample;

pub const NAMED_FEATURES: [&str; 12] = [
    "skill_overlap",
    "required_skill_coverage",
    "preferred_skill_coverage",
    "experience_years",
    "experience_gap",
    "meets_min_experience",
    "education_match",
    "seniority_distance",
    "location_match",
    "salary_fit",
    "title_similarity",
    "embedding_similarity",
];

const EXPERIENCE_CAP_YEARS: f64 = 20.0;
const EXPERIENCE_GAP_SCALE: f64 = 5.0;
const MAX_RANK: f64 = 5.0;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{entity} profile is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity} profile has an invalid '{field}': {reason}")]
    InvalidField {
        entity: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding provider '{model}' yields dimension {actual}, extractor expects {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub normalize_numeric: bool,
    pub embedding_timeout: Duration,
}

impl From<&PipelineConfig> for ExtractorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension,
            normalize_numeric: config.normalize_numeric,
            embedding_timeout: config.embedding_timeout,
        }
    }
}

pub struct FeatureExtractor {
    config: ExtractorConfig,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl FeatureExtractor {
    pub fn new(
        config: ExtractorConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ExtractionError> {
        if embedder.dimension() != config.embedding_dimension {
            return Err(ExtractionError::DimensionMismatch {
                model: embedder.model_name().to_string(),
                expected: config.embedding_dimension,
                actual: embedder.dimension(),
            });
        }
        Ok(Self { config, embedder })
    }

    /// Width of every vector this extractor produces.
    pub fn dimension(&self) -> usize {
        NAMED_FEATURES.len() + self.config.embedding_dimension
    }

    pub async fn extract(
        &self,
        candidate: &CandidateProfile,
        job: &JobProfile,
    ) -> Result<FeatureVector, ExtractionError> {
        let candidate_skills = normalize_skills(candidate.skills.as_deref().ok_or(
            ExtractionError::MissingField {
                entity: "candidate",
                field: "skills",
            },
        )?);
        let years = candidate.years_experience.ok_or(ExtractionError::MissingField {
            entity: "candidate",
            field: "years_experience",
        })?;
        if !years.is_finite() || years < 0.0 {
            return Err(ExtractionError::InvalidField {
                entity: "candidate",
                field: "years_experience",
                reason: format!("expected a non-negative number, got {years}"),
            });
        }
        let title = job.title.as_deref().ok_or(ExtractionError::MissingField {
            entity: "job",
            field: "title",
        })?;
        let required = normalize_skills(job.required_skills.as_deref().ok_or(
            ExtractionError::MissingField {
                entity: "job",
                field: "required_skills",
            },
        )?);
        let preferred = normalize_skills(&job.preferred_skills);

        let candidate_embedding = self.embed(&candidate.embedding_text()).await?;
        let job_embedding = self.embed(&job.embedding_text()).await?;

        let all_job_skills: BTreeSet<String> = required.union(&preferred).cloned().collect();
        let min_years = job.min_years_experience.unwrap_or(0.0);
        let gap = years - min_years;

        let values = [
            jaccard(&candidate_skills, &all_job_skills),
            coverage(&candidate_skills, &required, 1.0),
            coverage(&candidate_skills, &preferred, 0.0),
            if self.config.normalize_numeric {
                (years / EXPERIENCE_CAP_YEARS).min(1.0)
            } else {
                years
            },
            if self.config.normalize_numeric {
                (gap / EXPERIENCE_GAP_SCALE).tanh()
            } else {
                gap
            },
            if years >= min_years { 1.0 } else { 0.0 },
            education_match(candidate, job),
            seniority_distance(candidate, job, self.config.normalize_numeric),
            location_match(candidate, job),
            salary_fit(candidate, job),
            jaccard(
                &tokenize(candidate.headline.as_deref().unwrap_or_default()).collect(),
                &tokenize(title).collect(),
            ),
            cosine_similarity(&candidate_embedding, &job_embedding),
        ];

        let named = NAMED_FEATURES
            .iter()
            .zip(values)
            .map(|(name, value)| NamedFeature {
                name: (*name).to_string(),
                value,
            })
            .collect();

        let embedding = candidate_embedding
            .iter()
            .zip(&job_embedding)
            .map(|(c, j)| *c as f64 * *j as f64)
            .collect();

        Ok(FeatureVector { named, embedding })
    }

    /// Single-row form used when building training data.
    pub async fn extract_sample(&self, pair: &LabeledPair) -> Result<TrainingSample, ExtractionError> {
        let features = self.extract(&pair.candidate, &pair.job).await?;
        Ok(TrainingSample {
            features: features.values(),
            label: pair.label,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExtractionError> {
        let timeout = self.config.embedding_timeout;
        let embedding = tokio::time::timeout(timeout, self.embedder.embed(text))
            .await
            .map_err(|_| EmbeddingError::Timeout(timeout))??;
        if embedding.len() != self.config.embedding_dimension {
            return Err(ExtractionError::DimensionMismatch {
                model: self.embedder.model_name().to_string(),
                expected: self.config.embedding_dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

fn normalize_skills(skills: &[String]) -> BTreeSet<String> {
    skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn coverage(have: &BTreeSet<String>, wanted: &BTreeSet<String>, when_empty: f64) -> f64 {
    if wanted.is_empty() {
        return when_empty;
    }
    wanted.iter().filter(|s| have.contains(*s)).count() as f64 / wanted.len() as f64
}

fn education_match(candidate: &CandidateProfile, job: &JobProfile) -> f64 {
    match (candidate.education, job.education) {
        (_, None) => 1.0,
        (None, Some(_)) => 0.0,
        (Some(c), Some(j)) if c.rank() >= j.rank() => 1.0,
        (Some(c), Some(j)) => c.rank() as f64 / j.rank().max(1) as f64,
    }
}

fn seniority_distance(candidate: &CandidateProfile, job: &JobProfile, normalize: bool) -> f64 {
    match (candidate.seniority, job.seniority) {
        (Some(c), Some(j)) => {
            let d = (c.rank() as f64 - j.rank() as f64).abs();
            if normalize {
                d / MAX_RANK
            } else {
                d
            }
        }
        _ => 0.0,
    }
}

fn location_match(candidate: &CandidateProfile, job: &JobProfile) -> f64 {
    if job.work_arrangement == Some(WorkArrangement::Remote) {
        return 1.0;
    }
    if candidate.work_arrangement == Some(WorkArrangement::Remote)
        && job.work_arrangement.is_some()
    {
        return 0.0;
    }
    match (candidate.location.as_deref(), job.location.as_deref()) {
        (Some(c), Some(j)) if c.trim().eq_ignore_ascii_case(j.trim()) => 1.0,
        (Some(_), Some(_)) => 0.0,
        _ => 0.5,
    }
}

fn salary_fit(candidate: &CandidateProfile, job: &JobProfile) -> f64 {
    match (candidate.desired_salary, job.salary.as_ref()) {
        (Some(desired), Some(band)) if desired > 0.0 => {
            if desired <= band.max {
                1.0
            } else {
                (band.max / desired).clamp(0.0, 1.0)
            }
        }
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::embedding::HashingEmbedder;
    use crate::models::profile::{EducationLevel, SalaryRange, Seniority};
    use uuid::Uuid;

    fn make_extractor(dim: usize) -> FeatureExtractor {
        let config = ExtractorConfig {
            embedding_model: "hash".to_string(),
            embedding_dimension: dim,
            normalize_numeric: true,
            embedding_timeout: Duration::from_secs(1),
        };
        FeatureExtractor::new(config, Arc::new(HashingEmbedder::new("hash", dim))).unwrap()
    }

    /// Answers like `HashingEmbedder`, but only after `delay`.
    struct SlowEmbedder {
        inner: HashingEmbedder,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed(text).await
        }
    }

    fn make_candidate() -> CandidateProfile {
        CandidateProfile {
            id: Uuid::new_v4(),
            skills: Some(vec!["Rust".to_string(), "Postgres".to_string(), "Kafka".to_string()]),
            years_experience: Some(6.0),
            education: Some(EducationLevel::Bachelor),
            seniority: Some(Seniority::Senior),
            location: Some("Berlin".to_string()),
            work_arrangement: Some(WorkArrangement::Hybrid),
            desired_salary: Some(90_000.0),
            headline: Some("Senior Backend Engineer".to_string()),
            summary: Some("Builds distributed systems in Rust".to_string()),
        }
    }

    fn make_job() -> JobProfile {
        JobProfile {
            id: Uuid::new_v4(),
            title: Some("Backend Engineer".to_string()),
            required_skills: Some(vec!["rust".to_string(), "postgres".to_string()]),
            preferred_skills: vec!["kubernetes".to_string()],
            min_years_experience: Some(4.0),
            education: Some(EducationLevel::Bachelor),
            seniority: Some(Seniority::Senior),
            location: Some("berlin".to_string()),
            work_arrangement: Some(WorkArrangement::Hybrid),
            salary: Some(SalaryRange {
                min: 80_000.0,
                max: 100_000.0,
            }),
            description: Some("Own the matching backend".to_string()),
        }
    }

    #[tokio::test]
    async fn test_extraction_is_deterministic() {
        let extractor = make_extractor(16);
        let (c, j) = (make_candidate(), make_job());
        let a = extractor.extract(&c, &j).await.unwrap();
        let b = extractor.extract(&c, &j).await.unwrap();
        assert_eq!(a, b);
        let bits_a: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[tokio::test]
    async fn test_vector_has_configured_dimension() {
        let extractor = make_extractor(24);
        let v = extractor.extract(&make_candidate(), &make_job()).await.unwrap();
        assert_eq!(v.dimension(), NAMED_FEATURES.len() + 24);
        assert_eq!(v.dimension(), extractor.dimension());
    }

    #[tokio::test]
    async fn test_skill_signals() {
        let extractor = make_extractor(8);
        let v = extractor.extract(&make_candidate(), &make_job()).await.unwrap();
        assert_eq!(v.get("required_skill_coverage"), Some(1.0));
        assert_eq!(v.get("preferred_skill_coverage"), Some(0.0));
        // {rust, postgres, kafka} vs {rust, postgres, kubernetes}: 2 / 4
        assert_eq!(v.get("skill_overlap"), Some(0.5));
        assert_eq!(v.get("meets_min_experience"), Some(1.0));
        assert_eq!(v.get("location_match"), Some(1.0));
        assert_eq!(v.get("salary_fit"), Some(1.0));
        assert_eq!(v.get("seniority_distance"), Some(0.0));
    }

    #[tokio::test]
    async fn test_missing_candidate_skills_is_typed_error() {
        let extractor = make_extractor(8);
        let mut c = make_candidate();
        c.skills = None;
        let err = extractor.extract(&c, &make_job()).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingField {
                entity: "candidate",
                field: "skills"
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_job_title_is_typed_error() {
        let extractor = make_extractor(8);
        let mut j = make_job();
        j.title = None;
        let err = extractor.extract(&make_candidate(), &j).await.unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField { entity: "job", .. }));
    }

    #[tokio::test]
    async fn test_negative_experience_rejected() {
        let extractor = make_extractor(8);
        let mut c = make_candidate();
        c.years_experience = Some(-1.0);
        assert!(matches!(
            extractor.extract(&c, &make_job()).await,
            Err(ExtractionError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_normalization_toggle_changes_experience_scale() {
        let mut raw = make_extractor(8);
        raw.config.normalize_numeric = false;
        let v = raw.extract(&make_candidate(), &make_job()).await.unwrap();
        assert_eq!(v.get("experience_years"), Some(6.0));
        assert_eq!(v.get("experience_gap"), Some(2.0));
    }

    #[test]
    fn test_mismatched_embedder_dimension_rejected() {
        let config = ExtractorConfig {
            embedding_model: "hash".to_string(),
            embedding_dimension: 16,
            normalize_numeric: true,
            embedding_timeout: Duration::from_secs(1),
        };
        let result = FeatureExtractor::new(config, Arc::new(HashingEmbedder::new("hash", 8)));
        assert!(matches!(result, Err(ExtractionError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_salary_above_band_is_scaled() {
        let mut c = make_candidate();
        c.desired_salary = Some(200_000.0);
        assert!((salary_fit(&c, &make_job()) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_remote_candidate_onsite_job_mismatch() {
        let mut c = make_candidate();
        c.work_arrangement = Some(WorkArrangement::Remote);
        let mut j = make_job();
        j.work_arrangement = Some(WorkArrangement::Onsite);
        assert_eq!(location_match(&c, &j), 0.0);
    }

    #[tokio::test]
    async fn test_extract_sample_carries_label() {
        let extractor = make_extractor(8);
        let pair = LabeledPair {
            candidate: make_candidate(),
            job: make_job(),
            label: true,
        };
        let sample = extractor.extract_sample(&pair).await.unwrap();
        assert!(sample.label);
        assert_eq!(sample.features.len(), extractor.dimension());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_embedding_service_is_typed_timeout() {
        let config = ExtractorConfig {
            embedding_model: "hash".to_string(),
            embedding_dimension: 8,
            normalize_numeric: true,
            embedding_timeout: Duration::from_millis(200),
        };
        let embedder = SlowEmbedder {
            inner: HashingEmbedder::new("hash", 8),
            delay: Duration::from_secs(5),
        };
        let extractor = FeatureExtractor::new(config, Arc::new(embedder)).unwrap();

        let err = extractor.extract(&make_candidate(), &make_job()).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Embedding(EmbeddingError::Timeout(t)) if t == Duration::from_millis(200)
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::training::TrainingError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    pub label: bool,
}

/// A finite batch of labeled samples. Consumed by value when split, so a batch is
/// trained on at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingData {
    samples: Vec<TrainingSample>,
    pub created_at: DateTime<Utc>,
}

/// Index-based partition: train = first rows, then validation, then test.
/// Callers needing a randomized split must shuffle before building `TrainingData`.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train: Vec<TrainingSample>,
    pub validation: Vec<TrainingSample>,
    pub test: Vec<TrainingSample>,
}

impl TrainingData {
    pub fn new(samples: Vec<TrainingSample>) -> Self {
        Self {
            samples,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    /// Checks every sample has the same width and finite values; returns that width.
    pub fn validate(&self) -> Result<usize, TrainingError> {
        let first = self.samples.first().ok_or(TrainingError::InsufficientData {
            required: 1,
            actual: 0,
        })?;
        let expected = first.features.len();
        if expected == 0 {
            return Err(TrainingError::InvalidSample {
                index: 0,
                reason: "empty feature vector".to_string(),
            });
        }
        for (index, sample) in self.samples.iter().enumerate() {
            if sample.features.len() != expected {
                return Err(TrainingError::DimensionMismatch {
                    index,
                    expected,
                    actual: sample.features.len(),
                });
            }
            if sample.features.iter().any(|v| !v.is_finite()) {
                return Err(TrainingError::InvalidSample {
                    index,
                    reason: "non-finite feature value".to_string(),
                });
            }
        }
        Ok(expected)
    }

    /// Sizes use floor rounding: 100 samples at 0.2 / 0.2 give 60 / 20 / 20.
    pub fn split(self, validation_ratio: f64, test_ratio: f64) -> DataSplit {
        let n = self.samples.len();
        let validation_len = (n as f64 * validation_ratio).floor() as usize;
        let test_len = (n as f64 * test_ratio).floor() as usize;
        let train_len = n.saturating_sub(validation_len + test_len);

        let mut samples = self.samples;
        let test = samples.split_off(train_len + validation_len);
        let validation = samples.split_off(train_len);
        DataSplit {
            train: samples,
            validation,
            test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_samples(n: usize, dim: usize) -> Vec<TrainingSample> {
        (0..n)
            .map(|i| TrainingSample {
                features: vec![i as f64; dim],
                label: i % 2 == 0,
            })
            .collect()
    }

    #[test]
    fn test_split_100_samples_is_60_20_20() {
        let split = TrainingData::new(make_samples(100, 3)).split(0.2, 0.2);
        assert_eq!(split.train.len(), 60);
        assert_eq!(split.validation.len(), 20);
        assert_eq!(split.test.len(), 20);
    }

    #[test]
    fn test_split_is_index_ordered() {
        let split = TrainingData::new(make_samples(10, 1)).split(0.2, 0.2);
        assert_eq!(split.train[0].features[0], 0.0);
        assert_eq!(split.validation[0].features[0], 6.0);
        assert_eq!(split.test[0].features[0], 8.0);
    }

    #[test]
    fn test_split_rounds_down() {
        // 7 * 0.2 = 1.4 -> 1 validation, 1 test, 5 train
        let split = TrainingData::new(make_samples(7, 1)).split(0.2, 0.2);
        assert_eq!(
            (split.train.len(), split.validation.len(), split.test.len()),
            (5, 1, 1)
        );
    }

    #[test]
    fn test_validate_detects_dimension_mismatch() {
        let mut samples = make_samples(3, 4);
        samples[2].features.pop();
        let err = TrainingData::new(samples).validate().unwrap_err();
        assert!(matches!(
            err,
            TrainingError::DimensionMismatch {
                index: 2,
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_validate_empty_is_insufficient() {
        let err = TrainingData::new(vec![]).validate().unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData { .. }));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut samples = make_samples(2, 2);
        samples[1].features[0] = f64::NAN;
        assert!(matches!(
            TrainingData::new(samples).validate(),
            Err(TrainingError::InvalidSample { index: 1, .. })
        ));
    }
}

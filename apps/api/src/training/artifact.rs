use serde::{Deserialize, Serialize};

pub const LOGISTIC_REGRESSION: &str = "logistic_regression";

/// Fitted parameters of a linear scoring model, stored as the registry's `parameters` blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub algorithm: String,
    pub dimension: usize,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl ModelArtifact {
    /// Raw margin `w·x + b`. Caller guarantees `features.len() == dimension`.
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    /// Probability of a positive match in [0, 1].
    pub fn probability(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn test_probability_uses_weights_and_bias() {
        let artifact = ModelArtifact {
            algorithm: LOGISTIC_REGRESSION.to_string(),
            dimension: 2,
            weights: vec![1.0, -1.0],
            bias: 0.0,
        };
        assert_eq!(artifact.margin(&[2.0, 2.0]), 0.0);
        assert!(artifact.probability(&[3.0, 0.0]) > 0.9);
    }
}

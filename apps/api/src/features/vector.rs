use serde::{Deserialize, Serialize};

use crate::features::fnv1a_64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedFeature {
    pub name: String,
    pub value: f64,
}

/// Model input for one candidate/job pair: ordered named signals followed by a
/// fixed-width embedding interaction block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub named: Vec<NamedFeature>,
    pub embedding: Vec<f64>,
}

impl FeatureVector {
    pub fn dimension(&self) -> usize {
        self.named.len() + self.embedding.len()
    }

    /// Flattened values in model input order.
    pub fn values(&self) -> Vec<f64> {
        self.named
            .iter()
            .map(|f| f.value)
            .chain(self.embedding.iter().copied())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.named.iter().find(|f| f.name == name).map(|f| f.value)
    }

    /// Stable content hash over the bit patterns of every value; keys the prediction cache.
    pub fn content_hash(&self) -> u64 {
        let bytes: Vec<u8> = self
            .values()
            .iter()
            .flat_map(|v| v.to_bits().to_le_bytes())
            .collect();
        fnv1a_64(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vector(values: &[f64], embedding: &[f64]) -> FeatureVector {
        FeatureVector {
            named: values
                .iter()
                .enumerate()
                .map(|(i, v)| NamedFeature {
                    name: format!("f{i}"),
                    value: *v,
                })
                .collect(),
            embedding: embedding.to_vec(),
        }
    }

    #[test]
    fn test_dimension_counts_named_and_embedding() {
        let v = make_vector(&[1.0, 2.0], &[0.1, 0.2, 0.3]);
        assert_eq!(v.dimension(), 5);
        assert_eq!(v.values(), vec![1.0, 2.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_content_hash_is_stable_and_value_sensitive() {
        let a = make_vector(&[1.0, 2.0], &[0.5]);
        let b = make_vector(&[1.0, 2.0], &[0.5]);
        let c = make_vector(&[1.0, 2.0], &[0.5000001]);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_get_by_name() {
        let v = make_vector(&[0.25], &[]);
        assert_eq!(v.get("f0"), Some(0.25));
        assert_eq!(v.get("missing"), None);
    }
}

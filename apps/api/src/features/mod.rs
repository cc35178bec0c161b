// Feature extraction: profile pair -> fixed-shape numeric vector.
// Pure with respect to configuration; all randomness-free so vectors can be cached by hash.

pub mod embedding;
pub mod extractor;
pub mod vector;

pub use embedding::{EmbeddingError, EmbeddingProvider, HashingEmbedder, HttpEmbeddingClient};
pub use extractor::{ExtractionError, ExtractorConfig, FeatureExtractor, NAMED_FEATURES};
pub use vector::{FeatureVector, NamedFeature};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a. Stable across processes and releases, unlike `DefaultHasher`.
pub(crate) fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }
}

//! Deterministic hash-based embedder.
//!
//! Hashes character n-grams into a fixed-dimension space. Not semantically
//! meaningful, but stable across runs, which is what the retrieval and cache
//! tests need in place of the remote API.

use crate::{Embedder, EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash-based embedder for tests and offline runs.
///
/// Identical texts map to identical vectors; texts sharing n-grams land
/// close in cosine space, so similarity thresholds remain exercisable.
pub struct HashedEmbedder {
    dimension: usize,
    num_hashes: u64,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            num_hashes: 4,
        }
    }

    /// Character bigrams plus whole words, lowercased. Bigrams keep CJK
    /// queries comparable without a segmenter.
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().filter(|c| !c.is_whitespace()).collect();
        let mut tokens: Vec<String> = chars.windows(2).map(|w| w.iter().collect()).collect();
        tokens.extend(
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .filter(|s| s.len() > 1)
                .map(|s| s.to_string()),
        );
        tokens
    }

    fn index_hash(&self, token: &str, seed: u64) -> usize {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }

    fn sign_hash(&self, token: &str, seed: u64) -> f32 {
        let mut hasher = DefaultHasher::new();
        (seed + 1000).hash(&mut hasher);
        token.hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| {
                if text.is_empty() {
                    return Err(EmbeddingError::EmptyInput);
                }
                let tokens = self.tokenize(text);
                let mut vector = vec![0.0f32; self.dimension];
                for token in &tokens {
                    for seed in 0..self.num_hashes {
                        let idx = self.index_hash(token, seed);
                        vector[idx] += self.sign_hash(token, seed);
                    }
                }
                let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in vector.iter_mut() {
                        *x /= norm;
                    }
                }
                Ok(vector)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashed"
    }
}

//! # Medikit Vectors
//!
//! Vector-index adapters behind one [`VectorStore`] trait: a remote HTTP
//! index for production and a brute-force in-memory store for tests.
//!
//! Document chunks are stored with L2 distance (`IVF_FLAT`, nlist 1024);
//! the semantic-response cache uses cosine with a smaller nlist (128).

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from vector-store operations.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for vector operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// A chunk record stored in the index.
///
/// Mirrors the persisted schema: auto id, 1024-dim vector, body text,
/// source document id, source tag, and metadata serialized as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub text: String,
    pub document_id: i64,
    pub source: String,
    /// JSON-as-string payload, ≤ 64 KiB like `text`.
    pub metadata: String,
}

impl VectorRecord {
    pub fn new(vector: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            vector,
            text: text.into(),
            document_id: 0,
            source: String::new(),
            metadata: "{}".to_string(),
        }
    }

    pub fn with_document(mut self, document_id: i64, source: impl Into<String>) -> Self {
        self.document_id = document_id;
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, metadata: &serde_json::Value) -> Self {
        self.metadata = metadata.to_string();
        self
    }
}

/// A hit from a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    /// Similarity score; higher is more similar regardless of metric.
    pub score: f32,
    pub text: String,
    pub document_id: i64,
    pub source: String,
    pub metadata: String,
}

/// Distance metric for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine similarity.
    Cosine,
    /// Euclidean (L2) distance.
    L2,
}

/// Index parameters declared when a collection is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexParams {
    pub metric: DistanceMetric,
    pub index_type: String,
    pub nlist: u32,
}

impl IndexParams {
    /// Document-chunk collection parameters.
    pub fn documents() -> Self {
        Self {
            metric: DistanceMetric::L2,
            index_type: "IVF_FLAT".to_string(),
            nlist: 1024,
        }
    }

    /// Semantic-cache collection parameters.
    pub fn cache() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            index_type: "IVF_FLAT".to_string(),
            nlist: 128,
        }
    }
}

/// Abstract interface over a vector index collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Insert records, returning their assigned ids.
    async fn insert(&self, records: Vec<VectorRecord>) -> VectorResult<Vec<i64>>;

    /// ANN search for the `k` most similar records.
    async fn search(&self, vector: &[f32], k: usize) -> VectorResult<Vec<SearchHit>>;

    /// Remove every record belonging to a document.
    async fn delete_by_document(&self, document_id: i64) -> VectorResult<()>;

    /// Remove records older than the given unix timestamp. Used by the
    /// semantic-cache cleanup sweep; stores without timestamps may no-op.
    async fn delete_older_than(&self, _cutoff_unix: i64) -> VectorResult<usize> {
        Ok(0)
    }

    async fn count(&self) -> VectorResult<usize>;
}

/// Vector arithmetic shared by the in-memory store and the retrievers.
pub mod util {
    /// Cosine similarity; zero when either vector has zero norm.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    /// Euclidean distance.
    pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

pub use memory::InMemoryStore;
pub use remote::RemoteStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_params_match_collection_contract() {
        let docs = IndexParams::documents();
        assert_eq!(docs.metric, DistanceMetric::L2);
        assert_eq!(docs.nlist, 1024);

        let cache = IndexParams::cache();
        assert_eq!(cache.metric, DistanceMetric::Cosine);
        assert_eq!(cache.nlist, 128);
        assert_eq!(cache.index_type, "IVF_FLAT");
    }

    #[test]
    fn util_distance_functions() {
        assert!((util::cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((util::euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}

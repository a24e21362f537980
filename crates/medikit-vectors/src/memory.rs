//! In-memory vector store using brute-force search.

use crate::{
    util, DistanceMetric, SearchHit, VectorError, VectorRecord, VectorResult, VectorStore,
};
use async_trait::async_trait;
use std::sync::RwLock;

struct StoredRecord {
    id: i64,
    record: VectorRecord,
    inserted_at_unix: i64,
}

/// Brute-force store for tests and small corpora.
///
/// Scores are normalized so that higher is always better: cosine scores are
/// returned as-is, L2 distances are mapped through `1 / (1 + d)`.
pub struct InMemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    next_id: RwLock<i64>,
    dimension: usize,
    metric: DistanceMetric,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self::with_metric(dimension, DistanceMetric::Cosine)
    }

    pub fn with_metric(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: RwLock::new(1),
            dimension,
            metric,
        }
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => util::cosine_similarity(a, b),
            DistanceMetric::L2 => 1.0 / (1.0 + util::euclidean_distance(a, b)),
        }
    }

    fn now_unix() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Backdate a record's insertion time. Test hook for the cleanup sweep.
    pub fn set_inserted_at(&self, id: i64, unix: i64) {
        let mut records = self.records.write().expect("lock poisoned");
        if let Some(stored) = records.iter_mut().find(|r| r.id == id) {
            stored.inserted_at_unix = unix;
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn insert(&self, records: Vec<VectorRecord>) -> VectorResult<Vec<i64>> {
        let mut store = self
            .records
            .write()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;
        let mut next_id = self
            .next_id
            .write()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;

        let mut ids = Vec::with_capacity(records.len());
        let now = Self::now_unix();
        for record in records {
            if record.vector.len() != self.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.vector.len(),
                });
            }
            let id = *next_id;
            *next_id += 1;
            store.push(StoredRecord {
                id,
                record,
                inserted_at_unix: now,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn search(&self, vector: &[f32], k: usize) -> VectorResult<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let store = self
            .records
            .read()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;

        let mut hits: Vec<SearchHit> = store
            .iter()
            .map(|stored| SearchHit {
                id: stored.id,
                score: self.score(vector, &stored.record.vector),
                text: stored.record.text.clone(),
                document_id: stored.record.document_id,
                source: stored.record.source.clone(),
                metadata: stored.record.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: i64) -> VectorResult<()> {
        let mut store = self
            .records
            .write()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;
        store.retain(|stored| stored.record.document_id != document_id);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff_unix: i64) -> VectorResult<usize> {
        let mut store = self
            .records
            .write()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;
        let before = store.len();
        store.retain(|stored| stored.inserted_at_unix >= cutoff_unix);
        Ok(before - store.len())
    }

    async fn count(&self) -> VectorResult<usize> {
        let store = self
            .records
            .read()
            .map_err(|e| VectorError::Connection(format!("lock poisoned: {}", e)))?;
        Ok(store.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vector: Vec<f32>, text: &str, doc: i64) -> VectorRecord {
        VectorRecord::new(vector, text).with_document(doc, "unit")
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = InMemoryStore::new(3);
        store
            .insert(vec![
                record(vec![1.0, 0.0, 0.0], "exact", 1),
                record(vec![0.7, 0.7, 0.0], "partial", 1),
                record(vec![0.0, 1.0, 0.0], "orthogonal", 2),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "exact");
        assert_eq!(hits[1].text, "partial");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryStore::new(4);
        let err = store
            .insert(vec![record(vec![1.0, 0.0], "short", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn delete_by_document_removes_all_chunks() {
        let store = InMemoryStore::new(2);
        store
            .insert(vec![
                record(vec![1.0, 0.0], "a", 7),
                record(vec![0.0, 1.0], "b", 7),
                record(vec![0.5, 0.5], "c", 8),
            ])
            .await
            .unwrap();

        store.delete_by_document(7).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn l2_metric_maps_distance_to_similarity() {
        let store = InMemoryStore::with_metric(2, DistanceMetric::L2);
        store
            .insert(vec![record(vec![0.0, 0.0], "origin", 1)])
            .await
            .unwrap();
        let hits = store.search(&[3.0, 4.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0 / 6.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cleanup_sweep_removes_old_records() {
        let store = InMemoryStore::new(2);
        let ids = store
            .insert(vec![record(vec![1.0, 0.0], "old", 1)])
            .await
            .unwrap();
        store.set_inserted_at(ids[0], 100);

        let removed = store.delete_older_than(1_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

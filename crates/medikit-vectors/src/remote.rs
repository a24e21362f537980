//! Remote vector-index adapter over HTTP.
//!
//! Speaks a JSON collection API: ensure-collection with index parameters at
//! connect time, then insert / search / delete. Scores come back already
//! normalized (higher = more similar) so callers never branch on the metric.

use crate::{
    DistanceMetric, IndexParams, SearchHit, VectorError, VectorRecord, VectorResult, VectorStore,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

/// HTTP client for a remote vector index collection.
pub struct RemoteStore {
    client: Client,
    url: String,
    collection: String,
    dimension: usize,
    params: IndexParams,
}

#[derive(Serialize)]
struct EnsureCollectionRequest<'a> {
    collection: &'a str,
    dimension: usize,
    metric: &'a str,
    index_type: &'a str,
    nlist: u32,
}

#[derive(Serialize)]
struct InsertRequest<'a> {
    collection: &'a str,
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
struct InsertResponse {
    ids: Vec<i64>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    collection: &'a str,
    vector: &'a [f32],
    limit: usize,
    /// Probe count for the IVF index.
    nprobe: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: usize,
}

impl RemoteStore {
    /// Connect to the index and ensure the collection exists with the given
    /// parameters.
    pub async fn connect(
        url: &str,
        collection: &str,
        dimension: usize,
        params: IndexParams,
    ) -> VectorResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VectorError::Connection(e.to_string()))?;

        let store = Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            dimension,
            params,
        };
        store.ensure_collection().await?;
        info!(collection = %store.collection, dimension, "vector collection ready");
        Ok(store)
    }

    async fn ensure_collection(&self) -> VectorResult<()> {
        let metric = match self.params.metric {
            DistanceMetric::Cosine => "COSINE",
            DistanceMetric::L2 => "L2",
        };
        let request = EnsureCollectionRequest {
            collection: &self.collection,
            dimension: self.dimension,
            metric,
            index_type: &self.params.index_type,
            nlist: self.params.nlist,
        };

        let response = self
            .client
            .post(format!("{}/collections", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Collection(format!(
                "ensure collection failed {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn check(&self, response: reqwest::Response) -> VectorResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(VectorError::Api(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl VectorStore for RemoteStore {
    fn name(&self) -> &str {
        "remote"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.params.metric
    }

    async fn insert(&self, records: Vec<VectorRecord>) -> VectorResult<Vec<i64>> {
        for record in &records {
            if record.vector.len() != self.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.vector.len(),
                });
            }
        }

        let request = InsertRequest {
            collection: &self.collection,
            records: &records,
        };
        let response = self
            .client
            .post(format!("{}/insert", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        let response = self.check(response).await?;

        let parsed: InsertResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        info!(collection = %self.collection, inserted = parsed.ids.len(), "vector insert");
        Ok(parsed.ids)
    }

    async fn search(&self, vector: &[f32], k: usize) -> VectorResult<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let request = SearchRequest {
            collection: &self.collection,
            vector,
            limit: k,
            nprobe: 10,
            filter: None,
        };
        let response = self
            .client
            .post(format!("{}/search", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        let response = self.check(response).await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok(parsed.hits)
    }

    async fn delete_by_document(&self, document_id: i64) -> VectorResult<()> {
        let response = self
            .client
            .post(format!("{}/delete", self.url))
            .json(&serde_json::json!({
                "collection": self.collection,
                "filter": format!("document_id == {}", document_id),
            }))
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        self.check(response).await?;
        info!(collection = %self.collection, document_id, "vectors deleted");
        Ok(())
    }

    async fn delete_older_than(&self, cutoff_unix: i64) -> VectorResult<usize> {
        let response = self
            .client
            .post(format!("{}/delete", self.url))
            .json(&serde_json::json!({
                "collection": self.collection,
                "filter": format!("timestamp < {}", cutoff_unix),
            }))
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        let response = self.check(response).await?;
        let parsed: DeleteResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok(parsed.deleted)
    }

    async fn count(&self) -> VectorResult<usize> {
        let response = self
            .client
            .get(format!("{}/collections/{}/count", self.url, self.collection))
            .send()
            .await
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        let response = self.check(response).await?;
        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok(parsed.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_cleanly_when_unreachable() {
        let result = RemoteStore::connect(
            "http://127.0.0.1:1",
            "medical_documents",
            1024,
            IndexParams::documents(),
        )
        .await;
        assert!(matches!(result, Err(VectorError::Connection(_))));
    }
}

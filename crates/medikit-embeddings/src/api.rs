//! API-served embeddings over an OpenAI-compatible endpoint.

use crate::{Embedder, EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for the API embedder.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Embeddings endpoint URL.
    pub endpoint: String,
    /// Bearer token.
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Output dimension (the medical index is built at 1024).
    pub dimension: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension: 1024,
            timeout_secs: 30,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Embedder backed by a remote embeddings API.
///
/// # Example
///
/// ```rust,ignore
/// use medikit_embeddings::{ApiConfig, ApiEmbedder, Embedder};
///
/// let embedder = ApiEmbedder::new(ApiConfig::new(endpoint, key, "text-embedding-v2"))?;
/// let vector = embedder.embed("高血压的饮食注意事项").await?;
/// assert_eq!(vector.len(), 1024);
/// ```
pub struct ApiEmbedder {
    config: ApiConfig,
    client: reqwest::Client,
}

impl ApiEmbedder {
    pub fn new(config: ApiConfig) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Api(e.to_string()))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().all(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EmbeddingError::ConnectionFailed(e.to_string())
                } else {
                    EmbeddingError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(EmbeddingError::AuthenticationFailed);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!(
                "embeddings API error {}: {}",
                status, body
            )));
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if resp.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                resp.data.len()
            )));
        }

        Ok(resp.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = ApiConfig::new("https://api.example.com/v1/embeddings", "key", "m")
            .with_dimension(512)
            .with_timeout(10);
        assert_eq!(config.dimension, 512);
        assert_eq!(config.timeout_secs, 10);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let embedder =
            ApiEmbedder::new(ApiConfig::new("http://localhost:1/none", "k", "m")).unwrap();
        let vectors = embedder.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}

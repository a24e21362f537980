//! Runtime configuration with environment overrides.

use serde::{Deserialize, Serialize};

/// Process-wide settings for the consultation engine.
///
/// Defaults are production values; any field can be overridden through the
/// `MEDIKIT_`-prefixed environment variables read by [`Settings::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Stores
    pub vector_index_url: String,
    pub vector_collection: String,
    pub graph_url: String,
    pub graph_user: String,
    pub graph_password: String,

    // Embeddings
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    // LLM
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_default_temperature: f32,
    pub llm_default_max_tokens: u32,

    // Semantic cache
    pub semantic_cache_enabled: bool,
    pub semantic_cache_threshold: f32,
    pub semantic_cache_ttl_days: i64,

    // Retrieval
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub semantic_weight: f32,
    pub kg_weight: f32,
    pub rerank_top_k: usize,
    pub enable_multi_retrieval: bool,
    pub enable_rerank: bool,
    pub enable_ml_rerank: bool,
    pub enable_ranking_optimization: bool,
    pub enable_kg_validation: bool,

    // Chunking
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    // Remote PDF parser
    pub parser_api_url: String,
    pub parser_api_key: String,
    pub parser_output_dir: String,
    pub parser_poll_interval_secs: u64,
    pub parser_max_polls: usize,
    pub enable_table_description: bool,
    pub enable_image_description: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vector_index_url: "http://localhost:19530".to_string(),
            vector_collection: "medical_documents".to_string(),
            graph_url: "http://localhost:7474".to_string(),
            graph_user: "neo4j".to_string(),
            graph_password: "neo4j".to_string(),

            embedding_endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings"
                .to_string(),
            embedding_model: "text-embedding-v2".to_string(),
            embedding_dimension: 1024,

            llm_provider: "qwen".to_string(),
            llm_model: "qwen-turbo".to_string(),
            llm_endpoint: String::new(),
            llm_api_key: String::new(),
            llm_default_temperature: 0.7,
            llm_default_max_tokens: 2000,

            semantic_cache_enabled: true,
            semantic_cache_threshold: 0.95,
            semantic_cache_ttl_days: 7,

            vector_weight: 0.4,
            bm25_weight: 0.3,
            semantic_weight: 0.2,
            kg_weight: 0.1,
            rerank_top_k: 10,
            enable_multi_retrieval: true,
            enable_rerank: true,
            enable_ml_rerank: true,
            enable_ranking_optimization: true,
            enable_kg_validation: true,

            chunk_size: 500,
            chunk_overlap: 50,

            parser_api_url: String::new(),
            parser_api_key: String::new(),
            parser_output_dir: "./data/parsed".to_string(),
            parser_poll_interval_secs: 2,
            parser_max_polls: 150,
            enable_table_description: true,
            enable_image_description: true,
        }
    }
}

impl Settings {
    /// Load settings, applying `MEDIKIT_*` environment overrides on top of
    /// the defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(v) = var("MEDIKIT_VECTOR_INDEX_URL") {
            settings.vector_index_url = v;
        }
        if let Some(v) = var("MEDIKIT_VECTOR_COLLECTION") {
            settings.vector_collection = v;
        }
        if let Some(v) = var("MEDIKIT_GRAPH_URL") {
            settings.graph_url = v;
        }
        if let Some(v) = var("MEDIKIT_GRAPH_USER") {
            settings.graph_user = v;
        }
        if let Some(v) = var("MEDIKIT_GRAPH_PASSWORD") {
            settings.graph_password = v;
        }
        if let Some(v) = var("MEDIKIT_EMBEDDING_ENDPOINT") {
            settings.embedding_endpoint = v;
        }
        if let Some(v) = var("MEDIKIT_EMBEDDING_MODEL") {
            settings.embedding_model = v;
        }
        if let Some(v) = var("MEDIKIT_LLM_PROVIDER") {
            settings.llm_provider = v;
        }
        if let Some(v) = var("MEDIKIT_LLM_MODEL") {
            settings.llm_model = v;
        }
        if let Some(v) = var("MEDIKIT_LLM_ENDPOINT") {
            settings.llm_endpoint = v;
        }
        if let Some(v) = var("MEDIKIT_LLM_API_KEY") {
            settings.llm_api_key = v;
        }
        if let Some(v) = var("MEDIKIT_PARSER_API_URL") {
            settings.parser_api_url = v;
        }
        if let Some(v) = var("MEDIKIT_PARSER_API_KEY") {
            settings.parser_api_key = v;
        }
        if let Some(v) = var("MEDIKIT_PARSER_OUTPUT_DIR") {
            settings.parser_output_dir = v;
        }
        if let Some(v) = var("MEDIKIT_SEMANTIC_CACHE_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                settings.semantic_cache_threshold = parsed;
            }
        }
        if let Some(v) = var("MEDIKIT_SEMANTIC_CACHE_ENABLED") {
            settings.semantic_cache_enabled = v != "false" && v != "0";
        }
        if let Some(v) = var("MEDIKIT_CHUNK_SIZE") {
            if let Ok(parsed) = v.parse() {
                settings.chunk_size = parsed;
            }
        }
        if let Some(v) = var("MEDIKIT_CHUNK_OVERLAP") {
            if let Ok(parsed) = v.parse() {
                settings.chunk_overlap = parsed;
            }
        }

        settings
    }

    /// Retrieval weights in path order (vector, bm25, semantic, kg).
    pub fn retrieval_weights(&self) -> [f32; 4] {
        [
            self.vector_weight,
            self.bm25_weight,
            self.semantic_weight,
            self.kg_weight,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retrieval_contract() {
        let settings = Settings::default();
        assert_eq!(settings.embedding_dimension, 1024);
        assert_eq!(settings.retrieval_weights(), [0.4, 0.3, 0.2, 0.1]);
        assert!((settings.semantic_cache_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.chunk_overlap, 50);
        assert_eq!(settings.parser_max_polls, 150);
    }
}

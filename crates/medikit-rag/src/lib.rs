//! # Medikit RAG
//!
//! The retrieval core of the consultation engine: structure-aware chunking,
//! four retrieval paths (dense vector, lexical BM25, semantic rewrite,
//! knowledge graph) fused with weighted Reciprocal Rank Fusion, and a
//! reranker chain that produces the final evidence ordering handed to the
//! language model.
//!
//! The entry point for query time is [`pipeline::AdvancedRag`]; for
//! ingestion it is [`chunker::StructureAwareChunker`].

pub mod bm25;
pub mod chunker;
pub mod entities;
pub mod fusion;
pub mod ingest;
pub mod kg;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod scoring;
pub mod semantic;
pub mod strategy;

use async_trait::async_trait;
use medikit_core::RetrievalResult;

/// Common capability of every retrieval path.
///
/// Retrievers never fail loudly: an unavailable backing store produces an
/// empty list and a warning log, and the fusion stage carries on with the
/// paths that answered.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retriever name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Retrieve up to `top_k` ranked results for `query`.
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalResult>;
}

pub use bm25::Bm25Index;
pub use chunker::{ChunkerConfig, StructureAwareChunker};
pub use entities::EntityRecognizer;
pub use fusion::{MultiRetrieval, RetrievalFlags};
pub use ingest::DocumentIngestor;
pub use kg::KnowledgeGraphRetriever;
pub use pipeline::AdvancedRag;
pub use retriever::VectorRetriever;
pub use scoring::RelevanceScorer;
pub use semantic::SemanticRetriever;
pub use strategy::StrategySelector;

//! Document ingestion: parsed content → chunks → indexed evidence.
//!
//! Ties the chunker to the stores. Chunks are owned by this pipeline until
//! they have been written to the vector index; the BM25 index is rebuilt
//! from the accumulated corpus under its single-writer discipline.

use crate::bm25::Bm25Index;
use crate::chunker::StructureAwareChunker;
use medikit_core::{Chunk, DocumentContent};
use medikit_embeddings::Embedder;
use medikit_vectors::{VectorRecord, VectorStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Outcome of one document ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: i64,
    pub chunk_count: usize,
    pub indexed_ids: Vec<i64>,
}

/// Chunk, embed, and index one document at a time.
pub struct DocumentIngestor {
    chunker: StructureAwareChunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    bm25: Arc<Bm25Index>,
    /// Accumulated corpus backing BM25 rebuilds.
    corpus: Mutex<Vec<(String, HashMap<String, serde_json::Value>)>>,
}

impl DocumentIngestor {
    pub fn new(
        chunker: StructureAwareChunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            bm25,
            corpus: Mutex::new(Vec::new()),
        }
    }

    fn chunk_metadata(chunk: &Chunk, document_id: i64) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert("document_id".to_string(), json!(document_id));
        metadata.insert("chunk_type".to_string(), json!(chunk.chunk_type));
        metadata.insert("chunk_index".to_string(), json!(chunk.metadata.chunk_index));
        if !chunk.title.is_empty() {
            metadata.insert("title".to_string(), json!(chunk.title));
        }
        if let Some(parent) = &chunk.parent_title {
            metadata.insert("parent_title".to_string(), json!(parent));
        }
        if let Some(page) = chunk.metadata.page {
            metadata.insert("page".to_string(), json!(page));
        }
        if let Some(description) = &chunk.ai_description {
            metadata.insert("ai_description".to_string(), json!(description));
        }
        metadata
    }

    /// Ingest parsed content under a document id and source tag.
    ///
    /// Re-ingesting the same document first drops its previous vectors, so
    /// the operation is repeatable.
    pub async fn ingest(
        &self,
        content: &DocumentContent,
        document_id: i64,
        source: &str,
    ) -> IngestReport {
        let chunks = self.chunker.chunk(content);
        info!(document_id, chunks = chunks.len(), "document chunked");

        if let Err(e) = self.store.delete_by_document(document_id).await {
            warn!(document_id, error = %e, "stale vector cleanup failed");
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(document_id, error = %e, "embedding failed, document not indexed");
                return IngestReport {
                    document_id,
                    chunk_count: chunks.len(),
                    indexed_ids: Vec::new(),
                };
            }
        };

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let metadata = Self::chunk_metadata(chunk, document_id);
                VectorRecord::new(vector, &chunk.text)
                    .with_document(document_id, source)
                    .with_metadata(&json!(metadata))
            })
            .collect();

        let indexed_ids = match self.store.insert(records).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(document_id, error = %e, "vector insert failed");
                Vec::new()
            }
        };

        // Extend the lexical corpus and rebuild BM25 in one writer pass.
        {
            let mut corpus = self.corpus.lock().expect("lock poisoned");
            for chunk in &chunks {
                let mut metadata = Self::chunk_metadata(chunk, document_id);
                metadata.insert("source".to_string(), json!(source));
                corpus.push((chunk.text.clone(), metadata));
            }
            let (documents, metadata): (Vec<String>, Vec<_>) = corpus.iter().cloned().unzip();
            self.bm25.build_index(documents, metadata);
        }

        info!(
            document_id,
            indexed = indexed_ids.len(),
            "document ingested"
        );
        IngestReport {
            document_id,
            chunk_count: chunks.len(),
            indexed_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Retriever;
    use medikit_embeddings::HashedEmbedder;
    use medikit_vectors::InMemoryStore;

    fn ingestor(store: Arc<InMemoryStore>, bm25: Arc<Bm25Index>) -> DocumentIngestor {
        DocumentIngestor::new(
            StructureAwareChunker::default(),
            Arc::new(HashedEmbedder::new(128)),
            store,
            bm25,
        )
    }

    fn content() -> DocumentContent {
        DocumentContent {
            text: "# 高血压\n\n高血压患者应限制钠盐摄入。\n\n## 随访\n\n每周测量血压并记录。".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ingestion_populates_both_indexes() {
        let store = Arc::new(InMemoryStore::new(128));
        let bm25 = Arc::new(Bm25Index::new());
        let ingestor = ingestor(store.clone(), bm25.clone());

        let report = ingestor.ingest(&content(), 7, "指南").await;
        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.indexed_ids.len(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = bm25.retrieve("血压", 5).await;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].document_id, Some(7));
    }

    #[tokio::test]
    async fn reingestion_replaces_previous_vectors() {
        let store = Arc::new(InMemoryStore::new(128));
        let bm25 = Arc::new(Bm25Index::new());
        let ingestor = ingestor(store.clone(), bm25);

        ingestor.ingest(&content(), 7, "指南").await;
        ingestor.ingest(&content(), 7, "指南").await;
        assert_eq!(store.count().await.unwrap(), 2);
    }
}

//! # Medikit PDF
//!
//! PDF parsing behind one [`PdfParser`] contract, with two implementations:
//! a local synchronous page walk ([`local::LocalParser`]) and a remote
//! parse-task client ([`remote::RemoteTaskClient`] driven by
//! [`TaskParser`]) that submits the document, polls, downloads a ZIP
//! bundle, and reads the extracted `model.json` / `content_list.json`.
//!
//! Parsers never propagate faults downstream: any unrecoverable error
//! yields a shape-correct [`ParsedDocument`] with `error` set and empty
//! evidence lists, which retrieval treats as "no evidence".

pub mod describe;
pub mod export;
pub mod extract;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use medikit_core::DocumentContent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PDF-related errors (internal; the public surface returns shape-correct
/// results instead).
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Remote task failed: {0}")]
    TaskFailed(String),

    #[error("Task timed out after {0} polls")]
    TaskTimeout(usize),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for internal PDF operations.
pub type PdfResult<T> = Result<T, PdfError>;

/// Parse-run metadata carried on every result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub doc_id: String,
    pub parser_type: String,
    pub file_path: String,
    pub file_name: String,
    pub table_count: usize,
    pub image_count: usize,
    /// ISO timestamp, filled on export.
    pub parsed_at: Option<String>,
    pub error: bool,
}

/// Output of a parse: content plus bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub content: DocumentContent,
    pub has_images: bool,
    pub total_pages: usize,
    /// Set when parsing failed; the content fields are then empty.
    pub error: Option<String>,
    pub metadata: ParseMetadata,
}

impl ParsedDocument {
    /// Shape-correct failure result.
    pub fn error_result(doc_id: &str, parser_type: &str, file_path: &str, error: String) -> Self {
        Self {
            content: DocumentContent::default(),
            has_images: false,
            total_pages: 0,
            error: Some(error),
            metadata: ParseMetadata {
                doc_id: doc_id.to_string(),
                parser_type: parser_type.to_string(),
                file_path: file_path.to_string(),
                file_name: file_name_of(file_path),
                error: true,
                ..Default::default()
            },
        }
    }
}

/// Derive a document id from a file path (the stem).
pub fn doc_id_of(file_path: &str) -> String {
    std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string()
}

fn file_name_of(file_path: &str) -> String {
    std::path::Path::new(file_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

/// Common contract for PDF parsers.
#[async_trait]
pub trait PdfParser: Send + Sync {
    /// Parser type tag recorded in metadata.
    fn parser_type(&self) -> &'static str;

    /// Parse a document. Never fails; inspect `error` on the result.
    async fn parse(&self, file_path: &str, doc_id: Option<&str>) -> ParsedDocument;
}

pub use describe::DescriptionGenerator;
pub use export::DataExporter;
pub use local::LocalParser;
pub use remote::{RemoteConfig, RemoteTaskClient, TaskParser};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_is_shape_correct() {
        let result = ParsedDocument::error_result("doc1", "remote", "/tmp/doc1.pdf", "boom".into());
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.content.tables.is_empty());
        assert!(result.content.images.is_empty());
        assert!(result.metadata.error);
        assert_eq!(result.metadata.file_name, "doc1.pdf");
    }

    #[test]
    fn doc_id_is_the_file_stem() {
        assert_eq!(doc_id_of("/data/docs/指南2024.pdf"), "指南2024");
        assert_eq!(doc_id_of("plain.pdf"), "plain");
    }
}

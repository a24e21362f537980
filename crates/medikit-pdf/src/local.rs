//! Local synchronous parser: a page walk over the raw PDF.
//!
//! Extracts per-page text with page markers. Table geometry and image
//! assets come from the remote parse task; the local path is the degraded
//! option when no parse service is configured.

use crate::{doc_id_of, ParseMetadata, ParsedDocument, PdfParser};
use async_trait::async_trait;
use medikit_core::DocumentContent;
use tracing::{info, warn};

/// Text-extraction parser over the document's page tree.
pub struct LocalParser;

impl LocalParser {
    pub fn new() -> Self {
        Self
    }

    fn extract(file_path: &str) -> Result<(String, usize), String> {
        let document = lopdf::Document::load(file_path).map_err(|e| e.to_string())?;
        let pages = document.get_pages();
        let total_pages = pages.len();

        let mut text = String::new();
        for page_number in pages.keys() {
            match document.extract_text(&[*page_number]) {
                Ok(page_text) if !page_text.trim().is_empty() => {
                    text.push_str(&format!("[页{}]\n{}\n\n", page_number, page_text.trim()));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(page = page_number, error = %e, "page text extraction failed");
                }
            }
        }
        Ok((text, total_pages))
    }
}

impl Default for LocalParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfParser for LocalParser {
    fn parser_type(&self) -> &'static str {
        "local"
    }

    async fn parse(&self, file_path: &str, doc_id: Option<&str>) -> ParsedDocument {
        let doc_id = doc_id
            .map(|d| d.to_string())
            .unwrap_or_else(|| doc_id_of(file_path));

        match Self::extract(file_path) {
            Ok((text, total_pages)) => {
                info!(doc_id = %doc_id, total_pages, "local parse complete");
                ParsedDocument {
                    content: DocumentContent {
                        text,
                        ..Default::default()
                    },
                    has_images: false,
                    total_pages,
                    error: None,
                    metadata: ParseMetadata {
                        doc_id: doc_id.clone(),
                        parser_type: "local".to_string(),
                        file_path: file_path.to_string(),
                        file_name: std::path::Path::new(file_path)
                            .file_name()
                            .and_then(|s| s.to_str())
                            .unwrap_or("")
                            .to_string(),
                        ..Default::default()
                    },
                }
            }
            Err(e) => {
                warn!(doc_id = %doc_id, error = %e, "local parse failed");
                ParsedDocument::error_result(&doc_id, "local", file_path, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_error_result_not_a_panic() {
        let parser = LocalParser::new();
        let result = parser.parse("/nonexistent/file.pdf", None).await;
        assert!(result.error.is_some());
        assert_eq!(result.metadata.parser_type, "local");
        assert!(result.content.text.is_empty());
    }
}

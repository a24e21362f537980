//! Side-car exports and the per-document parse cache.
//!
//! Each parsed document leaves behind `<doc_id>_pdf_data.csv`,
//! `<doc_id>_tables.csv`, `<doc_id>_images.csv`, `<doc_id>_metadata.json`,
//! and the memoization cache `<doc_id>_parsed.json`.

use crate::{ParsedDocument, PdfResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Exporter rooted at a fixed directory.
pub struct DataExporter {
    export_dir: PathBuf,
}

impl DataExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> PdfResult<Self> {
        let export_dir = export_dir.into();
        std::fs::create_dir_all(&export_dir)?;
        Ok(Self { export_dir })
    }

    fn path(&self, doc_id: &str, suffix: &str) -> PathBuf {
        self.export_dir.join(format!("{}_{}", doc_id, suffix))
    }

    /// Write every side-car for a document.
    pub fn export_all(&self, doc_id: &str, document: &ParsedDocument) -> PdfResult<()> {
        self.export_csv(doc_id, document)?;
        self.export_metadata(doc_id, document)?;
        self.save_to_cache(doc_id, document)?;
        Ok(())
    }

    fn export_csv(&self, doc_id: &str, document: &ParsedDocument) -> PdfResult<()> {
        // Main body.
        let main_path = self.path(doc_id, "pdf_data.csv");
        let mut writer = csv::Writer::from_path(&main_path)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writer
            .write_record(["type", "content", "page", "index"])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writer
            .write_record(["text", document.content.text.as_str(), "", "0"])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        // Tables.
        if !document.content.tables.is_empty() {
            let mut writer = csv::Writer::from_path(self.path(doc_id, "tables.csv"))
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            writer
                .write_record(["page", "index", "title", "html", "description", "bbox"])
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            for table in &document.content.tables {
                writer
                    .write_record([
                        table.page.to_string(),
                        table.index.to_string(),
                        table.title.clone().unwrap_or_default(),
                        table.html.clone(),
                        table.ai_description.clone(),
                        serde_json::to_string(&table.bbox)?,
                    ])
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }

        // Images.
        if !document.content.images.is_empty() {
            let mut writer = csv::Writer::from_path(self.path(doc_id, "images.csv"))
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            writer
                .write_record([
                    "page",
                    "index",
                    "title",
                    "path",
                    "description",
                    "context_before",
                    "context_after",
                    "bbox",
                ])
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            for image in &document.content.images {
                writer
                    .write_record([
                        image.page.to_string(),
                        image.index.to_string(),
                        image.title.clone().unwrap_or_default(),
                        image.path.clone(),
                        image.ai_description.clone(),
                        image.context_before.clone(),
                        image.context_after.clone(),
                        serde_json::to_string(&image.bbox)?,
                    ])
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }

        info!(doc_id, "csv side-cars exported");
        Ok(())
    }

    fn export_metadata(&self, doc_id: &str, document: &ParsedDocument) -> PdfResult<()> {
        let mut metadata = document.metadata.clone();
        metadata.parsed_at = Some(Utc::now().to_rfc3339());
        let path = self.path(doc_id, "metadata.json");
        std::fs::write(&path, serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// Persist the full parse result for memoization.
    pub fn save_to_cache(&self, doc_id: &str, document: &ParsedDocument) -> PdfResult<()> {
        let path = self.path(doc_id, "parsed.json");
        std::fs::write(&path, serde_json::to_string(document)?)?;
        info!(doc_id, path = %path.display(), "parse result cached");
        Ok(())
    }

    /// Load a previously cached parse result, if any.
    pub fn load_from_cache(&self, doc_id: &str) -> Option<ParsedDocument> {
        let path = self.path(doc_id, "parsed.json");
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(document) => Some(document),
                Err(e) => {
                    warn!(doc_id, error = %e, "parse cache unreadable");
                    None
                }
            },
            Err(e) => {
                warn!(doc_id, error = %e, "parse cache unreadable");
                None
            }
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParseMetadata;
    use medikit_core::{DocumentContent, TableElement};

    fn document(doc_id: &str) -> ParsedDocument {
        ParsedDocument {
            content: DocumentContent {
                text: "正文内容".to_string(),
                markdown: "正文内容".to_string(),
                tables: vec![TableElement {
                    title: Some("表1".to_string()),
                    page: 1,
                    index: 0,
                    html: "<table></table>".to_string(),
                    bbox: Some([0.0, 1.0, 2.0, 3.0]),
                    ai_description: "血压分级".to_string(),
                }],
                images: vec![],
            },
            has_images: false,
            total_pages: 3,
            error: None,
            metadata: ParseMetadata {
                doc_id: doc_id.to_string(),
                parser_type: "remote".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn export_writes_all_side_cars() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = DataExporter::new(dir.path()).unwrap();
        exporter.export_all("doc1", &document("doc1")).unwrap();

        assert!(dir.path().join("doc1_pdf_data.csv").exists());
        assert!(dir.path().join("doc1_tables.csv").exists());
        assert!(dir.path().join("doc1_metadata.json").exists());
        assert!(dir.path().join("doc1_parsed.json").exists());
        // No images, no images.csv.
        assert!(!dir.path().join("doc1_images.csv").exists());
    }

    #[test]
    fn cache_round_trips_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = DataExporter::new(dir.path()).unwrap();
        let original = document("doc2");
        exporter.save_to_cache("doc2", &original).unwrap();

        let loaded = exporter.load_from_cache("doc2").unwrap();
        assert_eq!(loaded.total_pages, 3);
        assert_eq!(loaded.content.tables[0].ai_description, "血压分级");
        assert!(exporter.load_from_cache("missing").is_none());
    }
}

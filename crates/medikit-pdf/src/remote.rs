//! Remote parse-task client: submit → poll → download → unzip.

use crate::extract::{self, ParsedArtifacts};
use crate::{doc_id_of, DataExporter, DescriptionGenerator, ParseMetadata, ParsedDocument, PdfError,
    PdfParser, PdfResult};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote parser endpoint configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_url: String,
    pub api_key: String,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_polls: usize,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(api_url: &str, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: String::new(),
            output_dir: output_dir.into(),
            poll_interval: Duration::from_secs(2),
            max_polls: 150,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = api_key.to_string();
        self
    }

    pub fn from_settings(settings: &medikit_core::Settings) -> Self {
        Self {
            api_url: settings.parser_api_url.trim_end_matches('/').to_string(),
            api_key: settings.parser_api_key.clone(),
            output_dir: PathBuf::from(&settings.parser_output_dir),
            poll_interval: Duration::from_secs(settings.parser_poll_interval_secs),
            max_polls: settings.parser_max_polls,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: Option<String>,
    #[allow(dead_code)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    error: Option<String>,
}

/// HTTP client for the parse-task lifecycle.
pub struct RemoteTaskClient {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl RemoteTaskClient {
    pub fn new(config: RemoteConfig) -> PdfResult<Self> {
        std::fs::create_dir_all(&config.output_dir)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PdfError::TaskFailed(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    /// Submit a base64-encoded PDF; returns the task id.
    pub async fn submit(&self, file_path: &str) -> PdfResult<String> {
        let bytes = std::fs::read(file_path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        debug!(chars = encoded.len(), "pdf encoded for submission");

        let response = self
            .auth(self.client.post(format!("{}/parse", self.config.api_url)))
            .json(&serde_json::json!({"file": encoded, "options": {}}))
            .send()
            .await
            .map_err(|e| PdfError::TaskFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PdfError::TaskFailed(format!("{}: {}", status, body)));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PdfError::TaskFailed(e.to_string()))?;
        let task_id = parsed
            .task_id
            .ok_or_else(|| PdfError::TaskFailed("no task id in response".to_string()))?;
        info!(task_id = %task_id, "parse task submitted");
        Ok(task_id)
    }

    /// Poll the task until completion or the poll budget runs out.
    pub async fn poll(&self, task_id: &str) -> PdfResult<()> {
        for poll in 1..=self.config.max_polls {
            let result = self
                .auth(
                    self.client
                        .get(format!("{}/status/{}", self.config.api_url, task_id)),
                )
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let status: StatusResponse = response
                        .json()
                        .await
                        .map_err(|e| PdfError::TaskFailed(e.to_string()))?;
                    debug!(task_id, poll, status = %status.status, "task poll");
                    match status.status.as_str() {
                        "completed" => {
                            info!(task_id, "parse task completed");
                            return Ok(());
                        }
                        "failed" => {
                            return Err(PdfError::TaskFailed(
                                status.error.unwrap_or_else(|| "unknown error".to_string()),
                            ));
                        }
                        // "processing" and anything unrecognized both wait.
                        _ => {}
                    }
                }
                Ok(response) => {
                    warn!(task_id, poll, status = %response.status(), "status poll rejected");
                    if poll == self.config.max_polls {
                        return Err(PdfError::TaskFailed(format!(
                            "status poll rejected with {}",
                            response.status()
                        )));
                    }
                }
                Err(e) => {
                    warn!(task_id, poll, error = %e, "status poll failed");
                    if poll == self.config.max_polls {
                        return Err(PdfError::TaskFailed(e.to_string()));
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(PdfError::TaskTimeout(self.config.max_polls))
    }

    /// Download the result bundle as a ZIP file.
    pub async fn download(&self, task_id: &str) -> PdfResult<PathBuf> {
        let zip_path = self.config.output_dir.join(format!("{}.zip", task_id));
        let failed_marker = self
            .config
            .output_dir
            .join(format!("{}_download_failed.txt", task_id));

        if failed_marker.exists() {
            return Err(PdfError::DownloadFailed(format!(
                "previous download already failed for {}",
                task_id
            )));
        }

        let response = self
            .auth(
                self.client
                    .get(format!("{}/download/{}", self.config.api_url, task_id)),
            )
            .send()
            .await
            .map_err(|e| PdfError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let _ = std::fs::write(&failed_marker, format!("Download failed: {}", status));
            return Err(PdfError::DownloadFailed(format!("status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PdfError::DownloadFailed(e.to_string()))?;
        std::fs::write(&zip_path, &bytes)?;
        info!(task_id, path = %zip_path.display(), "result bundle downloaded");
        Ok(zip_path)
    }

    /// Unzip a result bundle into a deterministic directory keyed by the
    /// document id.
    pub fn extract_zip(&self, zip_path: &Path, doc_id: &str) -> PdfResult<PathBuf> {
        let extract_dir = self.config.output_dir.join(doc_id);
        std::fs::create_dir_all(&extract_dir)?;

        let file = std::fs::File::open(zip_path)?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| PdfError::Archive(e.to_string()))?;
        archive
            .extract(&extract_dir)
            .map_err(|e| PdfError::Archive(e.to_string()))?;

        info!(doc_id, dir = %extract_dir.display(), "bundle extracted");
        Ok(extract_dir)
    }

    /// Full lifecycle: submit, poll to completion, download, unzip.
    pub async fn parse_and_download(&self, file_path: &str, doc_id: &str) -> PdfResult<PathBuf> {
        let task_id = self.submit(file_path).await?;
        self.poll(&task_id).await?;
        let zip_path = self.download(&task_id).await?;
        let extract_dir = self.extract_zip(&zip_path, doc_id)?;
        // Brief pause before the next remote call, for rate limiting.
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(extract_dir)
    }
}

/// Remote parser: drives the task client, reads the extracted artifacts,
/// generates AI descriptions, and exports side-car files.
pub struct TaskParser {
    client: RemoteTaskClient,
    descriptions: Option<DescriptionGenerator>,
    exporter: Option<DataExporter>,
}

impl TaskParser {
    pub fn new(client: RemoteTaskClient) -> Self {
        Self {
            client,
            descriptions: None,
            exporter: None,
        }
    }

    pub fn with_descriptions(mut self, generator: DescriptionGenerator) -> Self {
        self.descriptions = Some(generator);
        self
    }

    pub fn with_exporter(mut self, exporter: DataExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    async fn parse_inner(&self, file_path: &str, doc_id: &str) -> PdfResult<ParsedDocument> {
        // Memoized parses short-circuit the remote round trip.
        if let Some(exporter) = &self.exporter {
            if let Some(cached) = exporter.load_from_cache(doc_id) {
                info!(doc_id, "using cached parse result");
                return Ok(cached);
            }
        }

        let extract_dir = self.client.parse_and_download(file_path, doc_id).await?;
        let ParsedArtifacts {
            text,
            mut tables,
            mut images,
            total_pages,
        } = extract::read_artifacts(&extract_dir, doc_id)?;

        // Descriptions must be in place before chunking reads them.
        if let Some(generator) = &self.descriptions {
            generator.describe_tables(&mut tables).await;
            generator.describe_images(&mut images).await;
        }

        let markdown = extract::render_markdown(&text, &tables, &images);
        let document = ParsedDocument {
            has_images: !images.is_empty(),
            total_pages,
            error: None,
            metadata: ParseMetadata {
                doc_id: doc_id.to_string(),
                parser_type: "remote".to_string(),
                file_path: file_path.to_string(),
                file_name: Path::new(file_path)
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_string(),
                table_count: tables.len(),
                image_count: images.len(),
                parsed_at: None,
                error: false,
            },
            content: medikit_core::DocumentContent {
                text,
                markdown,
                tables,
                images,
            },
        };

        if let Some(exporter) = &self.exporter {
            if let Err(e) = exporter.export_all(doc_id, &document) {
                warn!(doc_id, error = %e, "export failed");
            }
        }

        info!(
            doc_id,
            tables = document.content.tables.len(),
            images = document.content.images.len(),
            "remote parse complete"
        );
        Ok(document)
    }
}

#[async_trait]
impl PdfParser for TaskParser {
    fn parser_type(&self) -> &'static str {
        "remote"
    }

    async fn parse(&self, file_path: &str, doc_id: Option<&str>) -> ParsedDocument {
        let doc_id = doc_id
            .map(|d| d.to_string())
            .unwrap_or_else(|| doc_id_of(file_path));

        match self.parse_inner(file_path, &doc_id).await {
            Ok(document) => document,
            Err(e) => {
                warn!(doc_id = %doc_id, error = %e, "remote parse failed");
                ParsedDocument::error_result(&doc_id, "remote", file_path, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zip_extraction_lands_in_doc_keyed_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = RemoteConfig::new("http://127.0.0.1:1", dir.path());
        let client = RemoteTaskClient::new(config).unwrap();

        // Build a small bundle.
        let zip_path = dir.path().join("task42.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("model.json", options).unwrap();
        writer.write_all(b"[]").unwrap();
        writer.finish().unwrap();

        let extracted = client.extract_zip(&zip_path, "doc42").unwrap();
        assert!(extracted.ends_with("doc42"));
        assert!(extracted.join("model.json").exists());
    }

    #[tokio::test]
    async fn unreachable_endpoint_produces_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let config = RemoteConfig::new("http://127.0.0.1:1", dir.path());
        let parser = TaskParser::new(RemoteTaskClient::new(config).unwrap());

        // The source file does not even exist; submission fails before any
        // network traffic and the error shape comes back intact.
        let result = parser.parse("/nonexistent.pdf", Some("doc1")).await;
        assert!(result.error.is_some());
        assert_eq!(result.metadata.doc_id, "doc1");
        assert!(result.content.tables.is_empty());
    }

    #[test]
    fn failed_download_marker_blocks_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = RemoteConfig::new("http://127.0.0.1:1", dir.path());
        let client = RemoteTaskClient::new(config).unwrap();

        std::fs::write(dir.path().join("t9_download_failed.txt"), "failed").unwrap();
        let result = futures_block(client.download("t9"));
        assert!(matches!(result, Err(PdfError::DownloadFailed(_))));
    }

    fn futures_block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }
}

//! AI descriptions for tables and images.
//!
//! Descriptions are generated sequentially with a short pause between
//! calls to stay under provider rate limits, and they complete before
//! chunking: the chunker reads them straight from the parsed elements.
//! Generation failures leave the description empty rather than failing the
//! parse.

use medikit_core::{ImageElement, TableElement};
use medikit_llm::backend::GenerateOptions;
use medikit_llm::LlmService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pause between consecutive description calls.
const INTER_CALL_DELAY: Duration = Duration::from_millis(500);

/// Sequential description generator over the configured LLM.
pub struct DescriptionGenerator {
    llm: Arc<LlmService>,
    tables_enabled: bool,
    images_enabled: bool,
}

impl DescriptionGenerator {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self {
            llm,
            tables_enabled: true,
            images_enabled: true,
        }
    }

    pub fn tables_enabled(mut self, enabled: bool) -> Self {
        self.tables_enabled = enabled;
        self
    }

    pub fn images_enabled(mut self, enabled: bool) -> Self {
        self.images_enabled = enabled;
        self
    }

    async fn generate(&self, prompt: &str) -> String {
        // The service retries three times with backoff internally.
        match self
            .llm
            .generate(
                prompt,
                None,
                GenerateOptions {
                    temperature: Some(0.3),
                    max_tokens: Some(1000),
                },
            )
            .await
        {
            Ok(description) => description.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "description generation failed, leaving empty");
                String::new()
            }
        }
    }

    /// Fill `ai_description` on every table. Always leaves the field
    /// present, empty when generation is disabled or fails.
    pub async fn describe_tables(&self, tables: &mut [TableElement]) {
        if !self.tables_enabled || tables.is_empty() {
            return;
        }
        info!(count = tables.len(), "generating table descriptions");

        for (i, table) in tables.iter_mut().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_CALL_DELAY).await;
            }
            let title = table.title.as_deref().unwrap_or("表格");
            let prompt = format!(
                "请用一到两句话概括下面这个医疗文档表格的内容，直接返回描述文本。\n\n\
                 表格标题：{}\n表格HTML：\n{}",
                title, table.html
            );
            table.ai_description = self.generate(&prompt).await;
        }
    }

    /// Fill `ai_description` on every image, from its title and surrounding
    /// context.
    pub async fn describe_images(&self, images: &mut [ImageElement]) {
        if !self.images_enabled || images.is_empty() {
            return;
        }
        info!(count = images.len(), "generating image descriptions");

        for (i, image) in images.iter_mut().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_CALL_DELAY).await;
            }
            let title = image.title.as_deref().unwrap_or("图片");
            let prompt = format!(
                "请根据标题和上下文推断这张医疗文档插图的内容，用一句话描述，直接返回描述文本。\n\n\
                 图片标题：{}\n前文：{}\n后文：{}",
                title, image.context_before, image.context_after
            );
            image.ai_description = self.generate(&prompt).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_llm::MockBackend;

    fn generator(pattern: &str, response: &str) -> DescriptionGenerator {
        let backend = Arc::new(MockBackend::new().with_response(pattern, response));
        DescriptionGenerator::new(Arc::new(LlmService::new(backend)))
    }

    fn table(title: &str) -> TableElement {
        TableElement {
            title: Some(title.to_string()),
            html: "<table></table>".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tables_get_descriptions_in_order() {
        let generator = generator("表格标题", "血压分级一览。");
        let mut tables = vec![table("表1"), table("表2")];
        generator.describe_tables(&mut tables).await;

        assert!(tables.iter().all(|t| t.ai_description == "血压分级一览。"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_generation_leaves_empty_descriptions() {
        let generator = generator("任意", "不该出现").tables_enabled(false);
        let mut tables = vec![table("表1")];
        generator.describe_tables(&mut tables).await;
        assert_eq!(tables[0].ai_description, "");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_degrade_to_empty_strings() {
        let backend = Arc::new(MockBackend::new().failing_first(usize::MAX));
        let generator = DescriptionGenerator::new(Arc::new(LlmService::new(backend)));
        let mut images = vec![ImageElement {
            title: Some("心电图".to_string()),
            ..Default::default()
        }];
        generator.describe_images(&mut images).await;
        assert_eq!(images[0].ai_description, "");
    }
}

//! Structure-aware document chunking.
//!
//! Walks a parsed document in position order, grouping paragraphs under
//! their H1/H2 headings, emitting every table and image as its own chunk,
//! and falling back to plain sliding-window chunking when the document has
//! no headings at all.
//!
//! Element placement follows a deterministic fallback chain — exact title
//! match, then a leading title keyword, then the `(page - 1) * 2000`
//! estimate. The estimate can be wrong about which section a table lands
//! in; it is kept as-is so re-ingesting a document reproduces the same
//! chunks.

use medikit_core::{Chunk, ChunkType, DocumentContent, ImageElement, TableElement};
use regex::Regex;
use std::collections::HashSet;

/// Chunk sizing parameters, in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkerConfig {
    pub fn from_settings(settings: &medikit_core::Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }
}

#[derive(Debug, Clone)]
struct Heading {
    level: u8,
    text: String,
    /// Character offset in the source text.
    position: usize,
}

#[derive(Debug, Clone)]
struct TextSection {
    text: String,
    position: usize,
}

enum Element {
    Heading(Heading),
    Text(TextSection),
    Table(TableElement, usize),
    Image(ImageElement, usize),
}

impl Element {
    fn position(&self) -> usize {
        match self {
            Element::Heading(h) => h.position,
            Element::Text(t) => t.position,
            Element::Table(_, p) | Element::Image(_, p) => *p,
        }
    }

    /// Tie-break at equal positions: a heading opens its section before
    /// anything inside it is placed.
    fn rank(&self) -> u8 {
        match self {
            Element::Heading(_) => 0,
            Element::Text(_) => 1,
            Element::Table(..) => 2,
            Element::Image(..) => 3,
        }
    }
}

/// Estimated characters per page, used when neither the element title nor
/// its keywords appear in the text.
const PAGE_CHAR_ESTIMATE: usize = 2000;

/// Structure-aware chunker.
pub struct StructureAwareChunker {
    config: ChunkerConfig,
    h1_md: Regex,
    h2_md: Regex,
    h1_html: Regex,
    h2_html: Regex,
    tag: Regex,
    para_break: Regex,
}

impl StructureAwareChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            h1_md: Regex::new(r"(?m)^#\s+(.+)$").expect("static regex"),
            h2_md: Regex::new(r"(?m)^##\s+(.+)$").expect("static regex"),
            h1_html: Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("static regex"),
            h2_html: Regex::new(r"(?is)<h2[^>]*>(.*?)</h2>").expect("static regex"),
            tag: Regex::new(r"<[^>]+>").expect("static regex"),
            para_break: Regex::new(r"\n\s*\n").expect("static regex"),
        }
    }

    /// Chunk a parsed document into retrievable units, in document order.
    ///
    /// Never fails: malformed HTML simply yields no headings, which routes
    /// through the flat fallback path.
    pub fn chunk(&self, content: &DocumentContent) -> Vec<Chunk> {
        let text = content.body();
        let char_of_byte = byte_to_char_map(text);

        let headings = self.extract_headings(text, &char_of_byte);
        let sections = self.extract_text_sections(text, &char_of_byte);
        let tables = mark_table_positions(text, &content.tables, &char_of_byte);
        let images = mark_image_positions(text, &content.images, &char_of_byte);

        let mut chunks = if headings.is_empty() {
            self.chunk_flat(&sections, tables, images)
        } else {
            self.chunk_structured(headings, sections, tables, images)
        };

        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.metadata.chunk_index = index;
        }
        chunks
    }

    fn extract_headings(&self, text: &str, map: &[usize]) -> Vec<Heading> {
        let mut headings = Vec::new();

        for (regex, level, html) in [
            (&self.h1_md, 1u8, false),
            (&self.h2_md, 2, false),
            (&self.h1_html, 1, true),
            (&self.h2_html, 2, true),
        ] {
            for captures in regex.captures_iter(text) {
                let whole = captures.get(0).expect("group 0");
                let inner = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let heading_text = if html {
                    self.tag.replace_all(inner, "").trim().to_string()
                } else {
                    inner.trim().to_string()
                };
                if heading_text.is_empty() {
                    continue;
                }
                headings.push(Heading {
                    level,
                    text: heading_text,
                    position: char_at(map, whole.start()),
                });
            }
        }

        headings.sort_by_key(|h| h.position);
        headings
    }

    fn extract_text_sections(&self, text: &str, map: &[usize]) -> Vec<TextSection> {
        let mut sections = Vec::new();
        let mut cursor = 0;

        let mut push = |raw: &str, byte_start: usize| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return;
            }
            // Heading lines are handled separately.
            if self.h1_md.is_match(trimmed) || self.h2_md.is_match(trimmed) {
                return;
            }
            let leading = raw.len() - raw.trim_start().len();
            sections.push(TextSection {
                text: trimmed.to_string(),
                position: char_at(map, byte_start + leading),
            });
        };

        for gap in self.para_break.find_iter(text) {
            push(&text[cursor..gap.start()], cursor);
            cursor = gap.end();
        }
        push(&text[cursor..], cursor);

        sections
    }

    /// No headings: tables first, then images, then one sliding-window pass
    /// over all text.
    fn chunk_flat(
        &self,
        sections: &[TextSection],
        tables: Vec<(TableElement, usize)>,
        images: Vec<(ImageElement, usize)>,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (table, position) in tables {
            chunks.push(table_chunk(&table, position, None, None));
        }
        for (image, position) in images {
            chunks.push(image_chunk(&image, position, None, None));
        }

        let body: Vec<&str> = sections.iter().map(|s| s.text.as_str()).collect();
        chunks.extend(self.sliding_window(&body.join("\n\n"), "", 0, None, false));
        chunks
    }

    fn chunk_structured(
        &self,
        headings: Vec<Heading>,
        sections: Vec<TextSection>,
        tables: Vec<(TableElement, usize)>,
        images: Vec<(ImageElement, usize)>,
    ) -> Vec<Chunk> {
        let mut elements: Vec<Element> = Vec::new();
        elements.extend(headings.into_iter().map(Element::Heading));
        elements.extend(sections.iter().cloned().map(Element::Text));
        elements.extend(tables.into_iter().map(|(t, p)| Element::Table(t, p)));
        elements.extend(images.into_iter().map(|(i, p)| Element::Image(i, p)));
        elements.sort_by_key(|e| (e.position(), e.rank()));

        let mut chunks = Vec::new();
        let mut current_h1: Option<String> = None;
        let mut current_h2: Option<String> = None;
        let mut buffer: Vec<String> = Vec::new();
        let mut pending: Vec<Chunk> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::new();

        for element in elements {
            match element {
                Element::Heading(heading) => {
                    self.flush_section(&mut chunks, &current_h1, &current_h2, &mut buffer, &mut pending);
                    if heading.level == 1 {
                        current_h1 = Some(heading.text);
                        current_h2 = None;
                    } else {
                        current_h2 = Some(heading.text);
                    }
                }
                Element::Text(section) => {
                    if visited.contains(&section.position) {
                        continue;
                    }
                    if current_h1.is_some() || current_h2.is_some() {
                        buffer.push(section.text);
                        visited.insert(section.position);
                    }
                }
                Element::Table(table, position) => {
                    let chunk = table_chunk(
                        &table,
                        position,
                        current_h1.as_deref(),
                        current_h2.as_deref(),
                    );
                    if current_h1.is_some() || current_h2.is_some() {
                        pending.push(chunk);
                    } else {
                        chunks.push(chunk);
                    }
                }
                Element::Image(image, position) => {
                    let chunk = image_chunk(
                        &image,
                        position,
                        current_h1.as_deref(),
                        current_h2.as_deref(),
                    );
                    if current_h1.is_some() || current_h2.is_some() {
                        pending.push(chunk);
                    } else {
                        chunks.push(chunk);
                    }
                }
            }
        }
        self.flush_section(&mut chunks, &current_h1, &current_h2, &mut buffer, &mut pending);

        // Paragraphs never claimed by a heading go through one final
        // sliding-window pass, untitled.
        let orphans: Vec<&str> = sections
            .iter()
            .filter(|s| !visited.contains(&s.position))
            .map(|s| s.text.as_str())
            .collect();
        if !orphans.is_empty() {
            chunks.extend(self.sliding_window(&orphans.join("\n\n"), "", 0, None, false));
        }

        chunks
    }

    fn flush_section(
        &self,
        chunks: &mut Vec<Chunk>,
        current_h1: &Option<String>,
        current_h2: &Option<String>,
        buffer: &mut Vec<String>,
        pending: &mut Vec<Chunk>,
    ) {
        if !buffer.is_empty() {
            let (title, level, parent) = match (current_h2, current_h1) {
                (Some(h2), h1) => (format!("## {}", h2), 2u8, h1.clone()),
                (None, Some(h1)) => (format!("# {}", h1), 1, None),
                (None, None) => (String::new(), 0, None),
            };
            let body = buffer.join("\n\n");
            buffer.clear();

            let full_text = if title.is_empty() {
                body.clone()
            } else {
                format!("{}\n\n{}", title, body)
            };

            if char_len(&full_text) > self.config.chunk_size {
                chunks.extend(self.sliding_window(&body, &title, level, parent, true));
            } else {
                let mut chunk = Chunk::text(full_text).with_title(&title, level).with_parent(parent);
                chunk.metadata.has_title = !title.is_empty();
                chunks.push(chunk);
            }
        }
        chunks.append(pending);
    }

    /// Split `text` into overlapping windows of at most `chunk_size`
    /// characters, breaking on paragraph boundaries and carrying
    /// `chunk_overlap` trailing characters into the next window.
    fn sliding_window(
        &self,
        text: &str,
        title: &str,
        level: u8,
        parent: Option<String>,
        has_title: bool,
    ) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        let mut emit = |body: &str, chunks: &mut Vec<Chunk>| {
            let text = if title.is_empty() {
                body.trim().to_string()
            } else {
                format!("{}\n\n{}", title, body.trim())
            };
            let mut chunk = Chunk::text(text)
                .with_title(title, level)
                .with_parent(parent.clone());
            chunk.metadata.has_title = has_title;
            chunks.push(chunk);
        };

        for para in self.para_break.split(text) {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            if !current.is_empty() && char_len(&current) + char_len(para) > self.config.chunk_size {
                emit(&current, &mut chunks);
                let overlap = tail_chars(&current, self.config.chunk_overlap);
                current = if overlap.is_empty() {
                    para.to_string()
                } else {
                    format!("{}\n\n{}", overlap, para)
                };
            } else if current.is_empty() {
                current = para.to_string();
            } else {
                current.push_str("\n\n");
                current.push_str(para);
            }
        }

        if !current.is_empty() {
            emit(&current, &mut chunks);
        }
        chunks
    }
}

impl Default for StructureAwareChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`, on a char boundary.
fn tail_chars(s: &str, n: usize) -> String {
    let total = char_len(s);
    if total <= n {
        return s.to_string();
    }
    s.chars().skip(total - n).collect()
}

/// Byte offset of every char, for byte→char position conversion.
fn byte_to_char_map(text: &str) -> Vec<usize> {
    text.char_indices().map(|(byte, _)| byte).collect()
}

fn char_at(map: &[usize], byte: usize) -> usize {
    map.partition_point(|&b| b < byte)
}

/// Resolve an element's character position: exact title match, then a
/// leading title keyword, then the page estimate.
fn resolve_position(
    text: &str,
    title: Option<&str>,
    page: u32,
    map: &[usize],
) -> usize {
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        if let Some(byte) = text.find(title) {
            return char_at(map, byte);
        }
        for keyword in title.split_whitespace().take(3) {
            if char_len(keyword) > 2 {
                if let Some(byte) = text.find(keyword) {
                    return char_at(map, byte);
                }
            }
        }
    }
    if page > 0 {
        (page as usize - 1) * PAGE_CHAR_ESTIMATE
    } else {
        0
    }
}

fn mark_table_positions(
    text: &str,
    tables: &[TableElement],
    map: &[usize],
) -> Vec<(TableElement, usize)> {
    let mut marked: Vec<(TableElement, usize)> = tables
        .iter()
        .map(|t| {
            let position = resolve_position(text, t.title.as_deref(), t.page, map);
            (t.clone(), position)
        })
        .collect();
    marked.sort_by_key(|(t, p)| (t.page, *p));
    marked
}

fn mark_image_positions(
    text: &str,
    images: &[ImageElement],
    map: &[usize],
) -> Vec<(ImageElement, usize)> {
    let mut marked: Vec<(ImageElement, usize)> = images
        .iter()
        .map(|i| {
            let position = resolve_position(text, i.title.as_deref(), i.page, map);
            (i.clone(), position)
        })
        .collect();
    marked.sort_by_key(|(i, p)| (i.page, *p));
    marked
}

fn heading_prefix(h1: Option<&str>, h2: Option<&str>) -> Vec<String> {
    let mut parts = Vec::new();
    if let Some(h1) = h1 {
        parts.push(format!("# {}", h1));
    }
    if let Some(h2) = h2 {
        parts.push(format!("## {}", h2));
    }
    parts
}

fn table_chunk(table: &TableElement, position: usize, h1: Option<&str>, h2: Option<&str>) -> Chunk {
    let title = table.title.clone().unwrap_or_else(|| "表格".to_string());

    let mut parts = heading_prefix(h1, h2);
    parts.push(format!("### {}", title));
    if !table.ai_description.is_empty() {
        parts.push(format!("*描述：{}*", table.ai_description));
    }
    parts.push(table.html.clone());

    let mut chunk = Chunk::text(parts.join("\n\n"));
    chunk.chunk_type = ChunkType::Table;
    chunk.title = title;
    chunk.parent_title = h2.or(h1).map(|s| s.to_string());
    chunk.table_html = Some(table.html.clone());
    chunk.ai_description = Some(table.ai_description.clone());
    chunk.metadata.page = Some(table.page);
    chunk.metadata.position = Some(position);
    chunk.metadata.bbox = table.bbox;
    chunk
}

fn image_chunk(image: &ImageElement, position: usize, h1: Option<&str>, h2: Option<&str>) -> Chunk {
    let title = image.title.clone().unwrap_or_else(|| "图片".to_string());

    let mut parts = heading_prefix(h1, h2);
    parts.push(format!("### {}", title));
    if !image.context_before.is_empty() {
        parts.push(format!("*前文：{}*", image.context_before));
    }
    parts.push(format!("![{}]({})", title, image.path));
    if !image.ai_description.is_empty() {
        parts.push(format!("*描述：{}*", image.ai_description));
    }
    if !image.context_after.is_empty() {
        parts.push(format!("*后文：{}*", image.context_after));
    }

    let mut chunk = Chunk::text(parts.join("\n\n"));
    chunk.chunk_type = ChunkType::Image;
    chunk.title = title;
    chunk.parent_title = h2.or(h1).map(|s| s.to_string());
    chunk.image_path = Some(image.path.clone());
    chunk.ai_description = Some(image.ai_description.clone());
    chunk.context_before = Some(image.context_before.clone());
    chunk.context_after = Some(image.context_after.clone());
    chunk.metadata.page = Some(image.page);
    chunk.metadata.position = Some(position);
    chunk.metadata.bbox = image.bbox;
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> DocumentContent {
        DocumentContent {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn structured_document_emits_sections_then_elements() {
        // Scenario: two headings, a paragraph under each, one table whose
        // title resolves inside section B.
        let mut doc = content("# A\n\npara1\n\n## B\n\npara2\n");
        doc.tables.push(TableElement {
            title: Some("B".to_string()),
            page: 1,
            index: 0,
            html: "<table><tr><td>x</td></tr></table>".to_string(),
            bbox: None,
            ai_description: String::new(),
        });

        let chunks = StructureAwareChunker::default().chunk(&doc);
        assert_eq!(chunks.len(), 3);

        assert_eq!(chunks[0].chunk_type, ChunkType::Text);
        assert_eq!(chunks[0].title, "# A");
        assert!(chunks[0].text.contains("para1"));
        assert_eq!(chunks[0].parent_title, None);

        assert_eq!(chunks[1].title, "## B");
        assert!(chunks[1].text.contains("para2"));
        assert_eq!(chunks[1].parent_title.as_deref(), Some("A"));

        assert_eq!(chunks[2].chunk_type, ChunkType::Table);
        assert_eq!(chunks[2].parent_title.as_deref(), Some("B"));
        // The description field rides along even when empty.
        assert_eq!(chunks[2].ai_description.as_deref(), Some(""));

        // chunk_index is monotone.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, i);
        }
    }

    #[test]
    fn headingless_document_falls_back_to_flat_chunking() {
        let mut doc = content("第一段内容。\n\n第二段内容。");
        doc.tables.push(TableElement {
            title: None,
            page: 1,
            index: 0,
            html: "<table></table>".to_string(),
            bbox: None,
            ai_description: "一张表".to_string(),
        });

        let chunks = StructureAwareChunker::default().chunk(&doc);
        // Table first, then the text window.
        assert_eq!(chunks[0].chunk_type, ChunkType::Table);
        assert_eq!(chunks[1].chunk_type, ChunkType::Text);
        assert!(!chunks[1].metadata.has_title);
        assert!(chunks[1].text.contains("第一段内容"));
    }

    #[test]
    fn html_headings_are_recognized() {
        let doc = content("<h1 class=\"t\">概述</h1>\n\n正文内容。\n\n<h2>细节</h2>\n\n更多内容。");
        let chunks = StructureAwareChunker::default().chunk(&doc);
        assert_eq!(chunks[0].title, "# 概述");
        assert_eq!(chunks[1].title, "## 细节");
        assert_eq!(chunks[1].parent_title.as_deref(), Some("概述"));
    }

    #[test]
    fn long_sections_split_with_overlap() {
        let config = ChunkerConfig {
            chunk_size: 40,
            chunk_overlap: 10,
        };
        let para1 = "甲".repeat(30);
        let para2 = "乙".repeat(30);
        let doc = content(&format!("# 标题\n\n{}\n\n{}\n", para1, para2));

        let chunks = StructureAwareChunker::new(config).chunk(&doc);
        assert_eq!(chunks.len(), 2);
        // Overlap from the first window leads the second.
        assert!(chunks[1].text.contains(&"甲".repeat(10)));
        assert!(chunks[1].text.contains(&"乙".repeat(30)));
        assert_eq!(chunks[0].title, "# 标题");
        assert_eq!(chunks[1].title, "# 标题");
    }

    #[test]
    fn every_paragraph_lands_in_exactly_one_chunk() {
        let doc = content("# A\n\n第一段\n\n第二段\n\n## B\n\n第三段\n\n尾部游离段落");
        let chunks = StructureAwareChunker::default().chunk(&doc);

        for para in ["第一段", "第二段", "第三段", "尾部游离段落"] {
            let owners = chunks.iter().filter(|c| c.text.contains(para)).count();
            assert_eq!(owners, 1, "paragraph {} owned by {} chunks", para, owners);
        }
    }

    #[test]
    fn reassembling_text_chunks_restores_the_body() {
        let doc = content("# A\n\npara one\n\n## B\n\npara two");
        let chunks = StructureAwareChunker::default().chunk(&doc);

        let bodies: Vec<String> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Text)
            .map(|c| {
                c.text
                    .strip_prefix(&format!("{}\n\n", c.title))
                    .unwrap_or(&c.text)
                    .to_string()
            })
            .collect();
        assert_eq!(bodies.join("\n\n"), "para one\n\npara two");
    }

    #[test]
    fn position_fallback_chain() {
        let text = "引言部分。\n\n血压分级标准表格如下。";
        let map = byte_to_char_map(text);

        // Exact title match.
        let by_title = resolve_position(text, Some("血压分级"), 3, &map);
        assert_eq!(by_title, text.find("血压分级").map(|b| char_at(&map, b)).unwrap());

        // Keyword fallback (first whitespace token of the title).
        let by_keyword = resolve_position(text, Some("血压分级标准表格如下 附录二"), 3, &map);
        assert!(by_keyword < char_len(text));

        // Page estimate when nothing matches.
        assert_eq!(resolve_position(text, Some("不存在的标题"), 3, &map), 2 * 2000);
        assert_eq!(resolve_position(text, None, 0, &map), 0);
    }

    #[test]
    fn image_chunk_carries_contexts_and_description() {
        let mut doc = content("# 检查\n\n说明文字。");
        doc.images.push(ImageElement {
            title: Some("心电图示例".to_string()),
            page: 1,
            index: 0,
            path: "Images/page_1_0.png".to_string(),
            bbox: None,
            context_before: "检查前注意事项".to_string(),
            context_after: "结果判读".to_string(),
            ai_description: "窦性心律".to_string(),
        });

        let chunks = StructureAwareChunker::default().chunk(&doc);
        let image = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Image)
            .expect("image chunk");
        assert!(image.text.contains("*前文：检查前注意事项*"));
        assert!(image.text.contains("![心电图示例](Images/page_1_0.png)"));
        assert!(image.text.contains("*描述：窦性心律*"));
        assert!(image.text.contains("*后文：结果判读*"));
        assert_eq!(image.parent_title.as_deref(), Some("检查"));
    }
}

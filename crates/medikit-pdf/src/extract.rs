//! Reading the remote parser's extracted artifacts.
//!
//! The bundle contains `model.json` (an element list where `category_id`
//! 5 marks tables and 6 marks titles) and `content_list.json` (image
//! entries). Tables are associated with the nearest preceding title on the
//! same page by bbox comparison; images are resolved against a ranked list
//! of conventional filename patterns, with index-order matching as the
//! last resort.

use crate::{PdfError, PdfResult};
use medikit_core::{ImageElement, TableElement};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CATEGORY_TABLE: i64 = 5;
const CATEGORY_TITLE: i64 = 6;

/// What a bundle read yields.
pub struct ParsedArtifacts {
    pub text: String,
    pub tables: Vec<TableElement>,
    pub images: Vec<ImageElement>,
    pub total_pages: usize,
}

/// Try a list of candidate paths and return the first JSON that loads.
fn try_load_json(candidates: &[PathBuf]) -> Option<Value> {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match std::fs::read_to_string(path).map(|raw| serde_json::from_str::<Value>(&raw)) {
            Ok(Ok(value)) => {
                debug!(path = %path.display(), "artifact loaded");
                return Some(value);
            }
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "artifact unreadable"),
            Err(e) => warn!(path = %path.display(), error = %e, "artifact unreadable"),
        }
    }
    None
}

fn artifact_candidates(extract_dir: &Path, doc_id: &str, name: &str) -> Vec<PathBuf> {
    vec![
        extract_dir.join(format!("{}_{}", doc_id, name)),
        extract_dir.join(name),
        extract_dir.join(doc_id).join(name),
        extract_dir.join("output").join(name),
    ]
}

fn elements_of(model: &Value) -> Vec<Value> {
    match model {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("elements")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_else(|| map.values().cloned().collect()),
        _ => Vec::new(),
    }
}

fn bbox_component(value: &Value, key: &str, index: usize) -> Option<f32> {
    match value {
        Value::Object(map) => map.get(key).and_then(|v| v.as_f64()).map(|f| f as f32),
        Value::Array(items) => items.get(index).and_then(|v| v.as_f64()).map(|f| f as f32),
        _ => None,
    }
}

fn bbox_of(element: &Value) -> Option<[f32; 4]> {
    let bbox = element.get("bbox")?;
    Some([
        bbox_component(bbox, "x0", 0)?,
        bbox_component(bbox, "y0", 1)?,
        bbox_component(bbox, "x1", 2)?,
        bbox_component(bbox, "y1", 3)?,
    ])
}

fn page_of(element: &Value) -> u32 {
    element
        .get("page_num")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32
}

/// Extract tables (category 5), associating each with the nearest title
/// (category 6) above it on the same page.
pub fn extract_tables(model: &Value) -> Vec<TableElement> {
    let elements = elements_of(model);

    let titles: Vec<&Value> = elements
        .iter()
        .filter(|e| e.get("category_id").and_then(|v| v.as_i64()) == Some(CATEGORY_TITLE))
        .collect();

    let mut tables = Vec::new();
    for (index, element) in elements
        .iter()
        .filter(|e| e.get("category_id").and_then(|v| v.as_i64()) == Some(CATEGORY_TABLE))
        .enumerate()
    {
        let page = page_of(element);
        let bbox = bbox_of(element);

        // Nearest preceding title: same page, title bottom above table top.
        let mut title = None;
        for candidate in &titles {
            if page_of(candidate) != page {
                continue;
            }
            let title_y1 = candidate
                .get("bbox")
                .and_then(|b| bbox_component(b, "y1", 3))
                .unwrap_or(0.0);
            let table_y0 = bbox.map(|b| b[1]).unwrap_or(f32::INFINITY);
            if title_y1 <= table_y0 {
                if let Some(text) = candidate.get("text").and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        title = Some(text.to_string());
                        break;
                    }
                }
            }
        }

        tables.push(TableElement {
            title,
            page,
            index,
            html: element
                .get("html")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            bbox,
            ai_description: String::new(),
        });
    }

    info!(count = tables.len(), "tables extracted from model.json");
    tables
}

/// Resolve an image file under the bundle, trying the conventional naming
/// patterns before falling back to index order.
fn resolve_image_path(
    extract_dir: &Path,
    declared: &str,
    page: u32,
    index: usize,
) -> Option<String> {
    if !declared.is_empty() {
        let declared_path = Path::new(declared);
        if declared_path.is_absolute() && declared_path.exists() {
            return Some(declared.to_string());
        }
        let joined = extract_dir.join(declared);
        if joined.exists() {
            return Some(joined.to_string_lossy().into_owned());
        }
        // Just the file name under the Images folder.
        if let Some(name) = declared_path.file_name() {
            let named = extract_dir.join("Images").join(name);
            if named.exists() {
                return Some(named.to_string_lossy().into_owned());
            }
        }
    }

    let conventional = [
        extract_dir.join("Images").join(format!("page_{}_{}.png", page, index)),
        extract_dir.join("Images").join(format!("page_{}_{}.jpg", page, index)),
        extract_dir.join("Images").join(format!("{}_{}.png", page, index)),
        extract_dir.join("images").join(format!("page_{}_{}.png", page, index)),
        extract_dir.join("images").join(format!("{}_{}.png", page, index)),
        extract_dir
            .join("output")
            .join("Images")
            .join(format!("page_{}_{}.png", page, index)),
    ];
    for candidate in &conventional {
        if candidate.exists() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }

    // Last resort: the index-th file in the Images folder.
    let images_dir = extract_dir.join("Images");
    if images_dir.exists() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&images_dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        files.sort();
        if let Some(path) = files.get(index) {
            return Some(path.to_string_lossy().into_owned());
        }
    }

    None
}

fn str_of<'a>(entry: &'a Value, keys: &[&str]) -> &'a str {
    for key in keys {
        if let Some(s) = entry.get(*key).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return s;
            }
        }
    }
    ""
}

/// Extract images from `content_list.json`.
pub fn extract_images(content_list: &Value, extract_dir: &Path) -> Vec<ImageElement> {
    let entries = match content_list {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("content_list")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_else(|| map.values().cloned().collect()),
        _ => Vec::new(),
    };

    let mut images = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let entry_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if !entry_type.to_lowercase().contains("image") {
            continue;
        }

        let page = page_of(entry);
        let declared = entry.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let Some(path) = resolve_image_path(extract_dir, declared, page, index) else {
            warn!(index, "image file not found in bundle");
            continue;
        };

        images.push(ImageElement {
            title: {
                let t = str_of(entry, &["title", "caption", "image_title"]);
                (!t.is_empty()).then(|| t.to_string())
            },
            page,
            index,
            path,
            bbox: bbox_of(entry),
            context_before: str_of(entry, &["context_before", "text_before", "before_text"])
                .to_string(),
            context_after: str_of(entry, &["context_after", "text_after", "after_text"])
                .to_string(),
            ai_description: String::new(),
        });
    }

    info!(count = images.len(), "images extracted from content_list.json");
    images
}

/// Assemble body text from the model elements, excluding tables and titles
/// handled separately.
pub fn extract_text(model: &Value) -> String {
    match model {
        Value::Object(map) => map
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        Value::Array(_) => {
            let parts: Vec<String> = elements_of(model)
                .iter()
                .filter(|e| {
                    !matches!(
                        e.get("category_id").and_then(|v| v.as_i64()),
                        Some(CATEGORY_TABLE) | Some(CATEGORY_TITLE)
                    )
                })
                .filter_map(|e| e.get("text").and_then(|v| v.as_str()).map(|s| s.to_string()))
                .filter(|s| !s.is_empty())
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}

fn total_pages_of(model: &Value) -> usize {
    model
        .get("total_pages")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or_else(|| {
            elements_of(model)
                .iter()
                .map(|e| page_of(e) as usize)
                .max()
                .unwrap_or(0)
        })
}

/// Read every artifact of an extracted bundle.
pub fn read_artifacts(extract_dir: &Path, doc_id: &str) -> PdfResult<ParsedArtifacts> {
    let model = try_load_json(&artifact_candidates(extract_dir, doc_id, "model.json"))
        .ok_or_else(|| PdfError::MissingArtifact("model.json".to_string()))?;
    let content_list = try_load_json(&artifact_candidates(extract_dir, doc_id, "content_list.json"));

    let tables = extract_tables(&model);
    let images = content_list
        .as_ref()
        .map(|cl| extract_images(cl, extract_dir))
        .unwrap_or_default();
    let text = extract_text(&model);
    let total_pages = total_pages_of(&model);

    Ok(ParsedArtifacts {
        text,
        tables,
        images,
        total_pages,
    })
}

/// Render the combined markdown, appending each table and image with a
/// machine-readable metadata comment.
pub fn render_markdown(text: &str, tables: &[TableElement], images: &[ImageElement]) -> String {
    let mut parts = vec![text.to_string()];

    enum Item<'a> {
        Table(&'a TableElement),
        Image(&'a ImageElement),
    }
    let mut items: Vec<(u32, usize, Item)> = Vec::new();
    for table in tables {
        items.push((table.page, table.index, Item::Table(table)));
    }
    for image in images {
        items.push((image.page, image.index, Item::Image(image)));
    }
    items.sort_by_key(|(page, index, _)| (*page, *index));

    for (page, index, item) in items {
        match item {
            Item::Table(table) => {
                let title = table.title.as_deref().unwrap_or("表格");
                let meta = serde_json::json!({
                    "type": "table",
                    "page": page,
                    "index": index,
                    "title": title,
                    "description": table.ai_description,
                });
                parts.push(format!("\n<!-- PDF_ELEMENT_METADATA: {} -->\n", meta));
                parts.push(format!("\n## {}\n", title));
                parts.push(table.html.clone());
                if !table.ai_description.is_empty() {
                    parts.push(format!("\n*描述: {}*\n", table.ai_description));
                }
            }
            Item::Image(image) => {
                let title = image.title.as_deref().unwrap_or("图片");
                let meta = serde_json::json!({
                    "type": "image",
                    "page": page,
                    "index": index,
                    "title": title,
                    "description": image.ai_description,
                    "path": image.path,
                });
                parts.push(format!("\n<!-- PDF_ELEMENT_METADATA: {} -->\n", meta));
                parts.push(format!("\n## {}\n", title));
                parts.push(format!("![{}]({})\n", title, image.path));
                if !image.ai_description.is_empty() {
                    parts.push(format!("\n*描述: {}*\n", image.ai_description));
                }
            }
        }
    }

    parts.join("\n")
}

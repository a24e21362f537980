//! In-memory lexical index with BM25 (Okapi) scoring.
//!
//! Tokenization is CJK-aware: ASCII words are kept whole and lowercased,
//! runs of ideographs are expanded into character bigrams so two-character
//! medical terms (血压, 头晕) stay matchable without a segmenter. Tokens on
//! the stopword list and single characters are dropped.

use crate::Retriever;
use async_trait::async_trait;
use medikit_core::{RetrievalMethod, RetrievalResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{info, warn};
use unicode_segmentation::UnicodeSegmentation;

const K1: f32 = 1.5;
const B: f32 = 0.75;

const STOPWORDS: [&str; 29] = [
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也",
    "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "the",
];

/// Tokenize text into BM25 terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let mut tokens = Vec::new();

    // Contiguous single-ideograph words are regrouped into runs so they can
    // be expanded into bigrams.
    let mut cjk_run: Vec<char> = Vec::new();
    let mut run_end = 0usize;

    let mut flush_run = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        if run.len() >= 2 {
            for pair in run.windows(2) {
                tokens.push(pair.iter().collect());
            }
        }
        run.clear();
    };

    for (offset, word) in text.unicode_word_indices() {
        let is_cjk_char =
            word.chars().count() == 1 && word.chars().all(|c| ('\u{4e00}'..='\u{9fff}').contains(&c));

        if is_cjk_char {
            if offset != run_end && !cjk_run.is_empty() {
                flush_run(&mut cjk_run, &mut tokens);
            }
            cjk_run.extend(word.chars());
            run_end = offset + word.len();
        } else {
            flush_run(&mut cjk_run, &mut tokens);
            let lowered = word.to_lowercase();
            if lowered.chars().count() > 1 {
                tokens.push(lowered);
            }
        }
    }
    flush_run(&mut cjk_run, &mut tokens);

    tokens.retain(|t| !stopwords.contains(t.as_str()));
    tokens
}

struct IndexedDoc {
    text: String,
    metadata: HashMap<String, Value>,
    terms: HashMap<String, u32>,
    length: f32,
}

struct IndexState {
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, u32>,
    avg_length: f32,
}

/// BM25 lexical index over ingested chunk texts.
///
/// Read-mostly: queries take a read lock, rebuilds take the write lock
/// (single-writer discipline at ingestion time).
pub struct Bm25Index {
    state: RwLock<Option<IndexState>>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Replace the index contents with the given documents.
    pub fn build_index(&self, documents: Vec<String>, metadata: Vec<HashMap<String, Value>>) {
        let mut docs = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_length = 0f32;

        for (i, text) in documents.into_iter().enumerate() {
            let tokens = tokenize(&text);
            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *terms.entry(token).or_insert(0) += 1;
            }
            for term in terms.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            let length = terms.values().sum::<u32>() as f32;
            total_length += length;
            docs.push(IndexedDoc {
                text,
                metadata: metadata.get(i).cloned().unwrap_or_default(),
                terms,
                length,
            });
        }

        let avg_length = if docs.is_empty() {
            0.0
        } else {
            total_length / docs.len() as f32
        };

        info!(documents = docs.len(), "bm25 index built");
        *self.state.write().expect("lock poisoned") = Some(IndexState {
            docs,
            doc_freq,
            avg_length,
        });
    }

    pub fn is_indexed(&self) -> bool {
        self.state.read().expect("lock poisoned").is_some()
    }

    fn idf(state: &IndexState, term: &str) -> f32 {
        let n = state.docs.len() as f32;
        let df = state.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(state: &IndexState, doc: &IndexedDoc, query_terms: &[String]) -> f32 {
        let mut score = 0.0;
        for term in query_terms {
            let freq = doc.terms.get(term).copied().unwrap_or(0) as f32;
            if freq == 0.0 {
                continue;
            }
            let idf = Self::idf(state, term);
            let denom = freq + K1 * (1.0 - B + B * doc.length / state.avg_length.max(1.0));
            score += idf * freq * (K1 + 1.0) / denom;
        }
        score
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for Bm25Index {
    fn name(&self) -> &'static str {
        "bm25"
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        let guard = self.state.read().expect("lock poisoned");
        let Some(state) = guard.as_ref() else {
            warn!("bm25 index not built, returning empty results");
            return Vec::new();
        };

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = state
            .docs
            .iter()
            .enumerate()
            .map(|(i, doc)| (i, Self::score(state, doc, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let doc = &state.docs[i];
                let source = doc
                    .metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let mut result = RetrievalResult::new(&doc.text, source, RetrievalMethod::Bm25)
                    .with_score(score);
                result.document_id = doc.metadata.get("document_id").and_then(|v| v.as_i64());
                result.metadata = doc.metadata.clone();
                result
            })
            .collect()
    }
}

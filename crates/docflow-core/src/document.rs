//! Shared document types passed between pipeline stages.
//!
//! All of these are serializable because the checkpoint store caches them
//! as JSON between attempts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single page of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
    /// Recognition confidence for this page (0–100). Direct text reads report 100.
    pub confidence: f64,
}

/// Output of the extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Full document text (pages joined by blank lines).
    pub text: String,
    pub pages: Vec<Page>,
    /// Extractor-specific metadata (engine used, structured fields, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ExtractionResult {
    /// Build a result from pages, joining their text.
    pub fn from_pages(pages: Vec<Page>, metadata: serde_json::Value) -> Self {
        let text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            text,
            pages,
            metadata,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Mean page confidence, 100 for an empty document.
    pub fn mean_confidence(&self) -> f64 {
        if self.pages.is_empty() {
            return 100.0;
        }
        self.pages.iter().map(|p| p.confidence).sum::<f64>() / self.pages.len() as f64
    }
}

/// Page and section location of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
}

/// A bounded slice of document text, the unit of embedding and storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub token_count: usize,
    /// 0-based, contiguous, unique within a source.
    pub chunk_index: usize,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(text: String, chunk_index: usize, metadata: ChunkMetadata) -> Self {
        let token_count = estimate_tokens(&text);
        let content_hash = content_hash(&text);
        Self {
            text,
            token_count,
            chunk_index,
            content_hash,
            metadata,
        }
    }
}

/// Rough token estimate (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Compute SHA-256 content hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pages_joins_text() {
        let pages = vec![
            Page {
                page_number: 1,
                text: "first".into(),
                confidence: 90.0,
            },
            Page {
                page_number: 2,
                text: "second".into(),
                confidence: 70.0,
            },
        ];
        let result = ExtractionResult::from_pages(pages, serde_json::Value::Null);
        assert_eq!(result.text, "first\n\nsecond");
        assert_eq!(result.page_count(), 2);
        assert!((result.mean_confidence() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_chunk_hash_is_stable() {
        let a = Chunk::new("same text".into(), 0, ChunkMetadata::default());
        let b = Chunk::new("same text".into(), 7, ChunkMetadata::default());
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
        assert_eq!(a.token_count, 3);
    }
}

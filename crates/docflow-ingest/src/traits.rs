//! Collaborator contracts consumed by the pipeline controller.

use std::path::Path;

use async_trait::async_trait;
use docflow_core::{Chunk, ExtractionResult, Result};
use docflow_vision::EngineChoice;
use serde::{Deserialize, Serialize};

use crate::doctype::DocumentType;
use crate::progress::ProgressEvent;

/// Per-document extraction options, taken from the job payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOptions {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    /// The file came from a multi-page scanner; enables secondary orientation detection.
    #[serde(default)]
    pub multi_page_scan: bool,
    /// Bypass routing and use one recognition engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_engine: Option<EngineChoice>,
    /// Skip structured field extraction.
    #[serde(default)]
    pub skip_fields: bool,
}

/// Turns a stored file into text.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    async fn extract_from_path(
        &self,
        path: &Path,
        options: &ExtractionOptions,
    ) -> Result<ExtractionResult>;
}

/// Counters reported by a chunker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStats {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub avg_tokens: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkingOutput {
    pub chunks: Vec<Chunk>,
    pub stats: ChunkingStats,
}

/// Splits an extraction result into chunks. Must be deterministic.
pub trait ChunkingProvider: Send + Sync {
    fn chunk_document(
        &self,
        extraction: &ExtractionResult,
        hint: DocumentType,
    ) -> Result<ChunkingOutput>;
}

/// Batch embedding generation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One entry per input text, index-aligned. `None` marks a text with no embedding.
    async fn generate_batch(
        &self,
        texts: &[String],
        organization_id: &str,
    ) -> Result<Vec<Option<Vec<f32>>>>;

    fn dimension(&self) -> usize;
}

/// Best-effort progress notification. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn push(&self, event: ProgressEvent);
}

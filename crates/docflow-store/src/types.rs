//! Data types for sources, stored chunks, and processing checkpoints.

use chrono::{DateTime, Utc};
use docflow_core::{Chunk, ExtractionResult};
use serde::{Deserialize, Serialize};

/// Lifecycle of an uploaded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub organization_id: String,
    pub owner_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub status: SourceStatus,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for registering a new source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub id: String,
    pub organization_id: String,
    pub owner_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// Optional fields written alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub chunk_count: Option<usize>,
    pub processing_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn completed(chunk_count: usize, processing_time_ms: u64) -> Self {
        Self {
            chunk_count: Some(chunk_count),
            processing_time_ms: Some(processing_time_ms),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A chunk ready to be written to the vector store. An empty embedding is stored as NULL.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub source_id: String,
    pub organization_id: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk row read back from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: i64,
    pub source_id: String,
    pub organization_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
    pub has_embedding: bool,
    pub created_at: i64,
}

/// Pipeline stage recorded in a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStage {
    Extraction,
    Chunking,
    Embedding,
    Storage,
}

impl CheckpointStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storage => "storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extraction" => Some(Self::Extraction),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "storage" => Some(Self::Storage),
            _ => None,
        }
    }
}

/// Embedding produced for one chunk by a completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
}

/// Resumable progress marker for a source. At most one per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingCheckpoint {
    pub source_id: String,
    pub stage: CheckpointStage,
    /// Chunks `[0, last_completed_chunk_index)` have been through embedding.
    pub last_completed_chunk_index: usize,
    pub total_chunks: usize,
    pub extraction: Option<ExtractionResult>,
    pub chunks: Option<Vec<Chunk>>,
    /// Non-null embeddings from completed batches.
    #[serde(default)]
    pub embeddings: Vec<EmbeddedChunk>,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ProcessingCheckpoint {
    pub fn new(source_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            stage: CheckpointStage::Extraction,
            last_completed_chunk_index: 0,
            total_chunks: 0,
            extraction: None,
            chunks: None,
            embeddings: Vec::new(),
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Move the embedding cursor forward past one batch.
    ///
    /// The cursor never moves backwards and never passes `total_chunks`.
    pub fn advance(&mut self, batch_len: usize) {
        let next = self
            .last_completed_chunk_index
            .saturating_add(batch_len)
            .min(self.total_chunks);
        self.last_completed_chunk_index = self.last_completed_chunk_index.max(next);
        self.touch();
    }

    /// Enter a later stage. Earlier stages are ignored.
    pub fn enter(&mut self, stage: CheckpointStage) {
        if stage > self.stage {
            self.stage = stage;
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    pub fn embedding_complete(&self) -> bool {
        self.chunks.is_some() && self.last_completed_chunk_index >= self.total_chunks
    }
}

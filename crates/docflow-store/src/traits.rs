//! Persistence contracts consumed by the ingestion pipeline.

use async_trait::async_trait;
use docflow_core::Result;

use crate::types::{
    ChunkRecord, EmbeddedChunk, ProcessingCheckpoint, SourceStatus, StatusUpdate, StoredChunk,
};

/// Resumable progress store keyed by source id (upsert semantics).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self, source_id: &str) -> Result<Option<ProcessingCheckpoint>>;

    /// Insert or replace the single checkpoint row for `checkpoint.source_id`.
    async fn save_checkpoint(&self, checkpoint: &ProcessingCheckpoint) -> Result<()>;

    /// Record one finished embedding batch: the cursor fields of `checkpoint`
    /// and the embeddings the batch produced. `checkpoint.embeddings` already
    /// contains `batch`. Stores without an incremental path rewrite the whole
    /// checkpoint.
    async fn append_batch(
        &self,
        checkpoint: &ProcessingCheckpoint,
        batch: &[EmbeddedChunk],
    ) -> Result<()> {
        let _ = batch;
        self.save_checkpoint(checkpoint).await
    }

    async fn delete_checkpoint(&self, source_id: &str) -> Result<bool>;
}

/// Source lifecycle transitions.
#[async_trait]
pub trait SourceStatusStore: Send + Sync {
    async fn update_status(
        &self,
        source_id: &str,
        status: SourceStatus,
        extra: StatusUpdate,
    ) -> Result<()>;
}

/// Chunk and embedding storage.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether a chunk with this content hash already exists for the source and organization.
    async fn check_duplicate(
        &self,
        content_hash: &str,
        source_id: &str,
        organization_id: &str,
    ) -> Result<bool>;

    /// Insert a chunk with its embedding. Returns the new chunk id.
    async fn insert_chunk(&self, record: &ChunkRecord) -> Result<i64>;

    /// Delete a chunk scoped to an organization. Returns whether a row was removed.
    async fn delete_chunk(&self, chunk_id: i64, organization_id: &str) -> Result<bool>;

    /// Chunks of a source, optionally restricted to `chunk_ids`, ordered by index.
    async fn get_chunks(
        &self,
        source_id: &str,
        organization_id: &str,
        chunk_ids: Option<&[i64]>,
    ) -> Result<Vec<StoredChunk>>;

    /// Replace the embedding of an existing chunk.
    async fn update_embedding(
        &self,
        chunk_id: i64,
        organization_id: &str,
        embedding: &[f32],
    ) -> Result<bool>;
}

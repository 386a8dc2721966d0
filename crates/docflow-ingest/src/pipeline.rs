//! Checkpointed ingestion pipeline: extract → chunk → embed → store.
//!
//! A `processDocument` attempt loads the source's checkpoint, reuses whatever
//! earlier attempts cached (extraction result, chunk list, embeddings of
//! completed batches), and persists progress after every stage transition and
//! every embedding batch. On failure the checkpoint stays in place so the next
//! attempt resumes at the last batch boundary.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use docflow_core::{
    Chunk, ChunkMetadata, Error, MemoryManager, PipelineConfig, Result,
};
use docflow_store::{
    CheckpointStage, CheckpointStore, ChunkRecord, EmbeddedChunk, ProcessingCheckpoint,
    SourceStatus, SourceStatusStore, StatusUpdate, StoredChunk, VectorStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::doctype::DocumentType;
use crate::lease::SourceLeases;
use crate::progress::{NullProgressSink, ProgressEvent, ProgressStage};
use crate::traits::{
    ChunkingProvider, EmbeddingProvider, ExtractionOptions, ExtractionProvider, ProgressSink,
};

/// Payload of a `processDocument` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocumentRequest {
    pub source_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub file_path: PathBuf,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub options: ExtractionOptions,
}

/// Payload of a `generateEmbeddings` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEmbeddingsRequest {
    pub source_id: String,
    pub organization_id: String,
    pub user_id: String,
    /// Restrict to these chunks; all chunks of the source otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Re-embed chunks that already have a vector.
    #[serde(default)]
    pub force: bool,
}

/// Payload of a `reprocessChunks` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessChunksRequest {
    pub source_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub chunk_ids: Vec<i64>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_config: Option<serde_json::Value>,
}

/// Counters reported for a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub pages_processed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub chunks_stored: usize,
    pub duplicates_skipped: usize,
}

/// Sequences the ingestion stages over injected collaborators.
pub struct PipelineController {
    config: PipelineConfig,
    extractor: Arc<dyn ExtractionProvider>,
    chunker: Arc<dyn ChunkingProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    statuses: Arc<dyn SourceStatusStore>,
    memory: Arc<dyn MemoryManager>,
    progress: Arc<dyn ProgressSink>,
    leases: SourceLeases,
}

impl PipelineController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn ExtractionProvider>,
        chunker: Arc<dyn ChunkingProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        statuses: Arc<dyn SourceStatusStore>,
        memory: Arc<dyn MemoryManager>,
    ) -> Self {
        Self {
            config,
            extractor,
            chunker,
            embedder,
            vectors,
            checkpoints,
            statuses,
            memory,
            progress: Arc::new(NullProgressSink),
            leases: SourceLeases::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Share a lease table with other controllers in the process.
    pub fn with_leases(mut self, leases: SourceLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn leases(&self) -> &SourceLeases {
        &self.leases
    }

    // ---------------------------------------------------------------
    // processDocument
    // ---------------------------------------------------------------

    /// Run (or resume) the full pipeline for one source.
    ///
    /// On error the source is marked `error`, the checkpoint is kept, and the
    /// error is returned for the queue to retry.
    pub async fn process_document(&self, req: &ProcessDocumentRequest) -> Result<ProcessingStats> {
        let started = Instant::now();
        let _lease = self.leases.acquire(&req.source_id)?;

        info!(source_id = %req.source_id, filename = %req.filename, "Processing document");
        self.set_status(&req.source_id, SourceStatus::Processing, StatusUpdate::default())
            .await;

        match self.run_stages(req).await {
            Ok(stats) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.set_status(
                    &req.source_id,
                    SourceStatus::Completed,
                    StatusUpdate::completed(stats.chunks_stored, elapsed),
                )
                .await;
                if let Err(e) = self.checkpoints.delete_checkpoint(&req.source_id).await {
                    warn!(source_id = %req.source_id, "Failed to delete checkpoint: {}", e);
                }
                self.notify(
                    ProgressEvent::new(&req.source_id, ProgressStage::Complete, 100, "Complete")
                        .with_details(serde_json::to_value(&stats).unwrap_or_default()),
                );
                info!(
                    source_id = %req.source_id,
                    chunks = stats.chunks_created,
                    stored = stats.chunks_stored,
                    duplicates = stats.duplicates_skipped,
                    elapsed_ms = elapsed,
                    "Document processed"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(source_id = %req.source_id, "Document processing failed: {}", e);
                self.set_status(
                    &req.source_id,
                    SourceStatus::Error,
                    StatusUpdate::failed(e.to_string()),
                )
                .await;
                self.notify(ProgressEvent::new(
                    &req.source_id,
                    ProgressStage::Failed,
                    0,
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }

    async fn run_stages(&self, req: &ProcessDocumentRequest) -> Result<ProcessingStats> {
        let source_id = req.source_id.as_str();
        let mut checkpoint = self.load_checkpoint(source_id).await;
        let mut stats = ProcessingStats::default();

        // Extraction
        if checkpoint.extraction.is_none() {
            self.notify(ProgressEvent::new(source_id, ProgressStage::Extraction, 5, "Extracting text"));
            let mut options = req.options.clone();
            if options.filename.is_empty() {
                options.filename = req.filename.clone();
            }
            if options.mime_type.is_empty() {
                options.mime_type = req.mime_type.clone();
            }
            let extraction = self
                .extractor
                .extract_from_path(&req.file_path, &options)
                .await?;
            checkpoint.extraction = Some(extraction);
            checkpoint.enter(CheckpointStage::Extraction);
            self.save_checkpoint(&checkpoint).await;
        } else {
            debug!(source_id, "Reusing cached extraction");
        }
        let extraction = checkpoint
            .extraction
            .as_ref()
            .ok_or_else(|| Error::Internal("extraction missing after extraction stage".into()))?;
        stats.pages_processed = extraction.page_count();

        // Chunking
        if checkpoint.chunks.is_none() {
            self.notify(ProgressEvent::new(source_id, ProgressStage::Chunking, 20, "Chunking text"));
            let hint = DocumentType::detect(&req.filename, &req.mime_type);
            let output = self.chunker.chunk_document(extraction, hint)?;
            checkpoint.total_chunks = output.chunks.len();
            checkpoint.last_completed_chunk_index = 0;
            checkpoint.embeddings.clear();
            checkpoint.chunks = Some(output.chunks);
            checkpoint.enter(CheckpointStage::Chunking);
            self.save_checkpoint(&checkpoint).await;
        } else {
            debug!(source_id, "Reusing cached chunks");
        }
        let chunks = checkpoint.chunks.clone().unwrap_or_default();
        stats.chunks_created = chunks.len();

        // Embedding
        self.embed_stage(&mut checkpoint, &chunks, &req.organization_id)
            .await?;
        stats.embeddings_generated = checkpoint.embeddings.len();

        // Storage
        checkpoint.enter(CheckpointStage::Storage);
        self.save_checkpoint(&checkpoint).await;
        let (stored, duplicates) = self
            .store_stage(&checkpoint, &chunks, &req.organization_id)
            .await?;
        stats.chunks_stored = stored;
        stats.duplicates_skipped = duplicates;

        Ok(stats)
    }

    async fn embed_stage(
        &self,
        checkpoint: &mut ProcessingCheckpoint,
        chunks: &[Chunk],
        organization_id: &str,
    ) -> Result<()> {
        let total = chunks.len();
        let batch_size = self.config.embedding_batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        checkpoint.total_chunks = total;
        checkpoint.enter(CheckpointStage::Embedding);

        let mut start = checkpoint.last_completed_chunk_index.min(total);
        if start > 0 {
            info!(
                source_id = %checkpoint.source_id,
                resume_at = start,
                total,
                "Resuming embedding"
            );
        }

        let mut appends_ok = true;
        while start < total {
            let end = (start + batch_size).min(total);
            self.memory.check_memory()?;

            let texts: Vec<String> = chunks[start..end].iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.generate_batch(&texts, organization_id).await?;
            ensure_batch_len(texts.len(), embeddings.len())?;

            // Chunks at or past the cursor have no cached embedding yet.
            let batch: Vec<EmbeddedChunk> = chunks[start..end]
                .iter()
                .zip(embeddings)
                .filter_map(|(chunk, embedding)| {
                    embedding.map(|embedding| EmbeddedChunk {
                        chunk_index: chunk.chunk_index,
                        embedding,
                    })
                })
                .collect();
            let produced = batch.len();
            checkpoint.embeddings.extend(batch.iter().cloned());

            checkpoint.advance(end - start);
            // After a failed write the stored rows are behind; rewrite them all.
            let written = if appends_ok {
                self.checkpoints.append_batch(checkpoint, &batch).await
            } else {
                self.checkpoints.save_checkpoint(checkpoint).await
            };
            appends_ok = match written {
                Ok(()) => true,
                Err(e) => {
                    warn!(source_id = %checkpoint.source_id, "Checkpoint write failed: {}", e);
                    false
                }
            };

            let batch_no = end.div_ceil(batch_size);
            debug!(
                source_id = %checkpoint.source_id,
                batch = batch_no,
                batches,
                produced,
                "Embedding batch complete"
            );
            self.notify(ProgressEvent::new(
                &checkpoint.source_id,
                ProgressStage::Embedding,
                (30 + 50 * end / total.max(1)) as u8,
                format!("Embedded batch {}/{}", batch_no, batches),
            ));

            start = checkpoint.last_completed_chunk_index;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn store_stage(
        &self,
        checkpoint: &ProcessingCheckpoint,
        chunks: &[Chunk],
        organization_id: &str,
    ) -> Result<(usize, usize)> {
        let source_id = checkpoint.source_id.as_str();
        let by_index: HashMap<usize, &Chunk> = chunks.iter().map(|c| (c.chunk_index, c)).collect();
        let total = checkpoint.embeddings.len();
        let mut stored = 0;
        let mut duplicates = 0;

        for batch in checkpoint
            .embeddings
            .chunks(self.config.storage_batch_size.max(1))
        {
            for embedded in batch {
                let Some(chunk) = by_index.get(&embedded.chunk_index) else {
                    warn!(source_id, index = embedded.chunk_index, "Embedding has no chunk");
                    continue;
                };
                if self
                    .vectors
                    .check_duplicate(&chunk.content_hash, source_id, organization_id)
                    .await?
                {
                    duplicates += 1;
                    continue;
                }
                let record = ChunkRecord {
                    source_id: source_id.to_string(),
                    organization_id: organization_id.to_string(),
                    chunk: (*chunk).clone(),
                    embedding: embedded.embedding.clone(),
                };
                self.vectors.insert_chunk(&record).await.map_err(as_storage)?;
                stored += 1;
            }

            let done = stored + duplicates;
            self.notify(ProgressEvent::new(
                source_id,
                ProgressStage::Storage,
                (80 + 20 * done / total.max(1)) as u8,
                format!("Stored {}/{} chunks", done, total),
            ));
            tokio::task::yield_now().await;
        }
        Ok((stored, duplicates))
    }

    // ---------------------------------------------------------------
    // generateEmbeddings / reprocessChunks
    // ---------------------------------------------------------------

    /// Embed already-stored chunks that lack a vector (or all of them with `force`).
    pub async fn generate_embeddings(
        &self,
        req: &GenerateEmbeddingsRequest,
    ) -> Result<ProcessingStats> {
        let _lease = self.leases.acquire(&req.source_id)?;
        let targets: Vec<StoredChunk> = self
            .vectors
            .get_chunks(&req.source_id, &req.organization_id, req.chunk_ids.as_deref())
            .await?
            .into_iter()
            .filter(|c| req.force || !c.has_embedding)
            .collect();
        info!(source_id = %req.source_id, chunks = targets.len(), "Generating embeddings");

        let batch_size = req
            .batch_size
            .unwrap_or(self.config.embedding_batch_size)
            .max(1);
        let mut stats = ProcessingStats {
            chunks_created: targets.len(),
            ..Default::default()
        };

        for batch in targets.chunks(batch_size) {
            self.memory.check_memory()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .embedder
                .generate_batch(&texts, &req.organization_id)
                .await?;
            ensure_batch_len(texts.len(), embeddings.len())?;
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                let Some(embedding) = embedding else { continue };
                if self
                    .vectors
                    .update_embedding(chunk.id, &req.organization_id, &embedding)
                    .await
                    .map_err(as_storage)?
                {
                    stats.embeddings_generated += 1;
                    stats.chunks_stored += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(stats)
    }

    /// Store the given chunks again with fresh embeddings.
    ///
    /// Each replacement row is inserted before its old row is deleted, so a
    /// failed attempt never loses a chunk. A retry with the same ids finds
    /// only the rows that were not yet replaced.
    pub async fn reprocess_chunks(&self, req: &ReprocessChunksRequest) -> Result<ProcessingStats> {
        let _lease = self.leases.acquire(&req.source_id)?;
        let existing = self
            .vectors
            .get_chunks(&req.source_id, &req.organization_id, None)
            .await?;
        let wanted: HashSet<i64> = req.chunk_ids.iter().copied().collect();
        let mut hashes: HashMap<String, Vec<i64>> = HashMap::new();
        for chunk in &existing {
            hashes
                .entry(chunk.content_hash.clone())
                .or_default()
                .push(chunk.id);
        }
        let targets: Vec<StoredChunk> = existing
            .into_iter()
            .filter(|c| wanted.contains(&c.id))
            .collect();
        if targets.len() < req.chunk_ids.len() {
            warn!(
                source_id = %req.source_id,
                requested = req.chunk_ids.len(),
                found = targets.len(),
                "Some chunks to reprocess were not found"
            );
        }
        info!(source_id = %req.source_id, chunks = targets.len(), reason = %req.reason, "Reprocessing chunks");

        let mut stats = ProcessingStats {
            chunks_created: targets.len(),
            ..Default::default()
        };
        for batch in targets.chunks(self.config.embedding_batch_size.max(1)) {
            self.memory.check_memory()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .embedder
                .generate_batch(&texts, &req.organization_id)
                .await?;
            ensure_batch_len(texts.len(), embeddings.len())?;

            for (stored, embedding) in batch.iter().zip(embeddings) {
                let chunk = Chunk::new(
                    stored.text.clone(),
                    stored.chunk_index,
                    ChunkMetadata {
                        page_number: stored.page_number,
                        section: stored.section.clone(),
                        char_start: stored.char_start,
                        char_end: stored.char_end,
                    },
                );
                // Another row with the same content makes this one redundant.
                let duplicate = hashes
                    .get(&chunk.content_hash)
                    .is_some_and(|ids| ids.iter().any(|id| *id != stored.id));
                if duplicate {
                    stats.duplicates_skipped += 1;
                } else {
                    if embedding.is_some() {
                        stats.embeddings_generated += 1;
                    }
                    let record = ChunkRecord {
                        source_id: req.source_id.clone(),
                        organization_id: req.organization_id.clone(),
                        chunk,
                        embedding: embedding.unwrap_or_default(),
                    };
                    let new_id = self.vectors.insert_chunk(&record).await.map_err(as_storage)?;
                    hashes
                        .entry(record.chunk.content_hash.clone())
                        .or_default()
                        .push(new_id);
                    stats.chunks_stored += 1;
                }

                self.vectors
                    .delete_chunk(stored.id, &req.organization_id)
                    .await
                    .map_err(as_storage)?;
                if let Some(ids) = hashes.get_mut(&stored.content_hash) {
                    ids.retain(|id| *id != stored.id);
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(stats)
    }

    // ---------------------------------------------------------------
    // Best-effort persistence and notification
    // ---------------------------------------------------------------

    async fn load_checkpoint(&self, source_id: &str) -> ProcessingCheckpoint {
        match self.checkpoints.get_checkpoint(source_id).await {
            Ok(Some(cp)) => {
                info!(
                    source_id,
                    stage = cp.stage.as_str(),
                    completed = cp.last_completed_chunk_index,
                    total = cp.total_chunks,
                    "Resuming from checkpoint"
                );
                cp
            }
            Ok(None) => ProcessingCheckpoint::new(source_id),
            Err(e) => {
                warn!(source_id, "Checkpoint read failed, starting fresh: {}", e);
                ProcessingCheckpoint::new(source_id)
            }
        }
    }

    async fn save_checkpoint(&self, checkpoint: &ProcessingCheckpoint) {
        if let Err(e) = self.checkpoints.save_checkpoint(checkpoint).await {
            warn!(source_id = %checkpoint.source_id, "Checkpoint write failed: {}", e);
        }
    }

    async fn set_status(&self, source_id: &str, status: SourceStatus, extra: StatusUpdate) {
        if let Err(e) = self.statuses.update_status(source_id, status, extra).await {
            warn!(source_id, status = %status, "Status update failed: {}", e);
        }
    }

    fn notify(&self, event: ProgressEvent) {
        self.progress.push(event);
    }
}

fn as_storage(e: Error) -> Error {
    match e {
        Error::Storage(_) => e,
        other => Error::Storage(other.to_string()),
    }
}

/// Embeddings are index-aligned with their texts; anything else is a provider bug.
fn ensure_batch_len(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::Embedding(format!(
            "embedder returned {} vectors for {} texts",
            got, expected
        )))
    }
}

//! Docflow Ingest — the checkpointed extract → chunk → embed → store pipeline.
//!
//! [`PipelineController`] owns the stage sequencing and checkpointing. Every
//! capability it consumes is a trait so that callers (and tests) can swap the
//! default collaborators defined here:
//!
//! - [`FileExtractor`]: reads text formats directly, routes images and
//!   scanned PDF pages through orientation correction and the recognition
//!   router.
//! - [`ParagraphChunker`]: recursive separator chunking per page.
//! - [`HttpEmbedder`] / [`NoopEmbedder`]: embedding generation.

pub mod chunking;
pub mod doctype;
pub mod embed;
pub mod file;
pub mod lease;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod traits;

pub use chunking::{ParagraphChunker, RecursiveChunker};
pub use doctype::DocumentType;
pub use embed::{create_embedder, HttpEmbedder, NoopEmbedder};
pub use file::{FileExtractor, FileType};
pub use lease::{SourceLease, SourceLeases};
pub use pipeline::{
    GenerateEmbeddingsRequest, PipelineController, ProcessDocumentRequest, ProcessingStats,
    ReprocessChunksRequest,
};
pub use progress::{
    ChannelProgressSink, NullProgressSink, ProgressEvent, ProgressStage, TracingProgressSink,
};
pub use traits::{
    ChunkingOutput, ChunkingProvider, ChunkingStats, EmbeddingProvider, ExtractionOptions,
    ExtractionProvider, ProgressSink,
};

//! Docflow Core: error taxonomy, configuration, shared document types and the memory budget.

pub mod config;
pub mod document;
pub mod error;
pub mod memory;

pub use config::{
    DocflowConfig, MemoryConfig, OrientationConfig, PipelineConfig, ProviderConfig, RouterConfig,
    WorkerConfig,
};
pub use document::{content_hash, Chunk, ChunkMetadata, ExtractionResult, Page};
pub use error::{Error, Result};
pub use memory::{MemoryManager, MemorySnapshot, SystemMemory};

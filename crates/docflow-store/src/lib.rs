//! Docflow Store — persistence contracts for the ingestion pipeline and
//! their SQLite implementation.

pub mod embedding;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, SourceStatusStore, VectorStore};
pub use types::*;

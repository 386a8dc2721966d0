//! Database schema SQL.

/// Sources, chunks (with quantized embeddings), and processing checkpoints.
/// Checkpoint embeddings get their own table so each batch appends rows.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    chunk_count INTEGER NOT NULL DEFAULT 0,
    processing_time_ms INTEGER,
    error_message TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sources_org ON sources(organization_id);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    page_number INTEGER,
    section TEXT,
    char_start INTEGER,
    char_end INTEGER,
    embedding BLOB,
    scale REAL,
    offset_val REAL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id, organization_id);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash, source_id, organization_id);

CREATE TABLE IF NOT EXISTS processing_checkpoints (
    source_id TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    last_completed_chunk_index INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    extraction_json TEXT,
    chunks_json TEXT,
    started_at TEXT NOT NULL,
    last_updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_embeddings (
    source_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    embedding_json TEXT NOT NULL,
    PRIMARY KEY (source_id, chunk_index)
);
"#;

//! SQLite-backed source, chunk, and checkpoint store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::embedding::QuantizedEmbedding;
use crate::schema::SCHEMA_SQL;
use crate::traits::{CheckpointStore, SourceStatusStore, VectorStore};
use crate::types::*;
use docflow_core::{Error, Result};

/// SQLite store implementing every persistence contract of the pipeline.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the SQLite store.
    ///
    /// `db_dir` is a directory; the file will be `db_dir/docflow.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("docflow.db");

        let conn = Connection::open(&db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        info!("SqliteStore initialized at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Sources
    // ---------------------------------------------------------------

    /// Register an uploaded source in `pending` state.
    pub fn create_source(&self, new: &NewSource) -> Result<Source> {
        let now = now_millis();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sources (id, organization_id, owner_id, filename, mime_type, size, \
             status, chunk_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7)",
            params![
                new.id,
                new.organization_id,
                new.owner_id,
                new.filename,
                new.mime_type,
                new.size as i64,
                now
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        drop(conn);

        self.get_source(&new.id)?
            .ok_or_else(|| Error::Internal(format!("source {} vanished after insert", new.id)))
    }

    pub fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock();
        let source = conn
            .prepare_cached("SELECT * FROM sources WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![source_id], |row| Ok(Self::row_to_source(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(source)
    }

    fn write_status(&self, source_id: &str, status: SourceStatus, extra: &StatusUpdate) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE sources SET status = ?2, \
                 chunk_count = COALESCE(?3, chunk_count), \
                 processing_time_ms = COALESCE(?4, processing_time_ms), \
                 error_message = ?5, updated_at = ?6 \
                 WHERE id = ?1",
                params![
                    source_id,
                    status.as_str(),
                    extra.chunk_count.map(|c| c as i64),
                    extra.processing_time_ms.map(|t| t as i64),
                    extra.error_message,
                    now_millis()
                ],
            )
            .map_err(|e| Error::Persistence(e.to_string()))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("source {}", source_id)));
        }
        debug!(source_id, status = %status, "Source status updated");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Chunks
    // ---------------------------------------------------------------

    pub fn get_chunk(&self, chunk_id: i64, organization_id: &str) -> Result<Option<StoredChunk>> {
        let conn = self.conn.lock();
        let chunk = conn
            .prepare_cached("SELECT * FROM chunks WHERE id = ?1 AND organization_id = ?2")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![chunk_id, organization_id], |row| {
                Ok(Self::row_to_chunk(row))
            })
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(chunk)
    }

    /// Read back a stored embedding.
    pub fn get_embedding(&self, chunk_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT embedding, scale, offset_val FROM chunks WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![chunk_id], |row| {
                Ok((
                    row.get::<_, Option<Vec<u8>>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(match row {
            Some((Some(bytes), Some(scale), Some(offset))) => Some(
                QuantizedEmbedding {
                    bytes,
                    scale: scale as f32,
                    offset: offset as f32,
                }
                .dequantize()
                .to_vec(),
            ),
            _ => None,
        })
    }

    pub fn count_chunks(&self, source_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count as usize)
    }

    // ---------------------------------------------------------------
    // Checkpoint embeddings
    // ---------------------------------------------------------------

    fn insert_checkpoint_embeddings(
        conn: &Connection,
        source_id: &str,
        embeddings: &[EmbeddedChunk],
    ) -> Result<()> {
        let mut stmt = conn
            .prepare_cached(
                "INSERT OR REPLACE INTO checkpoint_embeddings (source_id, chunk_index, embedding_json) \
                 VALUES (?1, ?2, ?3)",
            )
            .map_err(|e| Error::Persistence(e.to_string()))?;
        for embedded in embeddings {
            stmt.execute(params![
                source_id,
                embedded.chunk_index as i64,
                serde_json::to_string(&embedded.embedding)?,
            ])
            .map_err(|e| Error::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    fn load_checkpoint_embeddings(conn: &Connection, source_id: &str) -> Result<Vec<EmbeddedChunk>> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT chunk_index, embedding_json FROM checkpoint_embeddings \
                 WHERE source_id = ?1 ORDER BY chunk_index",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![source_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (index, json) = row.map_err(|e| Error::Database(e.to_string()))?;
            embeddings.push(EmbeddedChunk {
                chunk_index: index as usize,
                embedding: serde_json::from_str(&json)?,
            });
        }
        Ok(embeddings)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_source(row: &rusqlite::Row<'_>) -> Source {
        let status: String = row.get("status").unwrap_or_default();
        Source {
            id: row.get("id").unwrap_or_default(),
            organization_id: row.get("organization_id").unwrap_or_default(),
            owner_id: row.get("owner_id").unwrap_or_default(),
            filename: row.get("filename").unwrap_or_default(),
            mime_type: row.get("mime_type").unwrap_or_default(),
            size: row.get::<_, i64>("size").unwrap_or(0) as u64,
            status: SourceStatus::parse(&status).unwrap_or(SourceStatus::Pending),
            chunk_count: row.get::<_, i64>("chunk_count").unwrap_or(0) as usize,
            processing_time_ms: row
                .get::<_, Option<i64>>("processing_time_ms")
                .ok()
                .flatten()
                .map(|t| t as u64),
            error_message: row.get("error_message").ok().flatten(),
            created_at: row.get("created_at").unwrap_or(0),
            updated_at: row.get("updated_at").unwrap_or(0),
        }
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> StoredChunk {
        StoredChunk {
            id: row.get("id").unwrap_or(0),
            source_id: row.get("source_id").unwrap_or_default(),
            organization_id: row.get("organization_id").unwrap_or_default(),
            chunk_index: row.get::<_, i64>("chunk_index").unwrap_or(0) as usize,
            text: row.get("text").unwrap_or_default(),
            token_count: row.get::<_, i64>("token_count").unwrap_or(0) as usize,
            content_hash: row.get("content_hash").unwrap_or_default(),
            page_number: row
                .get::<_, Option<i64>>("page_number")
                .ok()
                .flatten()
                .map(|p| p as u32),
            section: row.get("section").ok().flatten(),
            char_start: row.get::<_, Option<i64>>("char_start").ok().flatten().unwrap_or(0) as usize,
            char_end: row.get::<_, Option<i64>>("char_end").ok().flatten().unwrap_or(0) as usize,
            has_embedding: row
                .get::<_, Option<Vec<u8>>>("embedding")
                .ok()
                .flatten()
                .is_some(),
            created_at: row.get("created_at").unwrap_or(0),
        }
    }

    fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> Result<ProcessingCheckpoint> {
        let get_json = |col: &str| -> Option<String> { row.get(col).ok().flatten() };
        let stage: String = row.get("stage").map_err(|e| Error::Database(e.to_string()))?;
        let stage = CheckpointStage::parse(&stage)
            .ok_or_else(|| Error::Database(format!("unknown checkpoint stage {}", stage)))?;

        Ok(ProcessingCheckpoint {
            source_id: row.get("source_id").map_err(|e| Error::Database(e.to_string()))?,
            stage,
            last_completed_chunk_index: row
                .get::<_, i64>("last_completed_chunk_index")
                .unwrap_or(0) as usize,
            total_chunks: row.get::<_, i64>("total_chunks").unwrap_or(0) as usize,
            extraction: get_json("extraction_json")
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            chunks: get_json("chunks_json")
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            embeddings: Vec::new(),
            started_at: parse_time(row.get("started_at").ok()),
            last_updated_at: parse_time(row.get("last_updated_at").ok()),
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_checkpoint(&self, source_id: &str) -> Result<Option<ProcessingCheckpoint>> {
        let conn = self.conn.lock();
        let mut checkpoint = {
            let mut stmt = conn
                .prepare_cached("SELECT * FROM processing_checkpoints WHERE source_id = ?1")
                .map_err(|e| Error::Database(e.to_string()))?;
            let mut rows = stmt
                .query(params![source_id])
                .map_err(|e| Error::Database(e.to_string()))?;
            let next = rows.next().map_err(|e| Error::Database(e.to_string()))?;
            let Some(row) = next else {
                return Ok(None);
            };
            Self::row_to_checkpoint(row)?
        };
        checkpoint.embeddings = Self::load_checkpoint_embeddings(&conn, source_id)?;
        Ok(Some(checkpoint))
    }

    async fn save_checkpoint(&self, checkpoint: &ProcessingCheckpoint) -> Result<()> {
        let extraction_json = checkpoint
            .extraction
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let chunks_json = checkpoint
            .chunks
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        tx.execute(
            "INSERT INTO processing_checkpoints (source_id, stage, last_completed_chunk_index, \
             total_chunks, extraction_json, chunks_json, started_at, last_updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(source_id) DO UPDATE SET \
             stage = excluded.stage, \
             last_completed_chunk_index = excluded.last_completed_chunk_index, \
             total_chunks = excluded.total_chunks, \
             extraction_json = excluded.extraction_json, \
             chunks_json = excluded.chunks_json, \
             last_updated_at = excluded.last_updated_at",
            params![
                checkpoint.source_id,
                checkpoint.stage.as_str(),
                checkpoint.last_completed_chunk_index as i64,
                checkpoint.total_chunks as i64,
                extraction_json,
                chunks_json,
                checkpoint.started_at.to_rfc3339(),
                checkpoint.last_updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Persistence(e.to_string()))?;
        tx.execute(
            "DELETE FROM checkpoint_embeddings WHERE source_id = ?1",
            params![checkpoint.source_id],
        )
        .map_err(|e| Error::Persistence(e.to_string()))?;
        Self::insert_checkpoint_embeddings(&tx, &checkpoint.source_id, &checkpoint.embeddings)?;
        tx.commit().map_err(|e| Error::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn append_batch(
        &self,
        checkpoint: &ProcessingCheckpoint,
        batch: &[EmbeddedChunk],
    ) -> Result<()> {
        let appended = {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| Error::Persistence(e.to_string()))?;
            let updated = tx
                .execute(
                    "UPDATE processing_checkpoints SET stage = ?2, last_completed_chunk_index = ?3, \
                     total_chunks = ?4, last_updated_at = ?5 WHERE source_id = ?1",
                    params![
                        checkpoint.source_id,
                        checkpoint.stage.as_str(),
                        checkpoint.last_completed_chunk_index as i64,
                        checkpoint.total_chunks as i64,
                        checkpoint.last_updated_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| Error::Persistence(e.to_string()))?;
            if updated > 0 {
                Self::insert_checkpoint_embeddings(&tx, &checkpoint.source_id, batch)?;
                tx.commit().map_err(|e| Error::Persistence(e.to_string()))?;
            }
            updated > 0
        };
        if !appended {
            // No row yet: write the full checkpoint instead.
            return self.save_checkpoint(checkpoint).await;
        }
        debug!(
            source_id = %checkpoint.source_id,
            completed = checkpoint.last_completed_chunk_index,
            rows = batch.len(),
            "Checkpoint batch appended"
        );
        Ok(())
    }

    async fn delete_checkpoint(&self, source_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM checkpoint_embeddings WHERE source_id = ?1",
            params![source_id],
        )
        .map_err(|e| Error::Persistence(e.to_string()))?;
        let deleted = conn
            .execute(
                "DELETE FROM processing_checkpoints WHERE source_id = ?1",
                params![source_id],
            )
            .map_err(|e| Error::Persistence(e.to_string()))?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl SourceStatusStore for SqliteStore {
    async fn update_status(
        &self,
        source_id: &str,
        status: SourceStatus,
        extra: StatusUpdate,
    ) -> Result<()> {
        self.write_status(source_id, status, &extra)
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn check_duplicate(
        &self,
        content_hash: &str,
        source_id: &str,
        organization_id: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .prepare_cached(
                "SELECT 1 FROM chunks WHERE content_hash = ?1 AND source_id = ?2 \
                 AND organization_id = ?3 LIMIT 1",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![content_hash, source_id, organization_id], |_| Ok(()))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn insert_chunk(&self, record: &ChunkRecord) -> Result<i64> {
        // An empty vector means "no embedding" and is stored as NULL.
        let q = (!record.embedding.is_empty())
            .then(|| QuantizedEmbedding::quantize(&record.embedding));
        let chunk = &record.chunk;
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO chunks (source_id, organization_id, chunk_index, text, token_count, \
                 content_hash, page_number, section, char_start, char_end, embedding, scale, \
                 offset_val, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .map_err(|e| Error::Storage(e.to_string()))?
            .insert(params![
                record.source_id,
                record.organization_id,
                chunk.chunk_index as i64,
                chunk.text,
                chunk.token_count as i64,
                chunk.content_hash,
                chunk.metadata.page_number,
                chunk.metadata.section,
                chunk.metadata.char_start as i64,
                chunk.metadata.char_end as i64,
                q.as_ref().map(|q| &q.bytes),
                q.as_ref().map(|q| q.scale as f64),
                q.as_ref().map(|q| q.offset as f64),
                now_millis(),
            ])
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(id)
    }

    async fn delete_chunk(&self, chunk_id: i64, organization_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM chunks WHERE id = ?1 AND organization_id = ?2",
                params![chunk_id, organization_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn get_chunks(
        &self,
        source_id: &str,
        organization_id: &str,
        chunk_ids: Option<&[i64]>,
    ) -> Result<Vec<StoredChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM chunks WHERE source_id = ?1 AND organization_id = ?2 \
                 ORDER BY chunk_index, id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![source_id, organization_id], |row| {
                Ok(Self::row_to_chunk(row))
            })
            .map_err(|e| Error::Database(e.to_string()))?;

        let wanted: Option<HashSet<i64>> = chunk_ids.map(|ids| ids.iter().copied().collect());
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|c| wanted.as_ref().map_or(true, |w| w.contains(&c.id)))
            .collect())
    }

    async fn update_embedding(
        &self,
        chunk_id: i64,
        organization_id: &str,
        embedding: &[f32],
    ) -> Result<bool> {
        let q = QuantizedEmbedding::quantize(embedding);
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE chunks SET embedding = ?3, scale = ?4, offset_val = ?5 \
                 WHERE id = ?1 AND organization_id = ?2",
                params![chunk_id, organization_id, q.bytes, q.scale as f64, q.offset as f64],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(updated > 0)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_time(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{Chunk, ChunkMetadata, ExtractionResult, Page};
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn new_source(id: &str) -> NewSource {
        NewSource {
            id: id.into(),
            organization_id: "org-1".into(),
            owner_id: "user-1".into(),
            filename: "report.txt".into(),
            mime_type: "text/plain".into(),
            size: 42,
        }
    }

    fn record(text: &str, index: usize) -> ChunkRecord {
        ChunkRecord {
            source_id: "src-1".into(),
            organization_id: "org-1".into(),
            chunk: Chunk::new(
                text.into(),
                index,
                ChunkMetadata {
                    page_number: Some(1),
                    section: Some("Intro".into()),
                    char_start: 0,
                    char_end: text.len(),
                },
            ),
            embedding: vec![0.1, 0.2, 0.3],
        }
    }

    #[tokio::test]
    async fn test_source_status_transitions() {
        let (store, _dir) = test_store();
        let source = store.create_source(&new_source("src-1")).unwrap();
        assert_eq!(source.status, SourceStatus::Pending);

        store
            .update_status("src-1", SourceStatus::Processing, StatusUpdate::default())
            .await
            .unwrap();
        store
            .update_status("src-1", SourceStatus::Completed, StatusUpdate::completed(7, 1234))
            .await
            .unwrap();

        let source = store.get_source("src-1").unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Completed);
        assert_eq!(source.chunk_count, 7);
        assert_eq!(source.processing_time_ms, Some(1234));
        assert!(source.error_message.is_none());
    }

    #[tokio::test]
    async fn test_status_on_missing_source() {
        let (store, _dir) = test_store();
        let result = store
            .update_status("nope", SourceStatus::Processing, StatusUpdate::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_upsert_and_delete() {
        let (store, _dir) = test_store();
        let mut cp = ProcessingCheckpoint::new("src-1");
        cp.extraction = Some(ExtractionResult::from_pages(
            vec![Page {
                page_number: 1,
                text: "hello".into(),
                confidence: 88.0,
            }],
            serde_json::Value::Null,
        ));
        store.save_checkpoint(&cp).await.unwrap();

        cp.enter(CheckpointStage::Embedding);
        cp.total_chunks = 10;
        cp.chunks = Some(Vec::new());
        cp.advance(5);
        cp.embeddings.push(EmbeddedChunk {
            chunk_index: 0,
            embedding: vec![1.0, 2.0],
        });
        store.save_checkpoint(&cp).await.unwrap();

        let loaded = store.get_checkpoint("src-1").await.unwrap().unwrap();
        assert_eq!(loaded.stage, CheckpointStage::Embedding);
        assert_eq!(loaded.last_completed_chunk_index, 5);
        assert_eq!(loaded.total_chunks, 10);
        assert_eq!(loaded.embeddings.len(), 1);
        assert_eq!(loaded.extraction.unwrap().pages[0].text, "hello");

        assert!(store.delete_checkpoint("src-1").await.unwrap());
        assert!(store.get_checkpoint("src-1").await.unwrap().is_none());
        assert!(!store.delete_checkpoint("src-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_appended_batches_accumulate_without_rewrite() {
        let (store, _dir) = test_store();
        let mut cp = ProcessingCheckpoint::new("src-1");
        cp.chunks = Some(Vec::new());
        cp.total_chunks = 4;
        cp.enter(CheckpointStage::Embedding);
        store.save_checkpoint(&cp).await.unwrap();

        for start in [0usize, 2] {
            let batch = vec![
                EmbeddedChunk {
                    chunk_index: start,
                    embedding: vec![start as f32, 0.5],
                },
                EmbeddedChunk {
                    chunk_index: start + 1,
                    embedding: vec![start as f32 + 1.0, 0.5],
                },
            ];
            cp.embeddings.extend(batch.iter().cloned());
            cp.advance(2);
            store.append_batch(&cp, &batch).await.unwrap();

            let loaded = store.get_checkpoint("src-1").await.unwrap().unwrap();
            assert_eq!(loaded.last_completed_chunk_index, start + 2);
            assert_eq!(loaded.embeddings.len(), start + 2);
        }

        let loaded = store.get_checkpoint("src-1").await.unwrap().unwrap();
        let indexes: Vec<usize> = loaded.embeddings.iter().map(|e| e.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(loaded.embeddings[3].embedding, vec![3.0, 0.5]);
        assert_eq!(loaded.stage, CheckpointStage::Embedding);

        // A full save replaces the cached embeddings.
        cp.embeddings.truncate(1);
        store.save_checkpoint(&cp).await.unwrap();
        let loaded = store.get_checkpoint("src-1").await.unwrap().unwrap();
        assert_eq!(loaded.embeddings.len(), 1);

        assert!(store.delete_checkpoint("src-1").await.unwrap());
        let conn = store.conn.lock();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM checkpoint_embeddings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn test_append_without_row_writes_full_checkpoint() {
        let (store, _dir) = test_store();
        let mut cp = ProcessingCheckpoint::new("src-9");
        cp.total_chunks = 1;
        let batch = vec![EmbeddedChunk {
            chunk_index: 0,
            embedding: vec![1.0],
        }];
        cp.embeddings = batch.clone();
        cp.advance(1);
        store.append_batch(&cp, &batch).await.unwrap();

        let loaded = store.get_checkpoint("src-9").await.unwrap().unwrap();
        assert_eq!(loaded.last_completed_chunk_index, 1);
        assert_eq!(loaded.embeddings.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_scoped_by_source_and_org() {
        let (store, _dir) = test_store();
        let rec = record("The quick brown fox", 0);
        let hash = rec.chunk.content_hash.clone();

        assert!(!store.check_duplicate(&hash, "src-1", "org-1").await.unwrap());
        store.insert_chunk(&rec).await.unwrap();
        assert!(store.check_duplicate(&hash, "src-1", "org-1").await.unwrap());
        assert!(!store.check_duplicate(&hash, "src-2", "org-1").await.unwrap());
        assert!(!store.check_duplicate(&hash, "src-1", "org-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_chunk_crud() {
        let (store, _dir) = test_store();
        let a = store.insert_chunk(&record("alpha", 0)).await.unwrap();
        let b = store.insert_chunk(&record("beta", 1)).await.unwrap();

        let all = store.get_chunks("src-1", "org-1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].chunk_index, 0);
        assert!(all[0].has_embedding);
        assert_eq!(all[0].section.as_deref(), Some("Intro"));

        let only_b = store.get_chunks("src-1", "org-1", Some(&[b])).await.unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].text, "beta");

        assert!(store.update_embedding(a, "org-1", &[0.9, 0.1, 0.5]).await.unwrap());
        let emb = store.get_embedding(a).unwrap().unwrap();
        assert!((emb[0] - 0.9).abs() < 0.01);

        assert!(!store.delete_chunk(a, "org-2").await.unwrap());
        assert!(store.delete_chunk(a, "org-1").await.unwrap());
        assert_eq!(store.count_chunks("src-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_embedding_is_stored_as_null() {
        let (store, _dir) = test_store();
        let mut rec = record("no vector", 0);
        rec.embedding.clear();
        let id = store.insert_chunk(&rec).await.unwrap();

        let chunk = store.get_chunk(id, "org-1").unwrap().unwrap();
        assert!(!chunk.has_embedding);
        assert_eq!(chunk.char_end, "no vector".len());
        assert!(store.get_embedding(id).unwrap().is_none());
    }
}

//! Job payloads and results.

use docflow_core::{Error, Result};
use docflow_ingest::{
    GenerateEmbeddingsRequest, ProcessDocumentRequest, ProcessingStats, ReprocessChunksRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    ProcessDocument,
    GenerateEmbeddings,
    ReprocessChunks,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::ProcessDocument,
        JobKind::GenerateEmbeddings,
        JobKind::ReprocessChunks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessDocument => "processDocument",
            Self::GenerateEmbeddings => "generateEmbeddings",
            Self::ReprocessChunks => "reprocessChunks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queue payload, discriminated by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Job {
    ProcessDocument(ProcessDocumentRequest),
    GenerateEmbeddings(GenerateEmbeddingsRequest),
    ReprocessChunks(ReprocessChunksRequest),
}

impl Job {
    /// Decode a raw payload. Unknown or missing tags and malformed bodies are
    /// validation errors, which the queue never retries.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let tag = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("job payload has no type tag".into()))?;
        if JobKind::parse(tag).is_none() {
            return Err(Error::Validation(format!("unknown job type: {}", tag)));
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Validation(format!("malformed {} payload: {}", tag, e)))
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::ProcessDocument(_) => JobKind::ProcessDocument,
            Self::GenerateEmbeddings(_) => JobKind::GenerateEmbeddings,
            Self::ReprocessChunks(_) => JobKind::ReprocessChunks,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Self::ProcessDocument(r) => &r.source_id,
            Self::GenerateEmbeddings(r) => &r.source_id,
            Self::ReprocessChunks(r) => &r.source_id,
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            Self::ProcessDocument(r) => &r.organization_id,
            Self::GenerateEmbeddings(r) => &r.organization_id,
            Self::ReprocessChunks(r) => &r.organization_id,
        }
    }
}

/// Outcome reported for every attempt, successful or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub source_id: String,
    pub organization_id: String,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProcessingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Failure handed to the queue. `retryable` decides whether the queue's
/// backoff policy schedules another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for JobFailure {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

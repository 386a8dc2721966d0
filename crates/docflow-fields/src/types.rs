use serde::{Deserialize, Serialize};

use crate::patterns::PatternType;

/// How a field value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Matched in directly readable text.
    Pattern,
    /// Matched in text produced by page recognition.
    RecognitionAssisted,
}

/// Pixel region on the page image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A scored structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub value: String,
    /// 0–100.
    pub confidence: f64,
    pub source: FieldSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<BoundingBox>,
    pub raw_text: String,
    /// Whether the value passes the type's format check.
    pub valid: bool,
}

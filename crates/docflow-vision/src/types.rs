//! Recognition result types.

use docflow_core::Page;
use serde::{Deserialize, Serialize};

/// Which engine(s) produced a recognition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Fast,
    Vision,
    Hybrid,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Vision => "vision",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicitly requested engine, bypassing routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    Fast,
    Vision,
}

/// Raw engine output: text plus a 0–100 confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub text: String,
    pub confidence: f64,
}

impl EngineOutput {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// Length of the recognized text in characters, ignoring surrounding whitespace.
    pub fn text_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

/// Page difficulty as judged from the fast-engine baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Complex,
}

/// Final routed recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f64,
    pub engine_used: EngineKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<Page>>,
}

impl RecognitionResult {
    pub fn from_output(output: EngineOutput, engine_used: EngineKind) -> Self {
        Self {
            text: output.text,
            confidence: output.confidence,
            engine_used,
            pages: None,
        }
    }
}

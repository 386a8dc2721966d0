//! Vision-language recognition over an OpenAI-compatible chat endpoint.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use docflow_core::{Error, ProviderConfig, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::engine::VisionEngine;
use crate::types::EngineOutput;

const EXTRACTION_PROMPT: &str = "Transcribe all text in this document image exactly as it \
appears, preserving line breaks and reading order. Mark any text you cannot read as [unclear]. \
Output only the transcription.";

const BASE_CONFIDENCE: f64 = 60.0;
const MIN_CONFIDENCE: f64 = 10.0;
const MAX_CONFIDENCE: f64 = 85.0;
const MAX_PENALTY: f64 = 20.0;

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,4}[/.-]\d{1,2}[/.-]\d{1,4}\b").unwrap());

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,}[-#]?\d{3,}\b").unwrap());

static LABEL_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[A-Za-z][A-Za-z ]{1,30}:\s*\S").unwrap());

const UNCERTAINTY_MARKERS: &[&str] = &[
    "[unclear]",
    "[illegible]",
    "[unreadable]",
    "[?]",
    "(?)",
    "???",
];

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "unable to read",
    "unable to extract",
    "i'm sorry",
    "i am sorry",
];

/// Heuristic 0–100 confidence for vision output, which carries no native score.
///
/// Starts at 60 and is clamped to `[10, 85]` so a vision result never looks
/// more certain than a clean fast-engine read.
pub fn estimate_vision_confidence(text: &str) -> f64 {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    let mut score = BASE_CONFIDENCE;

    if len > 100 {
        score += 5.0;
    }
    if len > 500 {
        score += 4.0;
    }
    if len > 1000 {
        score += 4.0;
    }

    if DATE_RE.is_match(trimmed) {
        score += 3.0;
    }
    if ID_RE.is_match(trimmed) {
        score += 2.0;
    }
    if LABEL_VALUE_RE.is_match(trimmed) {
        score += 2.0;
    }

    let lower = trimmed.to_lowercase();
    let markers: usize = UNCERTAINTY_MARKERS
        .iter()
        .map(|m| lower.matches(m).count())
        .sum();
    score -= 3.0 * markers as f64;

    let mut penalty: f64 = 0.0;
    if len < 20 {
        penalty += 20.0;
    } else if len < 50 {
        penalty += 10.0;
    }
    if REFUSAL_PHRASES.iter().any(|p| lower.contains(p)) {
        penalty += 20.0;
    }
    score -= penalty.min(MAX_PENALTY);

    score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Vision engine calling an OpenAI-compatible `chat/completions` endpoint.
pub struct HttpVisionEngine {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpVisionEngine {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .vision_api_key
            .clone()
            .ok_or_else(|| Error::Config("vision engine requires DOCFLOW_VISION_API_KEY".into()))?;
        info!(
            "Vision engine configured: {} at {}",
            config.vision_model, config.vision_endpoint
        );
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.vision_endpoint.clone(),
            model: config.vision_model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl VisionEngine for HttpVisionEngine {
    fn name(&self) -> &str {
        &self.model
    }

    async fn extract(&self, image: &[u8]) -> Result<EngineOutput> {
        let mime_type = image::guess_format(image)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/png");
        let b64 = STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": EXTRACTION_PROMPT },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:{};base64,{}", mime_type, b64) } }
                ]
            }],
            "max_tokens": 4096,
            "temperature": 0
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Recognition(format!(
                "vision endpoint returned {}: {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        let json: serde_json::Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let confidence = estimate_vision_confidence(&text);
        debug!(chars = text.len(), confidence, "Vision extraction complete");
        Ok(EngineOutput::new(text, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_is_penalized() {
        assert_eq!(estimate_vision_confidence(""), 40.0);
        assert_eq!(estimate_vision_confidence("Hello there, world!!!!!!!!!"), 50.0);
    }

    #[test]
    fn test_refusal_penalty_is_capped() {
        // Short and a refusal: penalty still capped at 20.
        assert_eq!(estimate_vision_confidence("I cannot read this"), 40.0);
    }

    #[test]
    fn test_structured_text_scores_higher() {
        let body = "Invoice Number: INV-20931\nDate: 2024-03-15\n".to_string()
            + &"Line item description with quantity and price. ".repeat(3);
        let score = estimate_vision_confidence(&body);
        // 60 + 5 (len > 100) + 3 (date) + 2 (id) + 2 (label: value)
        assert_eq!(score, 72.0);
    }

    #[test]
    fn test_uncertainty_markers_and_bounds() {
        let clean = "word ".repeat(300);
        let unsure = format!("{} [unclear] [illegible] ???", clean);
        assert!(estimate_vision_confidence(&unsure) < estimate_vision_confidence(&clean));

        let huge = "Date: 2024-01-01 ID AB-12345\n".to_string() + &"text ".repeat(400);
        assert!(estimate_vision_confidence(&huge) <= MAX_CONFIDENCE);

        let awful = "[?] ".repeat(40);
        assert!(estimate_vision_confidence(&awful) >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_engine_requires_key() {
        let config = ProviderConfig::default();
        assert!(matches!(HttpVisionEngine::new(&config), Err(Error::Config(_))));
    }
}

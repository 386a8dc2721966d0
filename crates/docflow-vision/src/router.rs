//! Routes page images between the fast engine and the vision-language engine.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use docflow_core::{Error, Result, RouterConfig};
use image::ImageReader;
use tracing::{debug, info, warn};

use crate::engine::{RecognitionEngine, VisionEngine};
use crate::types::{Complexity, EngineChoice, EngineKind, EngineOutput, RecognitionResult};

pub struct RecognitionRouter {
    config: RouterConfig,
    fast: Arc<dyn RecognitionEngine>,
    vision: Option<Arc<dyn VisionEngine>>,
}

impl RecognitionRouter {
    pub fn new(
        config: RouterConfig,
        fast: Arc<dyn RecognitionEngine>,
        vision: Option<Arc<dyn VisionEngine>>,
    ) -> Self {
        Self {
            config,
            fast,
            vision,
        }
    }

    fn vision_available(&self) -> Option<&Arc<dyn VisionEngine>> {
        if self.config.vision_enabled {
            self.vision.as_ref()
        } else {
            None
        }
    }

    /// Recognize one page image.
    ///
    /// A forced engine is called alone and its errors propagate. Otherwise the
    /// fast engine always runs first and vision failures fall back to it.
    pub async fn route(
        &self,
        image: &[u8],
        force: Option<EngineChoice>,
    ) -> Result<RecognitionResult> {
        match force {
            Some(EngineChoice::Fast) => {
                let out = self.fast.recognize(image).await?;
                return Ok(RecognitionResult::from_output(out, EngineKind::Fast));
            }
            Some(EngineChoice::Vision) => {
                let vision = self
                    .vision
                    .as_ref()
                    .ok_or_else(|| Error::Config("no vision engine configured".into()))?;
                let out = self.call_vision(vision.as_ref(), image).await?;
                return Ok(RecognitionResult::from_output(out, EngineKind::Vision));
            }
            None => {}
        }

        let fast = self.fast.recognize(image).await?;
        let Some(vision) = self.vision_available() else {
            return Ok(RecognitionResult::from_output(fast, EngineKind::Fast));
        };

        let complexity = self.classify(&fast, image);
        debug!(
            confidence = fast.confidence,
            chars = fast.text_len(),
            ?complexity,
            "Classified page"
        );
        if complexity == Complexity::Simple {
            return Ok(RecognitionResult::from_output(fast, EngineKind::Fast));
        }

        let vision_out = match self.call_vision(vision.as_ref(), image).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Vision engine failed, keeping fast result: {}", e);
                return Ok(RecognitionResult::from_output(fast, EngineKind::Fast));
            }
        };

        Ok(self.decide(fast, vision_out))
    }

    /// Judge page difficulty from the fast-engine baseline.
    pub fn classify(&self, fast: &EngineOutput, image: &[u8]) -> Complexity {
        let len = fast.text_len();
        if fast.confidence >= self.config.high_confidence_threshold
            && len >= self.config.simple_density_threshold
        {
            return Complexity::Simple;
        }
        if fast.confidence < self.config.low_confidence_threshold
            || len < self.config.min_density_threshold
        {
            return Complexity::Complex;
        }
        match image_pixels(image) {
            Some(pixels) if pixels > self.config.large_page_pixels => Complexity::Complex,
            _ => Complexity::Simple,
        }
    }

    /// Pick between two successful engine outputs.
    fn decide(&self, fast: EngineOutput, vision: EngineOutput) -> RecognitionResult {
        if (vision.confidence - fast.confidence).abs() < self.config.hybrid_merge_delta {
            let confidence = fast.confidence.max(vision.confidence);
            info!(
                fast = fast.confidence,
                vision = vision.confidence,
                "Merging fast and vision output"
            );
            let text = merge_lines(&fast.text, &vision.text);
            return RecognitionResult::from_output(EngineOutput::new(text, confidence), EngineKind::Hybrid);
        }
        if vision.confidence > fast.confidence {
            RecognitionResult::from_output(vision, EngineKind::Vision)
        } else {
            RecognitionResult::from_output(fast, EngineKind::Fast)
        }
    }

    async fn call_vision(&self, vision: &dyn VisionEngine, image: &[u8]) -> Result<EngineOutput> {
        let timeout_ms = self.config.vision_timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout_ms), vision.extract(image))
            .await
            .map_err(|_| Error::RecognitionTimeout(timeout_ms))?
    }

    pub async fn shutdown(&self) {
        self.fast.shutdown().await;
        if let Some(vision) = &self.vision {
            vision.shutdown().await;
        }
    }
}

fn image_pixels(image: &[u8]) -> Option<u64> {
    let (w, h) = ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some(u64::from(w) * u64::from(h))
}

/// Concatenate both texts line by line, dropping exact duplicate lines.
fn merge_lines(first: &str, second: &str) -> String {
    let mut seen = HashSet::new();
    first
        .lines()
        .chain(second.lines())
        .filter(|line| seen.insert(*line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedFast(EngineOutput);

    #[async_trait]
    impl RecognitionEngine for ScriptedFast {
        fn name(&self) -> &str {
            "scripted-fast"
        }
        async fn recognize(&self, _image: &[u8]) -> Result<EngineOutput> {
            Ok(self.0.clone())
        }
    }

    enum VisionScript {
        Output(EngineOutput),
        Fail,
        Hang,
    }

    struct ScriptedVision {
        script: VisionScript,
        calls: Mutex<usize>,
    }

    impl ScriptedVision {
        fn new(script: VisionScript) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionEngine for ScriptedVision {
        fn name(&self) -> &str {
            "scripted-vision"
        }
        async fn extract(&self, _image: &[u8]) -> Result<EngineOutput> {
            *self.calls.lock() += 1;
            match &self.script {
                VisionScript::Output(out) => Ok(out.clone()),
                VisionScript::Fail => Err(Error::Http("connection refused".into())),
                VisionScript::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(Error::Internal("unreachable".into()))
                }
            }
        }
    }

    fn router(
        fast: EngineOutput,
        vision: Option<Arc<ScriptedVision>>,
        enabled: bool,
    ) -> RecognitionRouter {
        let config = RouterConfig {
            vision_enabled: enabled,
            vision_timeout_ms: 50,
            ..Default::default()
        };
        RecognitionRouter::new(
            config,
            Arc::new(ScriptedFast(fast)),
            vision.map(|v| v as Arc<dyn VisionEngine>),
        )
    }

    #[tokio::test]
    async fn test_confident_dense_page_stays_fast_when_vision_disabled() {
        let text = "a".repeat(300);
        let r = router(EngineOutput::new(text.clone(), 92.0), None, false);
        let result = r.route(b"page", None).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::Fast);
        assert_eq!(result.text, text);
        assert_eq!(result.confidence, 92.0);
    }

    #[tokio::test]
    async fn test_sparse_low_confidence_page_escalates_to_vision() {
        let vision = ScriptedVision::new(VisionScript::Output(EngineOutput::new(
            "Vision transcript",
            70.0,
        )));
        let r = router(EngineOutput::new("0123456789", 40.0), Some(vision.clone()), true);
        let result = r.route(b"page", None).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::Vision);
        assert_eq!(result.confidence, 70.0);
        assert_eq!(*vision.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_close_confidences_merge_into_hybrid() {
        let vision = ScriptedVision::new(VisionScript::Output(EngineOutput::new(
            "Invoice 42\nTotal: 10.00\nPaid",
            65.0,
        )));
        let r = router(
            EngineOutput::new("Invoice 42\nTota1: 10.00", 60.0),
            Some(vision),
            true,
        );
        let result = r.route(b"page", None).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::Hybrid);
        assert_eq!(result.confidence, 65.0);
        assert_eq!(result.text, "Invoice 42\nTota1: 10.00\nTotal: 10.00\nPaid");
    }

    #[tokio::test]
    async fn test_vision_failure_and_timeout_fall_back_to_fast() {
        for script in [VisionScript::Fail, VisionScript::Hang] {
            let vision = ScriptedVision::new(script);
            let r = router(EngineOutput::new("short", 30.0), Some(vision), true);
            let result = r.route(b"page", None).await.unwrap();
            assert_eq!(result.engine_used, EngineKind::Fast);
            assert_eq!(result.text, "short");
        }
    }

    #[tokio::test]
    async fn test_weaker_vision_keeps_fast() {
        let vision = ScriptedVision::new(VisionScript::Output(EngineOutput::new("x", 20.0)));
        let r = router(EngineOutput::new("tiny", 45.0), Some(vision), true);
        let result = r.route(b"page", None).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::Fast);
        assert_eq!(result.confidence, 45.0);
    }

    #[tokio::test]
    async fn test_simple_page_skips_vision() {
        let vision = ScriptedVision::new(VisionScript::Output(EngineOutput::new("v", 85.0)));
        let r = router(EngineOutput::new("b".repeat(250), 90.0), Some(vision.clone()), true);
        let result = r.route(b"page", None).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::Fast);
        assert_eq!(*vision.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_forced_vision_propagates_errors() {
        let vision = ScriptedVision::new(VisionScript::Fail);
        let r = router(EngineOutput::new("ok", 99.0), Some(vision), false);
        assert!(r.route(b"page", Some(EngineChoice::Vision)).await.is_err());

        let hang = ScriptedVision::new(VisionScript::Hang);
        let r = router(EngineOutput::new("ok", 99.0), Some(hang), true);
        assert!(matches!(
            r.route(b"page", Some(EngineChoice::Vision)).await,
            Err(Error::RecognitionTimeout(50))
        ));

        let r = router(EngineOutput::new("ok", 99.0), None, true);
        assert!(r.route(b"page", Some(EngineChoice::Vision)).await.is_err());
    }

    #[test]
    fn test_classify_uses_thresholds() {
        let r = router(EngineOutput::new("", 0.0), None, true);
        let mid = EngineOutput::new("c".repeat(120), 78.0);
        assert_eq!(r.classify(&mid, b"not an image"), Complexity::Simple);
        let low = EngineOutput::new("c".repeat(400), 69.0);
        assert_eq!(r.classify(&low, b""), Complexity::Complex);
        let sparse = EngineOutput::new("c".repeat(49), 80.0);
        assert_eq!(r.classify(&sparse, b""), Complexity::Complex);
    }

    #[test]
    fn test_merge_lines_removes_exact_duplicates() {
        assert_eq!(merge_lines("a\nb", "b\nc\na"), "a\nb\nc");
        assert_eq!(merge_lines("", "x"), "x");
    }
}

//! Page-image orientation correction.
//!
//! Correction is best-effort: every entry point returns the original bytes
//! when decoding, rotating, or re-encoding fails.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{MemorySnapshot, OrientationConfig, Result};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Buffers shorter than this cannot hold a decodable image header.
const MIN_IMAGE_BYTES: usize = 16;

/// Result of a secondary orientation detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationDetection {
    /// Clockwise rotation needed to make the page upright: 0, 90, 180, or 270.
    pub angle: u32,
    pub script: String,
    /// 0–100.
    pub confidence: f64,
}

impl OrientationDetection {
    pub fn unknown() -> Self {
        Self {
            angle: 0,
            script: "unknown".to_string(),
            confidence: 0.0,
        }
    }
}

/// Secondary orientation/script detector, used when no EXIF hint exists.
#[async_trait]
pub trait OrientationDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<OrientationDetection>;
}

/// Builds the detector on first use.
pub type DetectorFactory = Box<dyn Fn() -> Result<Arc<dyn OrientationDetector>> + Send + Sync>;

/// Output of [`OrientationCorrector::auto_orient`].
#[derive(Debug)]
pub struct AutoOriented<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub had_embedded_orientation: bool,
}

/// Normalizes page rotation ahead of recognition.
pub struct OrientationCorrector {
    config: OrientationConfig,
    factory: Option<DetectorFactory>,
    detector: OnceCell<Option<Arc<dyn OrientationDetector>>>,
}

impl OrientationCorrector {
    /// Corrector that only honours embedded orientation tags.
    pub fn new(config: OrientationConfig) -> Self {
        Self {
            config,
            factory: None,
            detector: OnceCell::new(),
        }
    }

    /// Corrector with a lazily constructed secondary detector.
    pub fn with_detector(config: OrientationConfig, factory: DetectorFactory) -> Self {
        Self {
            config,
            factory: Some(factory),
            detector: OnceCell::new(),
        }
    }

    /// Whether the image carries an EXIF orientation tag in the valid range 1–8.
    pub fn has_embedded_orientation(bytes: &[u8]) -> bool {
        embedded_orientation(bytes).is_some()
    }

    /// Apply the embedded rotation and strip the tag by re-encoding.
    ///
    /// Never fails: on any error the original bytes come back untouched with
    /// `had_embedded_orientation = false`.
    pub fn auto_orient(bytes: &[u8]) -> AutoOriented<'_> {
        match apply_embedded_orientation(bytes) {
            Ok(Some(oriented)) => AutoOriented {
                bytes: Cow::Owned(oriented),
                had_embedded_orientation: true,
            },
            Ok(None) => AutoOriented {
                bytes: Cow::Borrowed(bytes),
                had_embedded_orientation: false,
            },
            Err(e) => {
                debug!("auto_orient left image unchanged: {}", e);
                AutoOriented {
                    bytes: Cow::Borrowed(bytes),
                    had_embedded_orientation: false,
                }
            }
        }
    }

    /// Rotate clockwise by 0, 90, 180, or 270 degrees.
    ///
    /// Zero, unsupported angles, and failures return the input buffer itself.
    pub fn rotate(bytes: &[u8], degrees: u32) -> Cow<'_, [u8]> {
        if degrees == 0 {
            return Cow::Borrowed(bytes);
        }
        if !matches!(degrees, 90 | 180 | 270) {
            warn!(degrees, "Ignoring unsupported rotation angle");
            return Cow::Borrowed(bytes);
        }
        match rotate_image(bytes, degrees) {
            Ok(rotated) => Cow::Owned(rotated),
            Err(e) => {
                warn!(degrees, "Rotation failed, keeping original: {}", e);
                Cow::Borrowed(bytes)
            }
        }
    }

    /// Run the secondary detector. Failures report `{0, "unknown", 0}`.
    pub async fn detect_orientation(&self, bytes: &[u8]) -> OrientationDetection {
        let Some(detector) = self.detector().await else {
            return OrientationDetection::unknown();
        };
        match detector.detect(bytes).await {
            Ok(detection) if matches!(detection.angle, 0 | 90 | 180 | 270) => detection,
            Ok(detection) => {
                warn!(angle = detection.angle, "Detector returned a non-right angle");
                OrientationDetection::unknown()
            }
            Err(e) => {
                warn!("Orientation detection failed: {}", e);
                OrientationDetection::unknown()
            }
        }
    }

    /// Secondary detection, gated on the feature flag, a multi-page scanned
    /// source, and the absence of an embedded tag.
    pub async fn conditional_secondary_detection<'a>(
        &self,
        bytes: Cow<'a, [u8]>,
        is_multi_page_scan: bool,
        had_embedded_orientation: bool,
    ) -> Cow<'a, [u8]> {
        if !self.config.secondary_detection_enabled
            || !is_multi_page_scan
            || had_embedded_orientation
        {
            return bytes;
        }

        let detection = self.detect_orientation(&bytes).await;
        if detection.angle != 0 && detection.confidence > self.config.min_rotation_confidence {
            info!(
                angle = detection.angle,
                script = %detection.script,
                confidence = detection.confidence,
                "Applying detected page rotation"
            );
            match Self::rotate(&bytes, detection.angle) {
                Cow::Owned(rotated) => Cow::Owned(rotated),
                Cow::Borrowed(_) => bytes,
            }
        } else {
            bytes
        }
    }

    /// Full correction: embedded tag first, then the optional secondary pass.
    pub async fn correct<'a>(&self, bytes: &'a [u8], is_multi_page_scan: bool) -> Cow<'a, [u8]> {
        let oriented = Self::auto_orient(bytes);
        self.conditional_secondary_detection(
            oriented.bytes,
            is_multi_page_scan,
            oriented.had_embedded_orientation,
        )
        .await
    }

    async fn detector(&self) -> Option<Arc<dyn OrientationDetector>> {
        let factory = self.factory.as_ref()?;
        self.detector
            .get_or_init(|| async {
                let before = MemorySnapshot::capture();
                let detector = match factory() {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Secondary orientation detector unavailable: {}", e);
                        return None;
                    }
                };
                let after = MemorySnapshot::capture();
                let growth_mb = after.rss_mb().saturating_sub(before.rss_mb());
                if growth_mb > self.config.detector_memory_budget_mb {
                    warn!(
                        growth_mb,
                        budget_mb = self.config.detector_memory_budget_mb,
                        "Orientation detector exceeded its memory budget"
                    );
                } else {
                    debug!(growth_mb, "Orientation detector initialized");
                }
                Some(detector)
            })
            .await
            .clone()
    }
}

fn embedded_orientation(bytes: &[u8]) -> Option<Orientation> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return None;
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let mut decoder = reader.into_decoder().ok()?;
    let exif = decoder.exif_metadata().ok()??;
    Orientation::from_exif_chunk(&exif)
}

fn apply_embedded_orientation(bytes: &[u8]) -> image::ImageResult<Option<Vec<u8>>> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Ok(None);
    }
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let Some(format) = reader.format() else {
        return Ok(None);
    };
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder
        .exif_metadata()?
        .as_deref()
        .and_then(Orientation::from_exif_chunk);
    let Some(orientation) = orientation else {
        return Ok(None);
    };

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    encode(&img, format).map(Some)
}

fn rotate_image(bytes: &[u8], degrees: u32) -> image::ImageResult<Vec<u8>> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    let rotated = match degrees {
        90 => img.rotate90(),
        180 => img.rotate180(),
        _ => img.rotate270(),
    };
    encode(&rotated, format)
}

fn encode(img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut cursor, format)?;
    } else {
        img.write_to(&mut cursor, format)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 40) as u8, (y * 40) as u8, 128])
        }));
        encode(&img, ImageFormat::Png).unwrap()
    }

    fn dims(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    struct FixedDetector {
        detection: OrientationDetection,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OrientationDetector for FixedDetector {
        async fn detect(&self, _image: &[u8]) -> Result<OrientationDetection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detection.clone())
        }
    }

    fn enabled() -> OrientationConfig {
        OrientationConfig {
            secondary_detection_enabled: true,
            ..Default::default()
        }
    }

    fn corrector_with(angle: u32, confidence: f64, calls: Arc<AtomicUsize>) -> OrientationCorrector {
        OrientationCorrector::with_detector(
            enabled(),
            Box::new(move || {
                Ok(Arc::new(FixedDetector {
                    detection: OrientationDetection {
                        angle,
                        script: "Latin".into(),
                        confidence,
                    },
                    calls: calls.clone(),
                }) as Arc<dyn OrientationDetector>)
            }),
        )
    }

    #[test]
    fn test_embedded_orientation_on_garbage() {
        assert!(!OrientationCorrector::has_embedded_orientation(&[]));
        assert!(!OrientationCorrector::has_embedded_orientation(&[0xFF, 0xD8]));
        assert!(!OrientationCorrector::has_embedded_orientation(&[7u8; 512]));
        assert!(!OrientationCorrector::has_embedded_orientation(&png(4, 2)));
    }

    /// JPEG with an APP1 EXIF segment carrying only the orientation tag.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            image::Rgb([(x * 5) as u8, 60, 200])
        }));
        let plain = encode(&img, ImageFormat::Jpeg).unwrap();

        let mut tiff = vec![b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&orientation.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);
        let mut out = plain[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&plain[2..]);
        out
    }

    #[test]
    fn test_exif_tagged_jpeg_is_rotated_and_untagged() {
        let tagged = jpeg_with_orientation(40, 20, 6);
        assert!(OrientationCorrector::has_embedded_orientation(&tagged));

        let out = OrientationCorrector::auto_orient(&tagged);
        assert!(out.had_embedded_orientation);
        assert_eq!(dims(&out.bytes), (20, 40));
        assert!(!OrientationCorrector::has_embedded_orientation(&out.bytes));
    }

    #[test]
    fn test_exif_orientation_outside_range_is_ignored() {
        let tagged = jpeg_with_orientation(40, 20, 9);
        assert!(!OrientationCorrector::has_embedded_orientation(&tagged));
        let out = OrientationCorrector::auto_orient(&tagged);
        assert!(!out.had_embedded_orientation);
        assert_eq!(out.bytes.as_ref(), tagged.as_slice());
    }

    #[test]
    fn test_auto_orient_never_fails() {
        for input in [Vec::new(), vec![1, 2, 3], vec![0xFF; 4096], png(3, 5)] {
            let out = OrientationCorrector::auto_orient(&input);
            assert!(!out.had_embedded_orientation);
            assert_eq!(out.bytes.as_ref(), input.as_slice());
        }
    }

    #[test]
    fn test_rotate_zero_returns_same_buffer() {
        let img = png(4, 2);
        let out = OrientationCorrector::rotate(&img, 0);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ptr(), img.as_ptr());
    }

    #[test]
    fn test_rotate_quarter_turns_swap_dimensions() {
        let img = png(4, 2);
        assert_eq!(dims(&OrientationCorrector::rotate(&img, 90)), (2, 4));
        assert_eq!(dims(&OrientationCorrector::rotate(&img, 270)), (2, 4));
        assert_eq!(dims(&OrientationCorrector::rotate(&img, 180)), (4, 2));
    }

    #[test]
    fn test_rotate_rejects_invalid_angles_and_garbage() {
        let img = png(4, 2);
        for degrees in [45, 91, 360, 720] {
            let out = OrientationCorrector::rotate(&img, degrees);
            assert!(matches!(out, Cow::Borrowed(_)));
        }
        let garbage = vec![9u8; 64];
        assert_eq!(OrientationCorrector::rotate(&garbage, 90).as_ref(), garbage.as_slice());
    }

    #[tokio::test]
    async fn test_secondary_detection_applies_confident_rotation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let corrector = corrector_with(90, 80.0, calls.clone());
        let img = png(4, 2);
        let out = corrector.correct(&img, true).await;
        assert_eq!(dims(&out), (2, 4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secondary_detection_skips_low_confidence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let corrector = corrector_with(180, 50.0, calls.clone());
        let img = png(4, 2);
        let out = corrector.correct(&img, true).await;
        assert_eq!(out.as_ref(), img.as_slice());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secondary_detection_gating() {
        let calls = Arc::new(AtomicUsize::new(0));
        let corrector = corrector_with(90, 99.0, calls.clone());
        let img = png(4, 2);

        // Not a multi-page scan.
        let out = corrector.correct(&img, false).await;
        assert_eq!(out.as_ref(), img.as_slice());

        // Embedded orientation already handled.
        let out = corrector
            .conditional_secondary_detection(Cow::Borrowed(&img), true, true)
            .await;
        assert_eq!(out.as_ref(), img.as_slice());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Feature flag off.
        let disabled = OrientationCorrector::new(OrientationConfig::default());
        let out = disabled.correct(&img, true).await;
        assert_eq!(out.as_ref(), img.as_slice());
    }

    #[tokio::test]
    async fn test_detector_built_once_and_failures_default() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let corrector = OrientationCorrector::with_detector(
            enabled(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(docflow_core::Error::Recognition("no osd data".into()))
            }),
        );
        let img = png(2, 2);
        assert_eq!(corrector.detect_orientation(&img).await, OrientationDetection::unknown());
        assert_eq!(corrector.detect_orientation(&img).await, OrientationDetection::unknown());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}

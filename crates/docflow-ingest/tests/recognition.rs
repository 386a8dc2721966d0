use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{Error, OrientationConfig, Result, RouterConfig};
use docflow_ingest::{ExtractionOptions, ExtractionProvider, FileExtractor};
use docflow_vision::{
    EngineChoice, EngineOutput, OrientationCorrector, OrientationDetection, OrientationDetector,
    RecognitionEngine, RecognitionRouter, VisionEngine,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

struct FixedFast(EngineOutput);

#[async_trait]
impl RecognitionEngine for FixedFast {
    fn name(&self) -> &str {
        "fixed-fast"
    }

    async fn recognize(&self, _image: &[u8]) -> Result<EngineOutput> {
        Ok(self.0.clone())
    }
}

struct CountingVision {
    output: EngineOutput,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionEngine for CountingVision {
    fn name(&self) -> &str {
        "counting-vision"
    }

    async fn extract(&self, _image: &[u8]) -> Result<EngineOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn extractor(fast: EngineOutput, vision: Arc<CountingVision>) -> FileExtractor {
    let router = RecognitionRouter::new(
        RouterConfig {
            vision_enabled: true,
            ..Default::default()
        },
        Arc::new(FixedFast(fast)),
        Some(vision as Arc<dyn VisionEngine>),
    );
    FileExtractor::new(
        Arc::new(OrientationCorrector::new(OrientationConfig::default())),
        Arc::new(router),
    )
}

const INVOICE_TEXT: &str = "ACME Supplies\n\
    Invoice Number: INV-2024-0042\n\
    Email: billing@acme.example\n\
    Date: 03/14/2024\n\
    Total: $1,250.00\n\
    Thank you for your business. Payment is due within thirty days of the \
    invoice date. Please include the invoice number with your remittance.";

#[tokio::test]
async fn test_clean_scan_stays_on_fast_engine_with_fields() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("invoice.png");
    std::fs::write(&path, png(60, 40)).unwrap();

    let vision = Arc::new(CountingVision {
        output: EngineOutput::new("unused", 80.0),
        calls: AtomicUsize::new(0),
    });
    let result = extractor(EngineOutput::new(INVOICE_TEXT, 92.0), vision.clone())
        .extract_from_path(&path, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.metadata["engineUsed"], "fast");
    assert_eq!(result.metadata["recognitionConfidence"], 92.0);
    assert_eq!(result.metadata["fileType"], "image");
    assert_eq!(result.page_count(), 1);
    assert_eq!(result.pages[0].confidence, 92.0);

    let structured = result.metadata["structuredData"].as_array().unwrap();
    assert_eq!(structured.len(), 1);
    let email = &structured[0]["data"]["fields"]["Email"];
    assert_eq!(email["value"], "billing@acme.example");
    assert_eq!(email["source"], "recognition_assisted");
}

#[tokio::test]
async fn test_poor_scan_escalates_to_vision() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("receipt.png");
    std::fs::write(&path, png(60, 40)).unwrap();

    let vision = Arc::new(CountingVision {
        output: EngineOutput::new(INVOICE_TEXT, 82.0),
        calls: AtomicUsize::new(0),
    });
    let result = extractor(EngineOutput::new("ACME ~~ S#pp", 35.0), vision.clone())
        .extract_from_path(&path, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.metadata["engineUsed"], "vision");
    assert_eq!(result.text, INVOICE_TEXT);
}

#[tokio::test]
async fn test_forced_fast_engine_skips_classification() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("scan.png");
    std::fs::write(&path, png(20, 20)).unwrap();

    let vision = Arc::new(CountingVision {
        output: EngineOutput::new(INVOICE_TEXT, 82.0),
        calls: AtomicUsize::new(0),
    });
    let options = ExtractionOptions {
        force_engine: Some(EngineChoice::Fast),
        skip_fields: true,
        ..Default::default()
    };
    let result = extractor(EngineOutput::new("faint", 20.0), vision.clone())
        .extract_from_path(&path, &options)
        .await
        .unwrap();

    assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.metadata["engineUsed"], "fast");
    assert!(result.metadata.get("structuredData").is_none());
}

struct CountingFast {
    output: EngineOutput,
    calls: AtomicUsize,
}

#[async_trait]
impl RecognitionEngine for CountingFast {
    fn name(&self) -> &str {
        "counting-fast"
    }

    async fn recognize(&self, _image: &[u8]) -> Result<EngineOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

#[derive(Default)]
struct CountingDetector {
    calls: AtomicUsize,
}

#[async_trait]
impl OrientationDetector for CountingDetector {
    async fn detect(&self, _image: &[u8]) -> Result<OrientationDetection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OrientationDetection {
            angle: 0,
            script: "Latin".into(),
            confidence: 95.0,
        })
    }
}

fn pdf_extractor(fast: Arc<CountingFast>, detector: Arc<CountingDetector>) -> FileExtractor {
    let router = RecognitionRouter::new(
        RouterConfig::default(),
        fast as Arc<dyn RecognitionEngine>,
        None,
    );
    let corrector = OrientationCorrector::with_detector(
        OrientationConfig {
            secondary_detection_enabled: true,
            ..Default::default()
        },
        Box::new(move || Ok(detector.clone() as Arc<dyn OrientationDetector>)),
    );
    FileExtractor::new(Arc::new(corrector), Arc::new(router))
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

enum TestPage {
    Text(&'static str),
    Scan,
}

/// A PDF whose scanned pages each hold one 60x40 JPEG.
fn build_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let (resources, operations) = match page {
            TestPage::Text(text) => (
                dictionary! { "Font" => dictionary! { "F1" => font_id } },
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            ),
            TestPage::Scan => {
                let image_id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 60,
                        "Height" => 40,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8,
                        "Filter" => "DCTDecode",
                    },
                    jpeg(60, 40),
                ));
                (
                    dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
                    vec![
                        Operation::new("q", vec![]),
                        Operation::new(
                            "cm",
                            vec![
                                540.into(),
                                0.into(),
                                0.into(),
                                360.into(),
                                28.into(),
                                400.into(),
                            ],
                        ),
                        Operation::new("Do", vec!["Im1".into()]),
                        Operation::new("Q", vec![]),
                    ],
                )
            }
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            Content { operations }.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

const REPORT_TEXT: &str = "Quarterly report for the northern region";

#[tokio::test]
async fn test_scanned_pdf_recognizes_every_page_as_multi_page_scan() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("batch.pdf");
    std::fs::write(&path, build_pdf(&[TestPage::Scan, TestPage::Scan])).unwrap();

    let fast = Arc::new(CountingFast {
        output: EngineOutput::new(INVOICE_TEXT, 91.0),
        calls: AtomicUsize::new(0),
    });
    let detector = Arc::new(CountingDetector::default());
    let result = pdf_extractor(fast.clone(), detector.clone())
        .extract_from_path(&path, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(fast.calls.load(Ordering::SeqCst), 2);
    // Two scanned pages make the file a multi-page scan without any caller hint.
    assert_eq!(detector.calls.load(Ordering::SeqCst), 2);

    assert_eq!(result.metadata["fileType"], "pdf");
    assert_eq!(result.metadata["pageCount"], 2);
    assert_eq!(result.metadata["engineUsed"], "fast");
    assert_eq!(result.metadata["recognitionConfidence"], 91.0);
    let recognized = result.metadata["recognizedPages"].as_array().unwrap();
    assert_eq!(recognized.len(), 2);
    assert_eq!(recognized[1]["pageNumber"], 2);

    assert_eq!(result.page_count(), 2);
    assert_eq!(result.pages[1].page_number, 2);
    assert_eq!(result.pages[1].text, INVOICE_TEXT);
    assert_eq!(result.pages[1].confidence, 91.0);

    let structured = result.metadata["structuredData"].as_array().unwrap();
    assert_eq!(structured.len(), 2);
    for page in structured {
        assert_eq!(page["data"]["fields"]["Email"]["source"], "recognition_assisted");
    }
}

#[tokio::test]
async fn test_pdf_text_layer_is_native_and_single_scan_skips_detection() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("report.pdf");
    std::fs::write(&path, build_pdf(&[TestPage::Text(REPORT_TEXT), TestPage::Scan])).unwrap();

    let fast = Arc::new(CountingFast {
        output: EngineOutput::new(INVOICE_TEXT, 88.0),
        calls: AtomicUsize::new(0),
    });
    let detector = Arc::new(CountingDetector::default());
    let result = pdf_extractor(fast.clone(), detector.clone())
        .extract_from_path(&path, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(fast.calls.load(Ordering::SeqCst), 1);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);

    assert_eq!(result.page_count(), 2);
    assert!(result.pages[0].text.contains("Quarterly report"));
    assert_eq!(result.pages[0].confidence, 100.0);
    assert_eq!(result.pages[1].confidence, 88.0);

    let recognized = result.metadata["recognizedPages"].as_array().unwrap();
    assert_eq!(recognized.len(), 1);
    assert_eq!(recognized[0]["pageNumber"], 2);
}

#[tokio::test]
async fn test_text_only_extractor_reads_text_pdf_but_rejects_scans() {
    let dir = tempfile::TempDir::new().unwrap();
    let text_pdf = dir.path().join("text.pdf");
    std::fs::write(&text_pdf, build_pdf(&[TestPage::Text(REPORT_TEXT)])).unwrap();
    let result = FileExtractor::text_only()
        .extract_from_path(&text_pdf, &ExtractionOptions::default())
        .await
        .unwrap();
    assert_eq!(result.page_count(), 1);
    assert!(result.metadata.get("engineUsed").is_none());

    let scan_pdf = dir.path().join("scan.pdf");
    std::fs::write(&scan_pdf, build_pdf(&[TestPage::Scan])).unwrap();
    let err = FileExtractor::text_only()
        .extract_from_path(&scan_pdf, &ExtractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Extraction(_)));
}

//! File text extraction for various formats.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{Error, ExtractionResult, Page, Result};
use docflow_fields::extract_structured_data;
use docflow_vision::{
    EngineChoice, EngineKind, OrientationCorrector, RecognitionResult, RecognitionRouter,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::pdf;
use crate::traits::{ExtractionOptions, ExtractionProvider};

/// Page break marker in plain-text exports.
const FORM_FEED: char = '\x0c';

/// Supported file types for text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    PlainText,
    Markdown,
    Code,
    Json,
    Image,
    Pdf,
    Unknown,
}

impl FileType {
    /// Detect file type from extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "log" | "csv" => Self::PlainText,
            "md" | "mdx" => Self::Markdown,
            "py" | "js" | "ts" | "tsx" | "jsx" | "rs" | "go" | "java" | "cpp" | "c" | "h"
            | "hpp" | "cs" | "rb" | "php" | "sh" | "yaml" | "yml" | "toml" | "ini" | "xml"
            | "html" | "css" | "sql" => Self::Code,
            "json" => Self::Json,
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "webp" | "gif" => Self::Image,
            "pdf" => Self::Pdf,
            _ => Self::Unknown,
        }
    }

    /// Extension first, mime type as a fallback.
    pub fn detect(path: &Path, mime_type: &str) -> Self {
        let from_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown);
        if from_ext != Self::Unknown {
            return from_ext;
        }
        match mime_type {
            m if m.starts_with("image/") => Self::Image,
            "application/json" => Self::Json,
            "text/markdown" => Self::Markdown,
            "application/pdf" => Self::Pdf,
            m if m.starts_with("text/") => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Json => "json",
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Unknown => "unknown",
        }
    }
}

/// Default extraction collaborator.
///
/// Text formats are read directly at confidence 100. Images go through
/// orientation correction and then the recognition router. PDFs are read
/// page by page: pages with a text layer are taken as is, scanned pages are
/// recognized like images.
pub struct FileExtractor {
    recognition: Option<(Arc<OrientationCorrector>, Arc<RecognitionRouter>)>,
}

/// A page whose text came from a recognition engine.
#[derive(Debug, Clone, Copy)]
struct RecognizedPage {
    page_number: u32,
    engine: EngineKind,
    confidence: f64,
}

impl FileExtractor {
    pub fn new(corrector: Arc<OrientationCorrector>, router: Arc<RecognitionRouter>) -> Self {
        Self {
            recognition: Some((corrector, router)),
        }
    }

    /// Extractor that rejects images and scanned PDF pages.
    pub fn text_only() -> Self {
        Self { recognition: None }
    }

    fn recognizers(&self) -> Result<(&OrientationCorrector, &RecognitionRouter)> {
        self.recognition
            .as_ref()
            .map(|(corrector, router)| (corrector.as_ref(), router.as_ref()))
            .ok_or_else(|| Error::Extraction("image input needs a recognition router".into()))
    }

    async fn recognize_image(
        &self,
        bytes: &[u8],
        multi_page_scan: bool,
        force: Option<EngineChoice>,
    ) -> Result<RecognitionResult> {
        let (corrector, router) = self.recognizers()?;
        let oriented = corrector.correct(bytes, multi_page_scan).await;
        router.route(&oriented, force).await
    }

    async fn extract_image(
        &self,
        bytes: &[u8],
        options: &ExtractionOptions,
    ) -> Result<(Vec<Page>, Vec<RecognizedPage>)> {
        let result = self
            .recognize_image(bytes, options.multi_page_scan, options.force_engine)
            .await?;
        info!(
            engine = %result.engine_used,
            confidence = result.confidence,
            "Recognized page image"
        );
        let recognized = vec![RecognizedPage {
            page_number: 1,
            engine: result.engine_used,
            confidence: result.confidence,
        }];
        let pages = vec![Page {
            page_number: 1,
            text: result.text,
            confidence: result.confidence,
        }];
        Ok((pages, recognized))
    }

    async fn extract_pdf(
        &self,
        bytes: Vec<u8>,
        options: &ExtractionOptions,
    ) -> Result<(Vec<Page>, Vec<RecognizedPage>)> {
        let pdf_pages = tokio::task::spawn_blocking(move || pdf::load_pages(&bytes))
            .await
            .map_err(|e| Error::Extraction(format!("PDF loader failed: {}", e)))??;

        let scanned = pdf_pages.iter().filter(|p| p.is_scanned()).count();
        if scanned > 0 {
            self.recognizers()?;
        }
        // More than one scanned page means the file came off a scanner feed.
        let multi_page_scan = options.multi_page_scan || scanned > 1;
        debug!(
            pages = pdf_pages.len(),
            scanned, multi_page_scan, "Loaded PDF"
        );

        let mut pages = Vec::with_capacity(pdf_pages.len());
        let mut recognized = Vec::with_capacity(scanned);
        for page in pdf_pages {
            if !page.is_scanned() {
                pages.push(Page {
                    page_number: page.number,
                    text: page.text,
                    confidence: 100.0,
                });
                continue;
            }

            let mut texts = Vec::with_capacity(page.images.len());
            let mut confidence_sum = 0.0;
            let mut engine: Option<EngineKind> = None;
            for image in &page.images {
                let result = self
                    .recognize_image(image, multi_page_scan, options.force_engine)
                    .await?;
                engine = Some(match engine {
                    Some(prev) if prev != result.engine_used => EngineKind::Hybrid,
                    _ => result.engine_used,
                });
                confidence_sum += result.confidence;
                if !result.text.trim().is_empty() {
                    texts.push(result.text);
                }
            }
            let confidence = confidence_sum / page.images.len() as f64;
            let engine = engine.unwrap_or(EngineKind::Fast);
            info!(
                page = page.number,
                engine = %engine,
                confidence,
                "Recognized scanned PDF page"
            );

            recognized.push(RecognizedPage {
                page_number: page.number,
                engine,
                confidence,
            });
            pages.push(Page {
                page_number: page.number,
                text: texts.join("\n\n"),
                confidence,
            });
        }
        Ok((pages, recognized))
    }
}

fn recognition_metadata(meta: &mut Map<String, Value>, recognized: &[RecognizedPage]) {
    let Some(first) = recognized.first() else {
        return;
    };
    let engine = if recognized.iter().all(|r| r.engine == first.engine) {
        first.engine.as_str()
    } else {
        "mixed"
    };
    let mean = recognized.iter().map(|r| r.confidence).sum::<f64>() / recognized.len() as f64;
    meta.insert("engineUsed".into(), json!(engine));
    meta.insert("recognitionConfidence".into(), json!(mean));
    meta.insert(
        "recognizedPages".into(),
        Value::Array(
            recognized
                .iter()
                .map(|r| {
                    json!({
                        "pageNumber": r.page_number,
                        "engineUsed": r.engine.as_str(),
                        "confidence": r.confidence,
                    })
                })
                .collect(),
        ),
    );
}

#[async_trait]
impl ExtractionProvider for FileExtractor {
    async fn extract_from_path(
        &self,
        path: &Path,
        options: &ExtractionOptions,
    ) -> Result<ExtractionResult> {
        let file_type = FileType::detect(path, &options.mime_type);
        debug!("Extracting {} as {}", path.display(), file_type.as_str());

        let (pages, recognized) = match file_type {
            FileType::PlainText | FileType::Markdown | FileType::Code => {
                let content = tokio::fs::read_to_string(path).await?;
                (split_pages(&content), Vec::new())
            }
            FileType::Json => {
                let content = tokio::fs::read_to_string(path).await?;
                (split_pages(&flatten_json(&content)), Vec::new())
            }
            FileType::Image => {
                let bytes = tokio::fs::read(path).await?;
                self.extract_image(&bytes, options).await?
            }
            FileType::Pdf => {
                let bytes = tokio::fs::read(path).await?;
                self.extract_pdf(bytes, options).await?
            }
            FileType::Unknown => {
                let bytes = tokio::fs::read(path).await?;
                match String::from_utf8(bytes) {
                    Ok(content) if !looks_binary(&content) => (split_pages(&content), Vec::new()),
                    _ => {
                        return Err(Error::Extraction(format!(
                            "unrecognized binary file: {}",
                            path.display()
                        )))
                    }
                }
            }
        };

        let mut meta = Map::new();
        recognition_metadata(&mut meta, &recognized);
        meta.insert("fileType".into(), json!(file_type.as_str()));
        meta.insert("pageCount".into(), json!(pages.len()));
        if !options.filename.is_empty() {
            meta.insert("filename".into(), json!(options.filename));
        }

        if !options.skip_fields {
            let per_page: Vec<Value> = pages
                .iter()
                .filter_map(|page| {
                    let mut data = extract_structured_data(&page.text, page.confidence);
                    if data.is_empty() {
                        return None;
                    }
                    if recognized.iter().any(|r| r.page_number == page.page_number) {
                        data.mark_recognition_assisted();
                    }
                    Some(json!({ "pageNumber": page.page_number, "data": data }))
                })
                .collect();
            meta.insert("structuredData".into(), Value::Array(per_page));
        }

        Ok(ExtractionResult::from_pages(pages, Value::Object(meta)))
    }
}

/// Split on form feeds into 1-based pages. Blank pages are kept so numbering
/// matches the source.
fn split_pages(content: &str) -> Vec<Page> {
    content
        .split(FORM_FEED)
        .enumerate()
        .map(|(i, text)| Page {
            page_number: i as u32 + 1,
            text: text.trim_end().to_string(),
            confidence: 100.0,
        })
        .collect()
}

fn looks_binary(content: &str) -> bool {
    let control = content
        .chars()
        .filter(|c| c.is_control() && !matches!(*c, '\n' | '\r' | '\t' | FORM_FEED))
        .count();
    control > content.len() / 10
}

/// Render JSON as `path: value` lines. Non-JSON content is returned as is.
fn flatten_json(content: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return content.to_string();
    };
    let mut lines = Vec::new();
    flatten_into(&value, String::new(), &mut lines);
    lines.join("\n")
}

fn flatten_into(value: &Value, path: String, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_into(v, child, lines);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, format!("{}[{}]", path, i), lines);
            }
        }
        Value::Null => {}
        Value::String(s) if path.is_empty() => lines.push(s.clone()),
        Value::String(s) => lines.push(format!("{}: {}", path, s)),
        other if path.is_empty() => lines.push(other.to_string()),
        other => lines.push(format!("{}: {}", path, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_extension("MD"), FileType::Markdown);
        assert_eq!(FileType::from_extension("jpeg"), FileType::Image);
        assert_eq!(FileType::detect(Path::new("upload"), "image/png"), FileType::Image);
        assert_eq!(FileType::detect(Path::new("a.txt"), "image/png"), FileType::PlainText);
    }

    #[test]
    fn test_split_pages_on_form_feed() {
        let pages = split_pages("one\n\x0ctwo\x0c\x0cfour");
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0].text, "one");
        assert_eq!(pages[2].text, "");
        assert_eq!(pages[3].page_number, 4);
    }

    #[test]
    fn test_flatten_json() {
        let text = flatten_json(r#"{"customer":{"name":"Ann","email":"ann@example.com"},"items":[{"qty":2}],"note":null}"#);
        assert_eq!(
            text,
            "customer.email: ann@example.com\ncustomer.name: Ann\nitems[0].qty: 2"
        );
        assert_eq!(flatten_json("not json"), "not json");
    }

    #[tokio::test]
    async fn test_extract_text_file_with_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("letter.txt");
        std::fs::write(&path, "Email: ann@example.com\n\x0cPage two").unwrap();

        let result = FileExtractor::text_only()
            .extract_from_path(&path, &ExtractionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.page_count(), 2);
        assert_eq!(result.metadata["fileType"], "text");
        let fields = result.metadata["structuredData"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0]["pageNumber"], 1);
        assert_eq!(fields[0]["data"]["fields"]["Email"]["value"], "ann@example.com");
    }

    #[tokio::test]
    async fn test_text_only_rejects_images_and_pdf() {
        let dir = tempfile::TempDir::new().unwrap();
        let img = dir.path().join("scan.png");
        std::fs::write(&img, b"\x89PNG").unwrap();
        let err = FileExtractor::text_only()
            .extract_from_path(&img, &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));

        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();
        assert!(FileExtractor::text_only()
            .extract_from_path(&pdf, &ExtractionOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = FileExtractor::text_only()
            .extract_from_path(Path::new("/nonexistent/file.txt"), &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

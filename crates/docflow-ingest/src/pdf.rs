//! PDF page loading via lopdf.
//!
//! Each page yields its text layer plus any embedded raster images the
//! recognizer can decode. Pages whose text layer is too thin are treated as
//! scans.

use std::io::Cursor;

use docflow_core::{Error, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// A text layer shorter than this (after trimming) does not count as native text.
const MIN_NATIVE_TEXT_CHARS: usize = 16;

/// Guards against cyclic Parent chains in malformed files.
const MAX_PARENT_DEPTH: usize = 32;

/// One page of a loaded PDF.
#[derive(Debug, Clone, Default)]
pub struct PdfPage {
    /// 1-based, in document order.
    pub number: u32,
    pub text: String,
    /// Encoded images (JPEG or PNG) found on the page.
    pub images: Vec<Vec<u8>>,
}

impl PdfPage {
    /// The page needs recognition: it carries images and no usable text layer.
    pub fn is_scanned(&self) -> bool {
        !self.images.is_empty() && self.text.trim().chars().count() < MIN_NATIVE_TEXT_CHARS
    }
}

/// Load every page of a PDF in order.
pub fn load_pages(bytes: &[u8]) -> Result<Vec<PdfPage>> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| Error::Extraction(format!("failed to load PDF: {}", e)))?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(Error::Extraction("PDF has no pages".into()));
    }

    Ok(pages
        .iter()
        .map(|(&number, &page_id)| {
            let text = match doc.extract_text(&[number]) {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    debug!(page = number, "No text layer: {}", e);
                    String::new()
                }
            };
            PdfPage {
                number,
                text,
                images: page_images(&doc, page_id),
            }
        })
        .collect())
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).and_then(|o| o.as_dict().ok())
}

/// Resources are inheritable, so walk up the page tree until one is found.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        let resources = node.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r));
        if let Some(resources) = resources {
            return Some(resources);
        }
        node = node.get(b"Parent").ok().and_then(|p| resolve_dict(doc, p))?;
    }
    None
}

fn page_images(doc: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
    let Some(xobjects) = page_resources(doc, page_id)
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|x| resolve_dict(doc, x))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(name, obj)| {
            let stream = resolve(doc, obj)?.as_stream().ok()?;
            let subtype = stream.dict.get(b"Subtype").ok()?.as_name().ok()?;
            if subtype != b"Image" {
                return None;
            }
            let encoded = encode_image(stream);
            if encoded.is_none() {
                debug!(
                    xobject = %String::from_utf8_lossy(name),
                    "Skipping undecodable page image"
                );
            }
            encoded
        })
        .collect()
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// JPEG streams pass through as is. Raw or Flate 8-bit RGB and gray samples
/// are re-encoded as PNG. Anything else is skipped.
fn encode_image(stream: &lopdf::Stream) -> Option<Vec<u8>> {
    let filters = filters(&stream.dict);
    if filters.len() == 1 && filters[0] == b"DCTDecode" {
        return Some(stream.content.clone());
    }

    let samples = match filters.as_slice() {
        [] => stream.content.clone(),
        [f] if f == b"FlateDecode" => stream.decompressed_content().ok()?,
        _ => return None,
    };

    let width = dimension(&stream.dict, b"Width")?;
    let height = dimension(&stream.dict, b"Height")?;
    if stream.dict.get(b"BitsPerComponent").ok()?.as_i64().ok()? != 8 {
        return None;
    }

    let image = match stream.dict.get(b"ColorSpace").ok()?.as_name().ok()? {
        b"DeviceRGB" => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, samples)?),
        b"DeviceGray" => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, samples)?),
        _ => return None,
    };

    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .ok()?;
    Some(buf)
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    u32::try_from(dict.get(key).ok()?.as_i64().ok()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_garbage_is_extraction_error() {
        let err = load_pages(b"%PDF-1.7 truncated").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_scanned_needs_images_and_thin_text() {
        let blank = PdfPage {
            number: 1,
            ..Default::default()
        };
        assert!(!blank.is_scanned());

        let scan = PdfPage {
            number: 1,
            text: "p. 3".into(),
            images: vec![vec![0xFF, 0xD8]],
        };
        assert!(scan.is_scanned());

        let native = PdfPage {
            text: "A full paragraph of selectable text.".into(),
            ..scan.clone()
        };
        assert!(!native.is_scanned());
    }

    #[test]
    fn test_raw_gray_samples_become_png() {
        let stream = lopdf::Stream::new(
            lopdf::dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![128u8; 8],
        );
        let png = encode_image(&stream).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let short = lopdf::Stream::new(stream.dict.clone(), vec![0u8; 3]);
        assert!(encode_image(&short).is_none());
    }
}

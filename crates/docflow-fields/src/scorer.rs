//! Field confidence scoring and structured-data extraction.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::patterns::PatternType;
use crate::types::{ExtractedField, FieldSource};
use crate::validate::is_valid;

/// Glyph pairs that recognition commonly confuses.
const CONFUSABLE_PAIRS: &[&str] = &["|l", "l|", "l1", "1l", "O0", "0O"];

const COMMON_TLDS: &[&str] = &["com", "org", "net", "edu", "gov", "io"];

const MAX_LABEL_CHARS: usize = 40;

static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static PASSPORT_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,2}\d{7,8}$").unwrap());
static NATIONAL_ID_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{4}-\d{4}$").unwrap());

/// Score one match. `match_index` is the byte offset of `matched` in `full_text`.
///
/// Adjustments are applied in a fixed order: line start, confusable glyphs,
/// page confidence, type refinement, then the clamp to `[0, 100]`.
pub fn score(
    pattern_type: PatternType,
    matched: &str,
    match_index: usize,
    full_text: &str,
    page_confidence: f64,
) -> f64 {
    let mut confidence = pattern_type.base_confidence();

    if starts_line(full_text, match_index) {
        confidence += 5.0;
    }

    if CONFUSABLE_PAIRS.iter().any(|pair| matched.contains(pair)) {
        confidence -= 5.0;
    }

    // NaN counts as no confidence; infinities clamp to the range ends.
    let page_confidence = if page_confidence.is_nan() {
        0.0
    } else {
        page_confidence.clamp(0.0, 100.0)
    };
    confidence *= page_confidence / 100.0;

    confidence += refinement(pattern_type, matched);

    confidence.clamp(0.0, 100.0)
}

fn starts_line(text: &str, index: usize) -> bool {
    let Some(before) = text.get(..index) else {
        return false;
    };
    match before.trim_end_matches([' ', '\t']).chars().last() {
        None | Some('\n') | Some('\r') => true,
        Some(_) => false,
    }
}

fn refinement(pattern_type: PatternType, matched: &str) -> f64 {
    match pattern_type {
        PatternType::Email => {
            let mut adj = 0.0;
            let tld = matched.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
            if COMMON_TLDS.contains(&tld.as_str()) {
                adj += 3.0;
            }
            let local_len = matched.split('@').next().map_or(0, |l| l.chars().count());
            if local_len < 3 {
                adj -= 5.0;
            }
            adj
        }
        PatternType::Phone => {
            let mut adj = 0.0;
            if matched.trim_start().starts_with('+') {
                adj += 5.0;
            }
            if matched.chars().filter(|c| c.is_ascii_digit()).count() < 7 {
                adj -= 10.0;
            }
            adj
        }
        PatternType::Date if ISO_DATE_RE.is_match(matched) => 5.0,
        PatternType::Passport if PASSPORT_SHAPE_RE.is_match(matched) => 5.0,
        PatternType::NationalId if NATIONAL_ID_SHAPE_RE.is_match(matched) => 3.0,
        _ => 0.0,
    }
}

/// All fields found in one text, grouped by type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredData {
    /// Per-type matches, de-duplicated by exact value.
    pub matches: BTreeMap<PatternType, Vec<ExtractedField>>,
    /// `Label: value` pairs keyed by label.
    pub fields: BTreeMap<String, ExtractedField>,
}

impl StructuredData {
    pub fn field_count(&self) -> usize {
        self.matches.values().map(Vec::len).sum::<usize>() + self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    /// Tag every field as coming from recognized rather than native text.
    pub fn mark_recognition_assisted(&mut self) {
        for field in self
            .matches
            .values_mut()
            .flatten()
            .chain(self.fields.values_mut())
        {
            field.source = FieldSource::RecognitionAssisted;
        }
    }

    /// Mean confidence across all fields, `None` when nothing was found.
    pub fn mean_confidence(&self) -> Option<f64> {
        let all: Vec<f64> = self
            .matches
            .values()
            .flatten()
            .chain(self.fields.values())
            .map(|f| f.confidence)
            .collect();
        if all.is_empty() {
            None
        } else {
            Some(all.iter().sum::<f64>() / all.len() as f64)
        }
    }
}

/// Scan `text` for every known pattern and `Label: value` lines.
pub fn extract_structured_data(text: &str, page_confidence: f64) -> StructuredData {
    let mut data = StructuredData::default();

    for pattern_type in PatternType::SCANNED {
        let Some(re) = pattern_type.regex() else {
            continue;
        };
        let mut seen = HashSet::new();
        let found: Vec<ExtractedField> = re
            .find_iter(text)
            .filter(|m| seen.insert(m.as_str()))
            .map(|m| {
                field(
                    pattern_type,
                    m.as_str().trim(),
                    m.as_str(),
                    score(pattern_type, m.as_str(), m.start(), text, page_confidence),
                )
            })
            .collect();
        if !found.is_empty() {
            data.matches.insert(pattern_type, found);
        }
    }

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some((label, value)) = key_value(line) {
            if !data.fields.contains_key(label) {
                let confidence =
                    score(PatternType::KeyValue, line.trim_end(), offset, text, page_confidence);
                data.fields.insert(
                    label.to_string(),
                    field(PatternType::KeyValue, value, line.trim(), confidence),
                );
            }
        }
        offset += line.len();
    }

    debug!(fields = data.field_count(), "Structured data extracted");
    data
}

fn field(pattern_type: PatternType, value: &str, raw: &str, confidence: f64) -> ExtractedField {
    ExtractedField {
        pattern_type,
        value: value.to_string(),
        confidence,
        source: FieldSource::Pattern,
        location: None,
        raw_text: raw.to_string(),
        valid: is_valid(pattern_type, value),
    }
}

/// `Label: value` heuristic. Labels start with a letter and stay short.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':')?;
    let label = label.trim();
    let value = value.trim();
    if label.is_empty()
        || value.is_empty()
        || value.starts_with("//")
        || label.chars().count() > MAX_LABEL_CHARS
        || !label.chars().next().is_some_and(char::is_alphabetic)
    {
        return None;
    }
    Some((label, value))
}

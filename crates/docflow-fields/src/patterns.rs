//! Field pattern types and their matchers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kinds of structured values recognized in document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Email,
    Phone,
    Date,
    Ssn,
    Zip,
    Currency,
    Percentage,
    Passport,
    NationalId,
    KeyValue,
    Unknown,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()
});
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.? \d{1,2},? \d{4})\b",
    )
    .unwrap()
});
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static ZIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").unwrap());
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[$€£¥]\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})?|\b\d{1,3}(?:,\d{3})*(?:\.\d{2})?\s?(?:USD|EUR|GBP)\b",
    )
    .unwrap()
});
static PERCENTAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d+)?\s?%").unwrap());
/// Letter prefix followed by digits; the canonical shape is narrower.
static PASSPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{1,3}\d{5,9}\b").unwrap());
/// Three four-digit groups. Phone numbers (3-3-4) never match.
static NATIONAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[- ]\d{4}[- ]\d{4}\b").unwrap());

impl PatternType {
    /// Types found by a regex scan, in extraction order.
    pub const SCANNED: [PatternType; 9] = [
        PatternType::Email,
        PatternType::Phone,
        PatternType::Date,
        PatternType::Ssn,
        PatternType::Zip,
        PatternType::Currency,
        PatternType::Percentage,
        PatternType::Passport,
        PatternType::NationalId,
    ];

    /// Documented starting confidence for a match of this type.
    pub fn base_confidence(&self) -> f64 {
        match self {
            PatternType::Email => 95.0,
            PatternType::Phone => 80.0,
            PatternType::Date => 85.0,
            PatternType::Ssn => 92.0,
            PatternType::Zip => 85.0,
            PatternType::Currency => 88.0,
            PatternType::Percentage => 82.0,
            PatternType::Passport => 90.0,
            PatternType::NationalId => 95.0,
            PatternType::KeyValue => 75.0,
            PatternType::Unknown => 70.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Email => "email",
            PatternType::Phone => "phone",
            PatternType::Date => "date",
            PatternType::Ssn => "ssn",
            PatternType::Zip => "zip",
            PatternType::Currency => "currency",
            PatternType::Percentage => "percentage",
            PatternType::Passport => "passport",
            PatternType::NationalId => "national_id",
            PatternType::KeyValue => "key_value",
            PatternType::Unknown => "unknown",
        }
    }

    /// Matcher for scanned types. Key-value and unknown have none.
    pub fn regex(&self) -> Option<&'static Regex> {
        let re: &'static Lazy<Regex> = match self {
            PatternType::Email => &EMAIL_RE,
            PatternType::Phone => &PHONE_RE,
            PatternType::Date => &DATE_RE,
            PatternType::Ssn => &SSN_RE,
            PatternType::Zip => &ZIP_RE,
            PatternType::Currency => &CURRENCY_RE,
            PatternType::Percentage => &PERCENTAGE_RE,
            PatternType::Passport => &PASSPORT_RE,
            PatternType::NationalId => &NATIONAL_ID_RE,
            PatternType::KeyValue | PatternType::Unknown => return None,
        };
        Some(Lazy::force(re))
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

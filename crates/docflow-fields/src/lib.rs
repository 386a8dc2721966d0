//! Docflow Fields — pattern-based field extraction with confidence scoring.
//!
//! Every extracted value carries a 0–100 confidence built from a per-type
//! base, positional and glyph-ambiguity adjustments, the page recognition
//! confidence, and type-specific refinements.

pub mod patterns;
pub mod scorer;
pub mod types;
pub mod validate;

pub use patterns::PatternType;
pub use scorer::{extract_structured_data, score, StructuredData};
pub use types::{BoundingBox, ExtractedField, FieldSource};
pub use validate::is_valid;

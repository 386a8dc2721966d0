//! Document-type hint used to size chunks.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Receipt,
    Contract,
    Report,
    Form,
    Code,
    Markdown,
    Scanned,
    General,
}

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "java", "cpp", "c", "go", "rs", "ts", "tsx", "jsx", "rb", "sh", "sql",
];

const KEYWORDS: &[(&str, DocumentType)] = &[
    ("invoice", DocumentType::Invoice),
    ("bill", DocumentType::Invoice),
    ("receipt", DocumentType::Receipt),
    ("contract", DocumentType::Contract),
    ("agreement", DocumentType::Contract),
    ("report", DocumentType::Report),
    ("statement", DocumentType::Report),
    ("form", DocumentType::Form),
    ("application", DocumentType::Form),
];

impl DocumentType {
    /// Derive a hint from the filename and mime type.
    ///
    /// Filename keywords win over the file extension, which wins over the mime type.
    pub fn detect(filename: &str, mime_type: &str) -> Self {
        let lower = filename.to_lowercase();
        let stem = Path::new(&lower)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        for token in stem.split(|c: char| !c.is_alphanumeric()) {
            let token = token.trim_end_matches('s');
            if let Some((_, doc_type)) = KEYWORDS.iter().find(|(k, _)| *k == token) {
                return *doc_type;
            }
        }

        let ext = Path::new(&lower)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if CODE_EXTENSIONS.contains(&ext) {
            return Self::Code;
        }
        if matches!(ext, "md" | "mdx" | "rst") || mime_type == "text/markdown" {
            return Self::Markdown;
        }
        if mime_type.starts_with("image/") {
            return Self::Scanned;
        }
        Self::General
    }

    /// `(chunk_size, chunk_overlap)` in characters.
    pub fn chunk_size(&self) -> (usize, usize) {
        match self {
            Self::Code => (400, 80),
            Self::Markdown | Self::Report | Self::Contract => (600, 120),
            Self::Invoice | Self::Receipt | Self::Form => (300, 50),
            Self::Scanned | Self::General => (512, 100),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::Contract => "contract",
            Self::Report => "report",
            Self::Form => "form",
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Scanned => "scanned",
            Self::General => "general",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(DocumentType::detect("ACME_Invoice_0042.pdf", "application/pdf"), DocumentType::Invoice);
        assert_eq!(DocumentType::detect("main.rs", "text/plain"), DocumentType::Code);
        assert_eq!(DocumentType::detect("README.md", "text/plain"), DocumentType::Markdown);
        assert_eq!(DocumentType::detect("scan-001.png", "image/png"), DocumentType::Scanned);
        assert_eq!(DocumentType::detect("notes.txt", "text/plain"), DocumentType::General);
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(DocumentType::Code.chunk_size(), (400, 80));
        assert_eq!(DocumentType::General.chunk_size(), (512, 100));
    }
}

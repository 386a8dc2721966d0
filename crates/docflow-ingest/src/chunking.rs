//! Text chunking.
//!
//! [`RecursiveChunker`] splits on progressively finer separators
//! (`"\n\n"`, `"\n"`, `". "`, `" "`) until every piece fits the chunk size.
//! Pieces are always contiguous slices of the input, so offsets are exact.

use docflow_core::{Chunk, ChunkMetadata, Error, ExtractionResult, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::doctype::DocumentType;
use crate::traits::{ChunkingOutput, ChunkingProvider, ChunkingStats};

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*$").unwrap());

/// Separator-aware splitter producing byte spans.
pub struct RecursiveChunker {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size / 2),
            separators: vec!["\n\n", "\n", ". ", " "],
        }
    }

    /// Byte ranges of non-blank chunks, trimmed of surrounding whitespace.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut raw = Vec::new();
        self.split(text, 0, &self.separators, &mut raw);
        raw.into_iter()
            .filter_map(|(start, end)| {
                let slice = &text[start..end];
                let trimmed = slice.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let lead = slice.len() - slice.trim_start().len();
                Some((start + lead, start + lead + trimmed.len()))
            })
            .collect()
    }

    fn split(&self, text: &str, base: usize, separators: &[&str], out: &mut Vec<(usize, usize)>) {
        if text.len() <= self.chunk_size {
            out.push((base, base + text.len()));
            return;
        }
        let Some((separator, remaining)) = separators.split_first() else {
            self.hard_split(text, base, out);
            return;
        };

        let mut parts = Vec::new();
        let mut last = 0;
        for (idx, _) in text.match_indices(separator) {
            parts.push((last, idx));
            last = idx + separator.len();
        }
        parts.push((last, text.len()));
        if parts.len() == 1 {
            self.split(text, base, remaining, out);
            return;
        }

        let mut window: Vec<(usize, usize)> = Vec::new();
        for (start, end) in parts {
            if end - start > self.chunk_size {
                self.flush(&window, base, out);
                window.clear();
                self.split(&text[start..end], base + start, remaining, out);
                continue;
            }
            if let Some(&(first, _)) = window.first() {
                if end - first > self.chunk_size {
                    self.flush(&window, base, out);
                    // Carry trailing parts forward as overlap.
                    while let (Some(&(first, _)), Some(&(_, tail))) = (window.first(), window.last()) {
                        if tail - first <= self.chunk_overlap && end - first <= self.chunk_size {
                            break;
                        }
                        window.remove(0);
                    }
                }
            }
            window.push((start, end));
        }
        self.flush(&window, base, out);
    }

    fn flush(&self, window: &[(usize, usize)], base: usize, out: &mut Vec<(usize, usize)>) {
        if let (Some(&(start, _)), Some(&(_, end))) = (window.first(), window.last()) {
            out.push((base + start, base + end));
        }
    }

    fn hard_split(&self, text: &str, base: usize, out: &mut Vec<(usize, usize)>) {
        let mut start = 0;
        while start < text.len() {
            let mut end = (start + self.chunk_size).min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                end = text[start..]
                    .char_indices()
                    .nth(1)
                    .map_or(text.len(), |(i, _)| start + i);
            }
            out.push((base + start, base + end));
            start = end;
        }
    }
}

/// Default chunking collaborator: recursive chunking per page, tagged with
/// page number and the nearest preceding markdown heading.
#[derive(Default)]
pub struct ParagraphChunker {
    /// Fixed `(size, overlap)`; otherwise derived from the document type.
    size_override: Option<(usize, usize)>,
}

impl ParagraphChunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            size_override: Some((chunk_size, chunk_overlap)),
        }
    }
}

impl ChunkingProvider for ParagraphChunker {
    fn chunk_document(
        &self,
        extraction: &ExtractionResult,
        hint: DocumentType,
    ) -> Result<ChunkingOutput> {
        let (size, overlap) = self.size_override.unwrap_or_else(|| hint.chunk_size());
        if size == 0 {
            return Err(Error::Chunking("chunk size must be positive".into()));
        }
        let chunker = RecursiveChunker::new(size, overlap);

        let pages: Vec<(Option<u32>, &str)> = if extraction.pages.is_empty() {
            vec![(None, extraction.text.as_str())]
        } else {
            extraction
                .pages
                .iter()
                .map(|p| (Some(p.page_number), p.text.as_str()))
                .collect()
        };

        let mut chunks = Vec::new();
        let mut page_offset = 0;
        for (page_number, text) in pages {
            let headings: Vec<(usize, String)> = HEADING_RE
                .captures_iter(text)
                .filter_map(|c| Some((c.get(0)?.start(), c.get(1)?.as_str().to_string())))
                .collect();

            for (start, end) in chunker.spans(text) {
                let section = headings
                    .iter()
                    .take_while(|(pos, _)| *pos <= start)
                    .last()
                    .map(|(_, title)| title.clone());
                let metadata = ChunkMetadata {
                    page_number,
                    section,
                    char_start: page_offset + start,
                    char_end: page_offset + end,
                };
                chunks.push(Chunk::new(text[start..end].to_string(), chunks.len(), metadata));
            }
            page_offset += text.len() + 2;
        }

        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        let stats = ChunkingStats {
            total_chunks: chunks.len(),
            total_tokens,
            avg_tokens: if chunks.is_empty() { 0 } else { total_tokens / chunks.len() },
        };
        debug!(
            chunks = stats.total_chunks,
            tokens = stats.total_tokens,
            hint = hint.as_str(),
            "Chunked document"
        );
        Ok(ChunkingOutput { chunks, stats })
    }
}

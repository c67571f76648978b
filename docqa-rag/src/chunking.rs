//! Boundary-aware page chunking.
//!
//! This module provides the [`Chunker`] trait and [`BoundaryChunker`], which
//! scans a page in fixed windows and pulls each window's end back to the last
//! sentence terminator or paragraph break so chunks rarely cut a sentence.
//!
//! All positions are counted in `char`s, never bytes.

use crate::document::Chunk;

/// A strategy for splitting one page of text into chunks.
///
/// Implementations produce [`Chunk`]s whose `chunk_index` starts at 0 and
/// increases by one per emitted chunk of the page.
pub trait Chunker: Send + Sync {
    /// Split a page into chunks.
    ///
    /// Returns an empty `Vec` if the text is empty or whitespace only.
    fn chunk(&self, text: &str, page_number: u32) -> Vec<Chunk>;
}

const SENTENCE_ENDINGS: [&str; 3] = [". ", "! ", "? "];
const PARAGRAPH_BREAKS: [&str; 2] = ["\n\n", "\r\n\r\n"];

/// Splits a page into overlapping windows that prefer sentence and paragraph
/// boundaries.
///
/// For each window `[start, start + chunk_size)` that is not the last one, the
/// end is moved to just after the last `". "`, `"! "` or `"? "` lying after
/// `start`; failing that, to just after the last paragraph break; failing
/// that, the raw window end is kept. Trimmed windows shorter than
/// `min_chunk_size` are dropped. The next window starts `overlap` characters
/// before the current end, where `overlap` is clamped to `chunk_size / 4`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::BoundaryChunker;
///
/// let chunker = BoundaryChunker::new(500, 50);
/// let chunks = chunker.chunk(&page_text, 1);
/// ```
#[derive(Debug, Clone)]
pub struct BoundaryChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl BoundaryChunker {
    /// Create a new `BoundaryChunker`.
    ///
    /// The minimum chunk length defaults to `max(50, chunk_size / 10)`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per window
    /// * `chunk_overlap`: requested overlap between consecutive windows
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap, min_chunk_size: (chunk_size / 10).max(50) }
    }

    /// Override the minimum length of an emitted chunk.
    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size.max(1);
        self
    }

    /// The minimum trimmed length of an emitted chunk.
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// The overlap actually applied between windows.
    pub fn effective_overlap(&self) -> usize {
        self.chunk_overlap.min(self.chunk_size / 4)
    }

    /// Raw window boundaries, as `char` offsets, before trimming and filtering.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        self.spans_of(&chars)
    }

    fn spans_of(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let overlap = self.effective_overlap();
        let mut spans = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + self.chunk_size).min(len);

            if end < len {
                if let Some(boundary) = last_boundary(chars, start, end, &SENTENCE_ENDINGS)
                    .or_else(|| last_boundary(chars, start, end, &PARAGRAPH_BREAKS))
                {
                    end = boundary;
                }
            }

            spans.push((start, end));

            let mut next_start = end.saturating_sub(overlap);
            if next_start <= start {
                next_start = start + self.min_chunk_size;
            }
            start = next_start;
        }

        spans
    }
}

impl Default for BoundaryChunker {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, text: &str, page_number: u32) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();

        for (start, end) in self.spans_of(&chars) {
            let window: String = chars[start..end].iter().collect();
            let content = window.trim();
            if content.chars().count() < self.min_chunk_size {
                continue;
            }
            chunks.push(Chunk {
                chunk_index: chunks.len(),
                page_number,
                content: content.to_string(),
            });
        }

        chunks
    }
}

/// Offset just past the last occurrence of any pattern lying entirely within
/// `chars[start..end]` and beginning strictly after `start`.
fn last_boundary(chars: &[char], start: usize, end: usize, patterns: &[&str]) -> Option<usize> {
    patterns
        .iter()
        .filter_map(|pattern| {
            let pattern: Vec<char> = pattern.chars().collect();
            rfind(chars, &pattern, start, end)
                .filter(|&pos| pos > start)
                .map(|pos| pos + pattern.len())
        })
        .max()
}

fn rfind(chars: &[char], pattern: &[char], start: usize, end: usize) -> Option<usize> {
    if pattern.is_empty() || end < start + pattern.len() {
        return None;
    }
    (start..=end - pattern.len()).rev().find(|&pos| chars[pos..pos + pattern.len()] == *pattern)
}

//! Text chunking module
//!
//! Splits document text into overlapping windows measured in characters.
//! Window `i` targets the end `chunk_size + i * (chunk_size - overlap)` and may
//! move to the nearest sentence or paragraph break within the tolerance. The
//! next window always starts `overlap` characters before the previous end, so
//! collapsing overlaps reconstructs the source and the window count is
//! `max(1, ceil((len - overlap) / (chunk_size - overlap)))`.

use crate::config::ChunkingConfig;
use crate::errors::{AppError, Result};
use serde::Serialize;
use tracing::debug;

/// A text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// The chunk content
    pub content: String,
    /// Index of this chunk in the document
    pub index: i32,
    /// Approximate token count (~4 chars per token)
    pub token_count: i32,
    /// Start character position in original text
    pub start_pos: usize,
    /// End character position in original text (exclusive)
    pub end_pos: usize,
}

impl TextChunk {
    /// Whitespace-only window, which carries nothing to embed
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Overlapping window splitter
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    tolerance: usize,
}

fn is_break(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

impl Chunker {
    /// Build a chunker; `chunk_size` must exceed `overlap`
    pub fn new(chunk_size: usize, overlap: usize, max_tolerance: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(AppError::validation("chunkSize", "chunk size must be positive"));
        }
        if overlap >= chunk_size {
            return Err(AppError::validation(
                "chunkOverlap",
                format!("chunk overlap {} must be smaller than chunk size {}", overlap, chunk_size),
            ));
        }

        let step = chunk_size - overlap;
        Ok(Self {
            chunk_size,
            overlap,
            tolerance: max_tolerance.min(step / 4),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap, config.boundary_tolerance)
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Number of windows produced for a text of `len` characters
    pub fn expected_count(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let step = self.step();
        len.saturating_sub(self.overlap).div_ceil(step).max(1)
    }

    /// Break position nearest to `target` within the tolerance, earliest on ties
    fn snap(&self, chars: &[char], target: usize, lower: usize, upper: usize) -> usize {
        let from = target.saturating_sub(self.tolerance).max(lower);
        let to = (target + self.tolerance).min(upper);

        let mut best: Option<usize> = None;
        for pos in from..=to {
            if pos == 0 || !is_break(chars[pos - 1]) {
                continue;
            }
            let better = match best {
                Some(b) => pos.abs_diff(target) < b.abs_diff(target),
                None => true,
            };
            if better {
                best = Some(pos);
            }
        }
        best.unwrap_or(target)
    }

    /// Split `text` into ordered chunks; empty text yields no chunks
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let count = self.expected_count(total);
        let mut chunks = Vec::with_capacity(count);

        let mut start = 0;
        for index in 0..count {
            let last = index + 1 == count;
            let end = if last {
                total
            } else {
                let target = self.chunk_size + index * self.step();
                self.snap(&chars, target, start + 1, total - 1)
            };

            let content: String = chars[start..end].iter().collect();
            chunks.push(TextChunk {
                token_count: ((end - start) / 4) as i32,
                content,
                index: index as i32,
                start_pos: start,
                end_pos: end,
            });

            if last {
                break;
            }
            start = end - self.overlap;
        }

        debug!(
            input_chars = total,
            chunk_count = chunks.len(),
            chunk_size = self.chunk_size,
            overlap = self.overlap,
            "Text chunked"
        );

        chunks
    }
}

/// Split text with the default boundary tolerance
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    let defaults = ChunkingConfig::default();
    Ok(Chunker::new(chunk_size, overlap, defaults.boundary_tolerance)?.chunk(text))
}

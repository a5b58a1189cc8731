//! Sliding-window text chunker.
//!
//! Splits page text into overlapping [`Chunk`]s of at most `max_chars`
//! characters. Consecutive chunks from the same page share exactly
//! `overlap_chars` characters so a sentence cut at one boundary is still
//! whole in the neighbouring chunk.
//!
//! Chunking is done per [`Page`], so every chunk keeps its document and page
//! number for citations.
//!
//! # Algorithm
//!
//! 1. Trim the page text; an empty page yields no chunks.
//! 2. Emit the window `[start, start + max_chars)` (clamped to the text end).
//! 3. Stop when the window reaches the end of the text, otherwise advance
//!    `start` by `max_chars - overlap_chars` and repeat.
//!
//! Offsets are measured in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use finrag::chunk::chunk_page;
//! use finrag::models::Page;
//!
//! let page = Page { document: "10k.pdf".into(), number: 1, text: "abcdefghij".into() };
//! let chunks = chunk_page(&page, 4, 1);
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkSource, Page};

/// Split one page into overlapping windows.
///
/// Callers must pass `overlap_chars < max_chars`; [`crate::config::load_config`]
/// rejects anything else. A degenerate stride is clamped to one char so the
/// loop always terminates.
pub fn chunk_page(page: &Page, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let text = page.text.trim();
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_len = bounds.len();
    bounds.push(text.len());

    let stride = max_chars.saturating_sub(overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + max_chars).min(char_len);
        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(page, chunks.len(), start, end, piece));

        if end == char_len {
            break;
        }
        start += stride;
    }

    chunks
}

/// Chunk a sequence of pages, preserving page order.
pub fn chunk_pages(pages: &[Page], max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|p| chunk_page(p, max_chars, overlap_chars))
        .collect()
}

fn make_chunk(page: &Page, index: usize, start: usize, end: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}:{}", page.document, page.number, index),
        source: ChunkSource {
            document: page.document.clone(),
            page: page.number,
        },
        chunk_index: index,
        start,
        end,
        text: text.to_string(),
        hash,
    }
}

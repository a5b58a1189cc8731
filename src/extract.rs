//! PDF text extraction.
//!
//! The document loader: turns uploaded PDF bytes into one [`Page`] per
//! physical page. Malformed input never panics; it comes back as a
//! [`LoadError`] naming the file, and the caller decides what to do with the
//! index it already has.

use thiserror::Error;

use crate::models::{Document, Page};

/// Every PDF starts with this marker (possibly after a few junk bytes).
const PDF_MAGIC: &[u8] = b"%PDF-";
/// How far into the file the magic may appear.
const MAGIC_SEARCH_WINDOW: usize = 1024;

/// A document could not be read.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{file}: not a PDF document")]
    NotPdf { file: String },

    #[error("{file}: PDF extraction failed: {message}")]
    Pdf { file: String, message: String },
}

/// Extract per-page text from a PDF document, in page order.
///
/// Pages with no extractable text are kept (with empty text) so page numbers
/// stay aligned with the physical document; the chunker skips them.
pub fn extract_pages(doc: &Document) -> Result<Vec<Page>, LoadError> {
    if !looks_like_pdf(&doc.bytes) {
        return Err(LoadError::NotPdf {
            file: doc.name.clone(),
        });
    }

    let pdf_error = |message: String| LoadError::Pdf {
        file: doc.name.clone(),
        message,
    };

    // pdf-extract panics on some malformed object streams.
    let texts = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&doc.bytes))
        .map_err(|_| pdf_error("parser panicked on malformed input".to_string()))?
        .map_err(|e| pdf_error(e.to_string()))?;
    if texts.is_empty() {
        return Err(pdf_error("document has no pages".to_string()));
    }

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            document: doc.name.clone(),
            number: i + 1,
            text: normalize_whitespace(&text),
        })
        .collect())
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(MAGIC_SEARCH_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Collapse runs of spaces and blank lines left behind by glyph positioning.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&collapsed);
    }
    out
}

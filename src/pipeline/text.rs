//! Text extraction: every page's text layer joined into one string.
//!
//! This is a best-effort reconstruction. Page order is preserved and pages
//! are separated by a single newline; positions and layout are not.

use crate::error::BizBotError;
use crate::pipeline::reader::{LopdfDocument, PdfSource};
use std::path::Path;
use tracing::debug;

/// Open the PDF at `path` and return its text, pages joined with `\n`.
pub fn extract_text(path: &Path) -> Result<String, BizBotError> {
    let doc = LopdfDocument::open(path)?;
    collect_text(&doc)
}

/// Concatenate the text of every page of `source` in document order.
pub fn collect_text<S: PdfSource>(source: &S) -> Result<String, BizBotError> {
    let mut texts = Vec::with_capacity(source.page_count());
    for page in source.pages() {
        let text = page.text()?;
        debug!("Page {}: {} chars of text", page.number(), text.len());
        texts.push(text);
    }
    Ok(texts.join("\n"))
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

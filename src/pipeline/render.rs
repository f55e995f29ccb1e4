//! Text rendering: a summary → a downloadable A4 PDF.
//!
//! ## Layout
//!
//! A4 portrait, 20 mm margins, Helvetica 12 pt. Each input line is
//! word-wrapped on its own so paragraph breaks survive; an empty input line
//! becomes vertical space. A new page starts when the cursor would cross the
//! bottom margin.
//!
//! The built-in Helvetica covers Latin-1 only. Typographic punctuation that
//! models like to emit is mapped to ASCII and anything else outside Latin-1
//! becomes `?`, so the PDF never carries glyphs the font cannot draw.

use crate::error::BizBotError;
use crate::pipeline::write_atomic;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN: f32 = 20.0;
const FONT_SIZE: f32 = 12.0;
const LINE_HEIGHT: f32 = 7.0;
/// Characters per line at 12 pt Helvetica across 170 mm.
const WRAP_CHARS: usize = 85;

/// Render `text` as PDF bytes.
pub fn render_text_pdf(title: &str, text: &str) -> Result<Vec<u8>, BizBotError> {
    if text.trim().is_empty() {
        return Err(BizBotError::EmptyInput { what: "text to render" });
    }

    let pdf_err = |e: String| BizBotError::Internal(format!("PDF rendering failed: {e}"));

    let (doc, page1, layer1) = PdfDocument::new(title, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| pdf_err(format!("font error: {e}")))?;

    let mut cursor = Cursor {
        layer: doc.get_page(page1).get_layer(layer1),
        y: PAGE_HEIGHT.0 - MARGIN,
        pages: 1,
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            cursor.advance(&doc);
            continue;
        }
        for wrapped in wrap_text(&to_latin1(line), WRAP_CHARS) {
            cursor.write(&doc, &wrapped, &font);
        }
    }
    debug!("Rendered {} chars over {} pages", text.len(), cursor.pages);

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| pdf_err(format!("save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| pdf_err(format!("buffer error: {e}")))
}

/// Render `text` and store it at `path`, returning the bytes.
///
/// Layout and serialisation are CPU-bound, so they run on the blocking pool.
pub async fn save_text_pdf(title: &str, text: &str, path: &Path) -> Result<Vec<u8>, BizBotError> {
    let (title, text) = (title.to_owned(), text.to_owned());
    let bytes = tokio::task::spawn_blocking(move || render_text_pdf(&title, &text))
        .await
        .map_err(|e| BizBotError::Internal(format!("PDF render task panicked: {e}")))??;
    write_atomic(path, &bytes).await?;
    info!("Wrote {} byte PDF to {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Current page layer and vertical position in millimetres.
struct Cursor {
    layer: PdfLayerReference,
    y: f32,
    pages: usize,
}

impl Cursor {
    fn write(&mut self, doc: &PdfDocumentReference, line: &str, font: &IndirectFontRef) {
        if self.y < MARGIN {
            self.new_page(doc);
        }
        self.layer.use_text(line, FONT_SIZE, Mm(MARGIN), Mm(self.y), font);
        self.y -= LINE_HEIGHT;
    }

    fn advance(&mut self, doc: &PdfDocumentReference) {
        self.y -= LINE_HEIGHT;
        if self.y < MARGIN {
            self.new_page(doc);
        }
    }

    fn new_page(&mut self, doc: &PdfDocumentReference) {
        let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
        self.layer = doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT.0 - MARGIN;
        self.pages += 1;
    }
}

/// Greedy word wrap. Words longer than `max_chars` get a line of their own
/// and are split between characters.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                lines.push(piece.iter().collect());
            }
            continue;
        }
        if current_len + word_len + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn to_latin1(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201F}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2022}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' => out.push(' '),
            c if (c as u32) < 0x100 && !c.is_control() => out.push(c),
            '\t' => out.push(' '),
            _ => out.push('?'),
        }
    }
    out
}

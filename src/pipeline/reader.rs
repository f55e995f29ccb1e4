//! PDF reading: pages, their text layer and their image references.
//!
//! The extractors never talk to lopdf directly. They consume the
//! [`PdfSource`] trait, which is the whole capability set they need:
//! page count, per-page text, per-page image references and rasterisation
//! by reference. [`LopdfDocument`] implements it over a parsed file;
//! tests implement it over in-memory fixtures.
//!
//! A `LopdfDocument` reads the whole file when opened and owns no OS handle
//! afterwards, so dropping it at the end of an extraction call releases
//! everything on every exit path.

use crate::error::BizBotError;
use crate::pipeline::raster::{self, DecodeError, RasterImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// An embedded image resource, identified by its indirect object id.
///
/// The same image placed on several pages yields the same reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageRef(pub ObjectId);

/// What the text and image extractors need from a parsed PDF.
pub trait PdfSource {
    /// Number of pages in document order.
    fn page_count(&self) -> usize;

    /// Text layer of the page at `index` (0-based).
    fn page_text(&self, index: usize) -> Result<String, BizBotError>;

    /// Image references cited by the page at `index`, in in-page order.
    fn page_images(&self, index: usize) -> Result<Vec<ImageRef>, BizBotError>;

    /// Decode an image reference into a pixel buffer.
    fn rasterize(&self, image: ImageRef) -> Result<RasterImage, DecodeError>;

    /// Lazily walk the pages in document order.
    fn pages(&self) -> Pages<'_, Self>
    where
        Self: Sized,
    {
        Pages {
            source: self,
            next: 0,
        }
    }
}

/// A page of a [`PdfSource`], borrowed from it.
#[derive(Debug)]
pub struct Page<'a, S: PdfSource> {
    source: &'a S,
    index: usize,
}

impl<'a, S: PdfSource> Page<'a, S> {
    /// 0-based page index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number, as used in file names.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn text(&self) -> Result<String, BizBotError> {
        self.source.page_text(self.index)
    }

    pub fn images(&self) -> Result<Vec<ImageRef>, BizBotError> {
        self.source.page_images(self.index)
    }
}

/// Iterator returned by [`PdfSource::pages`].
#[derive(Debug)]
pub struct Pages<'a, S: PdfSource> {
    source: &'a S,
    next: usize,
}

impl<'a, S: PdfSource> Iterator for Pages<'a, S> {
    type Item = Page<'a, S>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.page_count() {
            return None;
        }
        let page = Page {
            source: self.source,
            index: self.next,
        };
        self.next += 1;
        Some(page)
    }
}

/// A PDF parsed with lopdf.
pub struct LopdfDocument {
    doc: Document,
    /// Page object ids in document order.
    page_ids: Vec<ObjectId>,
}

impl std::fmt::Debug for LopdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LopdfDocument")
            .field("pages", &self.page_ids.len())
            .finish()
    }
}

impl LopdfDocument {
    /// Open and parse the PDF at `path`.
    ///
    /// Fails with [`BizBotError::DocumentOpen`] if the file is missing, is not
    /// a PDF, or is encrypted with a non-empty password.
    pub fn open(path: &Path) -> Result<Self, BizBotError> {
        let open_err = |detail: String| BizBotError::DocumentOpen {
            path: path.to_path_buf(),
            detail,
        };

        if !path.exists() {
            return Err(open_err("file does not exist".into()));
        }

        let mut doc = Document::load(path).map_err(|e| open_err(e.to_string()))?;
        if doc.is_encrypted() {
            doc.decrypt("")
                .map_err(|_| open_err("document is password protected".into()))?;
            debug!("Decrypted PDF with empty password");
        }

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        info!("PDF loaded: {} pages", page_ids.len());
        Ok(Self { doc, page_ids })
    }

    /// Parse a PDF held in memory. Used by tests and callers without a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BizBotError> {
        let doc = Document::load_mem(bytes).map_err(|e| BizBotError::DocumentOpen {
            path: "<memory>".into(),
            detail: e.to_string(),
        })?;
        let page_ids = doc.get_pages().into_values().collect();
        Ok(Self { doc, page_ids })
    }

    fn page_id(&self, index: usize) -> Result<ObjectId, BizBotError> {
        self.page_ids.get(index).copied().ok_or_else(|| {
            BizBotError::Internal(format!(
                "page index {} out of range (document has {} pages)",
                index,
                self.page_ids.len()
            ))
        })
    }

    /// Resources dictionary of a page node, walking up `/Parent` for inherited ones.
    fn resources(&self, node_id: ObjectId) -> Option<&Dictionary> {
        let mut current = Some(node_id);
        let mut visited = HashSet::new();
        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let dict = self.doc.get_dictionary(id).ok()?;
            if let Ok(res) = dict.get(b"Resources") {
                if let Ok((_, Object::Dictionary(res))) = self.doc.dereference(res) {
                    return Some(res);
                }
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }
        None
    }

    /// Collect image XObjects from a resources dictionary, descending into
    /// Form XObjects. `forms` guards against cyclic form references.
    fn collect_images(&self, resources: &Dictionary, out: &mut Vec<ImageRef>, forms: &mut HashSet<ObjectId>) {
        let Ok(xobjects) = resources.get(b"XObject") else {
            return;
        };
        let Ok((_, Object::Dictionary(xobjects))) = self.doc.dereference(xobjects) else {
            return;
        };

        for (_name, entry) in xobjects.iter() {
            let Ok(id) = entry.as_reference() else {
                continue;
            };
            let Ok(stream) = self.doc.get_object(id).and_then(Object::as_stream) else {
                continue;
            };
            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => out.push(ImageRef(id)),
                Ok(b"Form") if forms.insert(id) => {
                    if let Ok(res) = stream.dict.get(b"Resources") {
                        if let Ok((_, Object::Dictionary(res))) = self.doc.dereference(res) {
                            self.collect_images(res, out, forms);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl PdfSource for LopdfDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn page_text(&self, index: usize) -> Result<String, BizBotError> {
        self.page_id(index)?;
        let number = u32::try_from(index + 1)
            .map_err(|_| BizBotError::Internal(format!("page index {index} too large")))?;
        let text = self.doc.extract_text(&[number]).map_err(|e| {
            BizBotError::Internal(format!("text extraction failed on page {}: {}", number, e))
        })?;
        Ok(text.trim_end_matches(['\n', '\r']).to_string())
    }

    fn page_images(&self, index: usize) -> Result<Vec<ImageRef>, BizBotError> {
        let page_id = self.page_id(index)?;
        let mut images = Vec::new();
        if let Some(resources) = self.resources(page_id) {
            self.collect_images(resources, &mut images, &mut HashSet::new());
        }
        Ok(images)
    }

    fn rasterize(&self, image: ImageRef) -> Result<RasterImage, DecodeError> {
        raster::rasterize(&self.doc, image.0)
    }
}

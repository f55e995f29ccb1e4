//! Error types for the bizbot library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BizBotError`]: **Fatal**: the operation cannot proceed at all
//!   (missing or corrupt PDF, blank input, unwritable output directory).
//!   Returned as `Err(BizBotError)` from every public operation and turned
//!   into an HTTP error payload by [`crate::server`].
//!
//! * [`ImageError`]: **Non-fatal**: one embedded image could not be decoded
//!   or written, but the others are fine. Stored in
//!   [`crate::pipeline::images::ImageExtraction::failures`] when the
//!   extraction runs with [`crate::config::ImageFailurePolicy::SkipAndWarn`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the bizbot library.
#[derive(Debug, Error)]
pub enum BizBotError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The PDF is missing or its content could not be parsed.
    #[error("Could not open PDF '{path}': {detail}")]
    DocumentOpen { path: PathBuf, detail: String },

    /// The uploaded bytes do not start with the `%PDF` magic.
    #[error("Uploaded file is not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The upload request itself was malformed (no file field, empty body).
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// A JSON request body was missing or malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Blank text was passed where non-blank text is required.
    #[error("No {what} provided: input is empty")]
    EmptyInput { what: &'static str },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// An embedded image could not be decoded, converted or saved, and the
    /// extraction runs with [`crate::config::ImageFailurePolicy::Abort`].
    #[error("Image {index} on page {page} could not be extracted: {detail}")]
    Rasterize {
        page: usize,
        index: usize,
        detail: String,
    },

    /// The image output directory could not be created or cleared.
    #[error("Failed to prepare image directory '{path}': {source}")]
    ImageDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Remote service errors ─────────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error or timed out.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The text-to-speech service failed.
    #[error("Speech synthesis failed: {0}")]
    SpeechFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file (audio, PDF, staged upload).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A requested artefact (audio, image) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BizBotError {
    /// True for errors caused by what the client sent rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BizBotError::EmptyInput { .. }
                | BizBotError::NotAPdf { .. }
                | BizBotError::InvalidUpload(_)
                | BizBotError::InvalidRequest(_)
        )
    }
}

/// A non-fatal error for a single embedded image.
///
/// `page` and `index` are the 1-based numbers used in output file names.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// Decoding or colour conversion failed.
    #[error("Page {page}, image {index}: rasterisation failed: {detail}")]
    Rasterize {
        page: usize,
        index: usize,
        detail: String,
    },

    /// The PNG could not be written.
    #[error("Page {page}, image {index}: could not write '{path}': {detail}")]
    Write {
        page: usize,
        index: usize,
        path: PathBuf,
        detail: String,
    },
}

impl ImageError {
    /// Promote to the fatal error used by the abort-all policy.
    pub fn into_fatal(self) -> BizBotError {
        match self {
            ImageError::Rasterize {
                page,
                index,
                detail,
            } => BizBotError::Rasterize {
                page,
                index,
                detail,
            },
            ImageError::Write {
                page,
                index,
                path,
                detail,
            } => BizBotError::Rasterize {
                page,
                index,
                detail: format!("write to '{}' failed: {}", path.display(), detail),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_display() {
        let e = BizBotError::EmptyInput { what: "text to narrate" };
        assert_eq!(e.to_string(), "No text to narrate provided: input is empty");
        assert!(e.is_client_error());
    }

    #[test]
    fn document_open_is_server_side() {
        let e = BizBotError::DocumentOpen {
            path: PathBuf::from("/tmp/x.pdf"),
            detail: "invalid file header".into(),
        };
        assert!(e.to_string().contains("/tmp/x.pdf"));
        assert!(!e.is_client_error());
    }

    #[test]
    fn image_error_promotes_to_rasterize() {
        let e = ImageError::Write {
            page: 2,
            index: 3,
            path: PathBuf::from("out/page2_img3_deadbeef.png"),
            detail: "disk full".into(),
        };
        match e.into_fatal() {
            BizBotError::Rasterize { page, index, detail } => {
                assert_eq!((page, index), (2, 3));
                assert!(detail.contains("disk full"), "got: {detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rasterize_display() {
        let e = ImageError::Rasterize {
            page: 1,
            index: 4,
            detail: "unsupported filter JPXDecode".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 1"), "got: {msg}");
        assert!(msg.contains("JPXDecode"), "got: {msg}");
    }
}

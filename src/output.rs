//! Result types returned by the briefing service and serialised by the
//! HTTP layer.

use crate::error::ImageError;
use serde::{Deserialize, Serialize};

/// Result of analysing one uploaded PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Cleaned model summary of the document text.
    pub summary: String,

    /// Number of pages in the document.
    pub page_count: usize,

    /// Whitespace-separated words in the extracted text.
    pub word_count: usize,

    /// Server-relative paths of the extracted images, in discovery order,
    /// e.g. `extracted_images/<run>/page1_img1_3f2a9c1b.png`.
    pub images: Vec<String>,

    /// Images that could not be extracted. Omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_failures: Vec<ImageError>,
}

/// A model answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutput {
    pub answer: String,
}

/// One question/answer exchange kept in the session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// Plain acknowledgement payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutput {
    pub message: String,
}

impl MessageOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

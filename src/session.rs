//! Session state: the analysed document and its chat history.
//!
//! The service serves one session. Its state lives in a [`SessionStore`]
//! owned by the service and guarded by one `parking_lot::Mutex`. Every
//! method takes the lock for a handful of field operations and releases it
//! before returning, so it is never held across an `.await`.
//!
//! Concurrent analyze calls are last-write-wins on the session. They never
//! share an image directory: each call extracts into its own run directory
//! and the store hands back the replaced run for deletion.

use crate::output::ChatTurn;
use parking_lot::Mutex;
use std::path::PathBuf;

/// Everything remembered about the current document.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Cleaned summary of the last analysed document. Empty before the first.
    pub summary: String,
    /// Full extracted text of the last analysed document.
    pub document_text: String,
    /// Question/answer turns since the last analyze or clear.
    pub chat_history: Vec<ChatTurn>,
    /// Image directory of the last analyze call.
    pub image_run: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session wholesale with a freshly analysed document.
    ///
    /// Chat history is reset. Returns the previous image run directory, if
    /// any, so the caller can delete it.
    pub fn replace_document(
        &self,
        summary: String,
        document_text: String,
        image_run: PathBuf,
    ) -> Option<PathBuf> {
        let mut state = self.inner.lock();
        let previous = state.image_run.replace(image_run);
        state.summary = summary;
        state.document_text = document_text;
        state.chat_history.clear();
        previous
    }

    pub fn summary(&self) -> String {
        self.inner.lock().summary.clone()
    }

    pub fn push_turn(&self, turn: ChatTurn) {
        self.inner.lock().chat_history.push(turn);
    }

    pub fn chat_history(&self) -> Vec<ChatTurn> {
        self.inner.lock().chat_history.clone()
    }

    /// Forget all chat turns; the document stays.
    pub fn clear_chat(&self) {
        self.inner.lock().chat_history.clear();
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().clone()
    }
}

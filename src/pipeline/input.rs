//! Input staging: turn uploaded bytes into a local PDF file.
//!
//! ## Why stage to a temp file?
//!
//! The extractors open documents by path, and an upload arrives as a byte
//! buffer. Writing it to a `NamedTempFile` inside the work directory gives
//! them a path while guaranteeing the file is deleted when [`StagedPdf`] is
//! dropped, on success, on error and on panic alike. The `%PDF` magic is
//! checked before anything touches the disk so a wrong upload yields a
//! client error instead of a parser failure.

use crate::error::BizBotError;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// An uploaded PDF written to a temporary file. Deleted on drop.
#[derive(Debug)]
pub struct StagedPdf {
    file: NamedTempFile,
    len: usize,
}

impl StagedPdf {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size of the staged file in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Reject anything that does not start with `%PDF`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), BizBotError> {
    if bytes.is_empty() {
        return Err(BizBotError::InvalidUpload("uploaded file is empty".into()));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(BizBotError::NotAPdf {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// Validate `bytes` and write them to a fresh temp file under `work_dir`.
pub fn stage_upload(bytes: &[u8], work_dir: &Path) -> Result<StagedPdf, BizBotError> {
    check_pdf_magic(bytes)?;

    let write_err = |source: std::io::Error| BizBotError::OutputWriteFailed {
        path: work_dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(work_dir).map_err(write_err)?;
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".pdf")
        .tempfile_in(work_dir)
        .map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;

    debug!("Staged {} byte upload at {}", bytes.len(), file.path().display());
    Ok(StagedPdf {
        file,
        len: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_magic() {
        assert!(check_pdf_magic(b"%PDF-1.7\n...").is_ok());
    }

    #[test]
    fn rejects_other_magic() {
        let err = check_pdf_magic(b"PK\x03\x04rest").unwrap_err();
        match err {
            BizBotError::NotAPdf { magic } => assert_eq!(magic, b"PK\x03\x04"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_pdf_magic(b"%P").is_err());
    }

    #[test]
    fn empty_upload_is_invalid() {
        let err = check_pdf_magic(b"").unwrap_err();
        assert!(matches!(err, BizBotError::InvalidUpload(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn staged_file_lives_in_work_dir_and_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage_upload(b"%PDF-1.4 body", dir.path()).unwrap();
        let path = staged.path().to_path_buf();

        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 body");
        assert_eq!(staged.len(), 13);

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn bad_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(stage_upload(b"hello", dir.path()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

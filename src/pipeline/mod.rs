//! Pipeline stages behind the briefing service.
//!
//! Each submodule implements exactly one step and is independently
//! testable. Only [`llm`] and [`speech`] touch the network.
//!
//! ## Data Flow
//!
//! ```text
//!                        ┌──▶ text ────▶ llm ──▶ postprocess ──▶ summary
//! upload ──▶ input ──▶ reader
//!                        └──▶ images ──▶ raster ──▶ PNG files
//!
//! summary / answer ──▶ speech ──▶ MP3
//! summary          ──▶ render ──▶ PDF
//! ```
//!
//! 1. [`input`]   stage uploaded bytes to a temp PDF file
//! 2. [`reader`]  parse the PDF; the [`reader::PdfSource`] seam
//! 3. [`text`]    page text in document order
//! 4. [`images`]  unique embedded images written as PNG
//! 5. [`raster`]  decode image streams, normalise CMYK to RGB
//! 6. [`llm`]     summary and grounded answers
//! 7. [`postprocess`] summary cleanup rules
//! 8. [`speech`]  text to MP3
//! 9. [`render`]  text to a downloadable PDF

pub mod images;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod raster;
pub mod reader;
pub mod render;
pub mod speech;
pub mod text;

use crate::error::BizBotError;
use std::path::Path;

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// never observe a partially written file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BizBotError> {
    let write_err = |source: std::io::Error| BizBotError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/audio.mp3");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("summary.pdf");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = write_atomic(&path, b"%PDF").await.unwrap_err();
        assert!(matches!(err, BizBotError::OutputWriteFailed { .. }), "got: {err:?}");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("summary.pdf")]);
    }
}

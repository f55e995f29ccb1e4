//! Image extraction: every unique embedded image → one PNG file.
//!
//! ## Algorithm
//!
//! ```text
//! reset output dir ──▶ for page (1..) ──▶ for image ref (1..) ──▶ seen? ── yes ──▶ skip
//!                                                                  │
//!                                                                  no
//!                                                                  ▼
//!                                     rasterize ──▶ CMYK? ──▶ RGB ──▶ save PNG ──▶ drop buffer
//! ```
//!
//! The seen-set is scoped to one call, so an image cited from several pages
//! is decoded and written exactly once, named after its first occurrence.
//! Output order is discovery order: page ascending, then in-page position.
//!
//! ## Output directory
//!
//! Every regular file directly inside the output directory is deleted before
//! extraction starts (the directory is created if missing). Subdirectories are
//! left alone. [`crate::service::BriefingService`] points each analyze call
//! at its own fresh subdirectory, so this reset never touches another
//! request's files.

use crate::config::ImageFailurePolicy;
use crate::error::{BizBotError, ImageError};
use crate::pipeline::reader::{ImageRef, LopdfDocument, PdfSource};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one extraction run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImageExtraction {
    /// Written PNG files in discovery order.
    pub paths: Vec<PathBuf>,
    /// Images skipped under [`ImageFailurePolicy::SkipAndWarn`].
    pub failures: Vec<ImageError>,
}

/// Open the PDF at `path` and write its unique images into `output_dir`.
pub fn extract_images(
    path: &Path,
    output_dir: &Path,
    policy: ImageFailurePolicy,
) -> Result<ImageExtraction, BizBotError> {
    let doc = LopdfDocument::open(path)?;
    extract_images_from(&doc, output_dir, policy)
}

/// Reset `output_dir` and write every unique image of `source` into it.
pub fn extract_images_from<S: PdfSource>(
    source: &S,
    output_dir: &Path,
    policy: ImageFailurePolicy,
) -> Result<ImageExtraction, BizBotError> {
    reset_output_dir(output_dir)?;

    let mut seen: HashSet<ImageRef> = HashSet::new();
    let mut result = ImageExtraction::default();

    for page in source.pages() {
        let refs = page.images()?;
        for (i, image) in refs.into_iter().enumerate() {
            let index = i + 1;
            if !seen.insert(image) {
                debug!(
                    "Page {} image {}: object {:?} already extracted, skipping",
                    page.number(),
                    index,
                    image.0
                );
                continue;
            }

            match save_image(source, image, page.number(), index, output_dir) {
                Ok(path) => {
                    debug!("Saved {}", path.display());
                    result.paths.push(path);
                }
                Err(err) => match policy {
                    ImageFailurePolicy::Abort => return Err(err.into_fatal()),
                    ImageFailurePolicy::SkipAndWarn => {
                        warn!("{}", err);
                        result.failures.push(err);
                    }
                },
            }
        }
    }

    info!(
        "Extracted {} images into {} ({} failed)",
        result.paths.len(),
        output_dir.display(),
        result.failures.len()
    );
    Ok(result)
}

/// Delete every regular file directly inside `dir`, creating it if missing.
pub fn reset_output_dir(dir: &Path) -> Result<(), BizBotError> {
    let dir_err = |source: std::io::Error| BizBotError::ImageDirectory {
        path: dir.to_path_buf(),
        source,
    };

    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(dir_err);
    }

    for entry in fs::read_dir(dir).map_err(dir_err)? {
        let entry = entry.map_err(dir_err)?;
        if entry.file_type().map_err(dir_err)?.is_file() {
            fs::remove_file(entry.path()).map_err(dir_err)?;
        }
    }
    Ok(())
}

/// `page{N}_img{M}_{8 hex}.png`
pub fn image_file_name(page: usize, index: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("page{}_img{}_{}.png", page, index, &suffix[..8])
}

fn save_image<S: PdfSource>(
    source: &S,
    image: ImageRef,
    page: usize,
    index: usize,
    output_dir: &Path,
) -> Result<PathBuf, ImageError> {
    let raster = source.rasterize(image).map_err(|e| ImageError::Rasterize {
        page,
        index,
        detail: e.to_string(),
    })?;

    let raster = if raster.needs_rgb_conversion() {
        debug!(
            "Page {} image {}: converting {}-channel CMYK to RGB",
            page,
            index,
            raster.channel_count()
        );
        raster.into_rgb()
    } else {
        raster
    };

    let path = output_dir.join(image_file_name(page, index));
    raster.save_png(&path).map_err(|e| ImageError::Write {
        page,
        index,
        path: path.clone(),
        detail: e.to_string(),
    })?;
    Ok(path)
}

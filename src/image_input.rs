//! Input collection: expand file and directory sources into a sorted list
//! of supported images.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Check if a file is a supported image format
/// Supports: jpg, jpeg, png, bmp, tiff, tif
pub fn is_supported_image_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext_lower = ext.to_string_lossy().to_lowercase();
        matches!(
            ext_lower.as_str(),
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif"
        )
    } else {
        false
    }
}

/// Find all image files in a directory (non-recursive)
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && is_supported_image_file(&path) {
            image_files.push(path);
        }
    }

    // Sort for consistent ordering
    image_files.sort();
    Ok(image_files)
}

/// Collect all image files from multiple sources (files or directories).
///
/// In strict mode a missing or unsupported source is an error; in
/// permissive mode it is logged and skipped.
pub fn collect_images_from_sources(sources: &[String], strict: bool) -> Result<Vec<PathBuf>> {
    let mut all_image_files = Vec::new();

    for source in sources {
        let source_path = Path::new(source);

        if source_path.is_file() {
            if is_supported_image_file(source_path) {
                all_image_files.push(source_path.to_path_buf());
            } else if strict {
                return Err(anyhow::anyhow!(
                    "File is not a supported image format: {}",
                    source_path.display()
                ));
            } else {
                log::warn!("⚠️  Skipping unsupported file: {}", source_path.display());
            }
        } else if source_path.is_dir() {
            all_image_files.extend(find_images_in_directory(source_path)?);
        } else if strict {
            return Err(anyhow::anyhow!("File does not exist: {source}"));
        } else {
            log::warn!("⚠️  File does not exist: {source}");
        }
    }

    Ok(all_image_files)
}

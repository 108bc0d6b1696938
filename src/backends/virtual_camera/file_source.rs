// SPDX-License-Identifier: GPL-3.0-only

//! Image files as camera frames

use crate::backends::camera::types::{BackendError, BackendResult, CameraFrame};
use crate::constants::file_formats;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if `path` has a supported image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| file_formats::is_image_extension(&e.to_lowercase()))
        .unwrap_or(false)
}

/// Load an image file as an RGBA frame
pub fn load_image_as_frame(path: &Path) -> BackendResult<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    if !path.exists() {
        return Err(BackendError::DeviceNotFound(path.display().to_string()));
    }

    let img = image::open(path).map_err(|e| {
        BackendError::Other(format!("Failed to load image '{}': {}", path.display(), e))
    })?;

    let rgba = img.to_rgba8();
    let width = rgba.width();
    let height = rgba.height();

    debug!(width, height, "Image loaded successfully");
    Ok(CameraFrame::from_rgba(width, height, rgba.into_raw()))
}

/// Image files to stream for `path`: the file itself or the images in a directory
pub fn collect_images(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    images.sort();
    images
}

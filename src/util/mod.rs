//! Filesystem and image I/O helpers.

use crate::error::PipelineError;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extensions recognised as panorama frames when scanning a directory.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Encoding of the rendered pinhole images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            OutputFormat::Jpg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(PipelineError::Configuration(format!(
                "unsupported output image format '{s}'. Supported: jpg, png"
            ))),
        }
    }
}

/// Ensure a directory exists
pub fn ensure_dir(path: &Path) -> Result<(), PipelineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    }
    Ok(())
}

/// Whether `path` has one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Encodes `image` to `path` in the given format.
pub fn save_image(
    image: &RgbImage,
    path: &Path,
    format: OutputFormat,
) -> Result<(), PipelineError> {
    image
        .save_with_format(path, format.image_format())
        .map_err(|e| match e {
            image::ImageError::IoError(source) => PipelineError::io(path, source),
            other => PipelineError::serialization(path, other),
        })
}

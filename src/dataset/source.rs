//! Panorama frame sources.

use crate::error::PipelineError;
use crate::projection::{PanoramaFrame, PanoramaProjection};
use crate::util::{is_image_file, list_image_files};
use std::io;
use std::path::{Path, PathBuf};

/// Ordered list of panorama frames on disk.
///
/// Frame indices are assigned consecutively from 0 over the kept frames, so
/// a stride of 3 over files `a, b, c, d` yields frames `0: a` and `1: d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSource {
    frames: Vec<PathBuf>,
}

impl FrameSource {
    /// Every `stride`-th image file of `dir`, in file name order.
    pub fn from_directory(dir: &Path, stride: usize) -> Result<Self, PipelineError> {
        if stride == 0 {
            return Err(PipelineError::Configuration(
                "frame stride must be at least 1".to_string(),
            ));
        }
        let frames: Vec<PathBuf> = list_image_files(dir)?
            .into_iter()
            .step_by(stride)
            .collect();
        if frames.is_empty() {
            return Err(PipelineError::io(
                dir,
                io::Error::new(io::ErrorKind::NotFound, "no panorama frames found"),
            ));
        }
        Ok(FrameSource { frames })
    }

    /// A directory of frames or a single panorama image.
    pub fn from_path(path: &Path, stride: usize) -> Result<Self, PipelineError> {
        if path.is_file() {
            if !is_image_file(path) {
                return Err(PipelineError::io(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "not a supported image file"),
                ));
            }
            return Ok(FrameSource {
                frames: vec![path.to_path_buf()],
            });
        }
        Self::from_directory(path, stride)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn path(&self, frame_index: usize) -> Option<&Path> {
        self.frames.get(frame_index).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Path)> {
        self.frames.iter().map(PathBuf::as_path).enumerate()
    }

    /// Decodes frame `frame_index`.
    pub fn load(
        &self,
        frame_index: usize,
        projection: PanoramaProjection,
    ) -> Result<PanoramaFrame, PipelineError> {
        let path = self.path(frame_index).ok_or_else(|| {
            PipelineError::projection(
                frame_index,
                None,
                format!("source has only {} frames", self.frames.len()),
            )
        })?;
        PanoramaFrame::load(frame_index, projection, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::fs;
    use tempfile::tempdir;

    fn write_frames(dir: &Path, names: &[&str]) {
        for name in names {
            RgbImage::new(8, 4).save(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_stride_and_indices() {
        let dir = tempdir().unwrap();
        write_frames(dir.path(), &["f_03.png", "f_01.png", "f_02.png", "f_04.png"]);
        fs::write(dir.path().join("readme.txt"), "not a frame").unwrap();

        let source = FrameSource::from_directory(dir.path(), 2).unwrap();
        let names: Vec<(usize, String)> = source
            .iter()
            .map(|(i, p)| (i, p.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![(0, "f_01.png".to_string()), (1, "f_03.png".to_string())]
        );
    }

    #[test]
    fn test_empty_directory_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FrameSource::from_directory(dir.path(), 1),
            Err(PipelineError::Io { .. })
        ));
        assert!(matches!(
            FrameSource::from_directory(dir.path(), 0),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_single_file_and_load() {
        let dir = tempdir().unwrap();
        write_frames(dir.path(), &["pano.png"]);
        let source = FrameSource::from_path(&dir.path().join("pano.png"), 5).unwrap();
        assert_eq!(source.len(), 1);

        let frame = source
            .load(0, PanoramaProjection::equirectangular())
            .unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
        assert_eq!(frame.source.as_deref(), source.path(0));
        assert!(source.load(1, PanoramaProjection::equirectangular()).is_err());
    }
}

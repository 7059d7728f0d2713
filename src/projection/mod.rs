//! The virtual pinhole projector.
//!
//! A panorama covers the full sphere, so every ray leaving a virtual camera
//! hits a valid panorama pixel. The projector turns each destination pixel
//! into a ray, rotates it into the panorama frame with the lattice's
//! precomputed rotation, and samples the panorama through the inverse mapping
//! of its storage projection.

use crate::error::PipelineError;
use image::{Rgb, RgbImage};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod cubemap;
pub mod equirect;
pub mod projector;
pub mod sampling;

pub use cubemap::{CubeFace, CubemapSampler};
pub use equirect::EquirectSampler;
pub use projector::ViewProjector;

/// Storage projection of a panorama frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Equirectangular,
    Cubemap,
}

/// Arrangement of the six faces inside a cubemap frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CubemapLayout {
    /// One row: Front, Right, Back, Left, Up, Down.
    #[default]
    Horizon,
    /// 4x3 cross with Up above and Down below Front.
    Dice,
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionKind::Equirectangular => f.write_str("equirectangular"),
            ProjectionKind::Cubemap => f.write_str("cubemap"),
        }
    }
}

impl FromStr for ProjectionKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "equirectangular" | "erp" => Ok(ProjectionKind::Equirectangular),
            "cubemap" => Ok(ProjectionKind::Cubemap),
            _ => Err(PipelineError::Configuration(format!(
                "unsupported panorama projection '{s}'. Supported: equirectangular, cubemap"
            ))),
        }
    }
}

impl FromStr for CubemapLayout {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "horizon" => Ok(CubemapLayout::Horizon),
            "dice" => Ok(CubemapLayout::Dice),
            _ => Err(PipelineError::Configuration(format!(
                "unsupported cubemap layout '{s}'. Supported: horizon, dice"
            ))),
        }
    }
}

/// Projection kind plus the layout details needed to invert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanoramaProjection {
    pub kind: ProjectionKind,
    #[serde(default)]
    pub cubemap_layout: CubemapLayout,
}

impl Default for PanoramaProjection {
    fn default() -> Self {
        PanoramaProjection {
            kind: ProjectionKind::Equirectangular,
            cubemap_layout: CubemapLayout::Horizon,
        }
    }
}

impl PanoramaProjection {
    pub fn equirectangular() -> Self {
        Self::default()
    }

    pub fn cubemap(layout: CubemapLayout) -> Self {
        PanoramaProjection {
            kind: ProjectionKind::Cubemap,
            cubemap_layout: layout,
        }
    }

    /// Checks that a frame's pixel dimensions fit this projection.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), String> {
        if width == 0 || height == 0 {
            return Err(format!("empty frame {width}x{height}"));
        }
        let ok = match (self.kind, self.cubemap_layout) {
            (ProjectionKind::Equirectangular, _) => width == 2 * height,
            (ProjectionKind::Cubemap, CubemapLayout::Horizon) => width == 6 * height,
            (ProjectionKind::Cubemap, CubemapLayout::Dice) => {
                width % 4 == 0 && 3 * width == 4 * height
            }
        };
        if ok {
            Ok(())
        } else {
            let expected = match (self.kind, self.cubemap_layout) {
                (ProjectionKind::Equirectangular, _) => "2:1",
                (ProjectionKind::Cubemap, CubemapLayout::Horizon) => "6:1",
                (ProjectionKind::Cubemap, CubemapLayout::Dice) => "4:3 with square faces",
            };
            Err(format!(
                "{width}x{height} frame does not match {} layout ({expected})",
                self.kind
            ))
        }
    }
}

/// Inverse mapping of a panorama storage projection.
pub trait SphericalSampler {
    /// Color seen along `ray`, a direction in the panorama frame.
    fn sample(&self, ray: &Vector3<f64>) -> Rgb<u8>;
}

/// One captured panorama, read-only for the projector.
#[derive(Debug, Clone)]
pub struct PanoramaFrame {
    pub frame_index: usize,
    pub projection: PanoramaProjection,
    pub image: RgbImage,
    pub source: Option<PathBuf>,
}

impl PanoramaFrame {
    /// Wraps an in-memory image after checking its dimensions.
    pub fn new(
        frame_index: usize,
        projection: PanoramaProjection,
        image: RgbImage,
    ) -> Result<Self, PipelineError> {
        projection
            .check_dimensions(image.width(), image.height())
            .map_err(|reason| PipelineError::projection(frame_index, None, reason))?;
        Ok(PanoramaFrame {
            frame_index,
            projection,
            image,
            source: None,
        })
    }

    /// Decodes a frame from disk.
    ///
    /// A missing file is an IO error; an undecodable or wrongly sized image is
    /// a projection error for this frame.
    pub fn load(
        frame_index: usize,
        projection: PanoramaProjection,
        path: &Path,
    ) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "panorama frame not found"),
            ));
        }
        let image = image::open(path)
            .map_err(|e| {
                PipelineError::projection(
                    frame_index,
                    None,
                    format!("failed to decode {}: {e}", path.display()),
                )
            })?
            .to_rgb8();
        let mut frame = Self::new(frame_index, projection, image)?;
        frame.source = Some(path.to_path_buf());
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_kind_parsing() {
        assert_eq!(
            "Equirectangular".parse::<ProjectionKind>().unwrap(),
            ProjectionKind::Equirectangular
        );
        assert_eq!(
            "cubemap".parse::<ProjectionKind>().unwrap(),
            ProjectionKind::Cubemap
        );
        assert!(matches!(
            "fisheye".parse::<ProjectionKind>(),
            Err(PipelineError::Configuration(_))
        ));
        assert!("cross".parse::<CubemapLayout>().is_err());
    }

    #[test]
    fn test_dimension_checks() {
        assert!(PanoramaProjection::equirectangular()
            .check_dimensions(200, 100)
            .is_ok());
        assert!(PanoramaProjection::equirectangular()
            .check_dimensions(200, 120)
            .is_err());
        assert!(PanoramaProjection::cubemap(CubemapLayout::Horizon)
            .check_dimensions(600, 100)
            .is_ok());
        assert!(PanoramaProjection::cubemap(CubemapLayout::Dice)
            .check_dimensions(400, 300)
            .is_ok());
        assert!(PanoramaProjection::cubemap(CubemapLayout::Dice)
            .check_dimensions(402, 300)
            .is_err());
    }

    #[test]
    fn test_frame_rejects_wrong_aspect() {
        let err = PanoramaFrame::new(
            4,
            PanoramaProjection::equirectangular(),
            RgbImage::new(100, 100),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Projection { frame_index: 4, .. }
        ));
    }

    #[test]
    fn test_projection_yaml_defaults_layout() {
        let projection: PanoramaProjection =
            serde_yaml::from_str("kind: equirectangular").unwrap();
        assert_eq!(projection, PanoramaProjection::equirectangular());
        assert!(serde_yaml::from_str::<PanoramaProjection>("kind: fisheye").is_err());
    }
}

//! Camera models for the virtual views cut out of a panorama.
//!
//! Only distortion-free rectilinear cameras are produced here; the
//! [`ColmapCameraModel`] identifier decides how the same intrinsics are
//! parameterised for the reconstruction engine.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod pinhole;

pub use pinhole::PinholeModel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Field of view must lie in (0, 180) degrees, got {0}")]
    InvalidFieldOfView(f64),
    #[error("Resolution must be non-zero, got {0}x{1}")]
    InvalidResolution(u32, u32),
    #[error("Unsupported camera model: {0}")]
    UnsupportedModel(String),
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point in camera coordinates to pixel coordinates
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject pixel coordinates to a unit ray in camera coordinates
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;
}

/// Camera model identifiers understood by the reconstruction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColmapCameraModel {
    #[default]
    #[serde(rename = "PINHOLE")]
    Pinhole,
    #[serde(rename = "SIMPLE_PINHOLE")]
    SimplePinhole,
    #[serde(rename = "SIMPLE_RADIAL")]
    SimpleRadial,
}

impl ColmapCameraModel {
    pub const ALL: [ColmapCameraModel; 3] = [
        ColmapCameraModel::Pinhole,
        ColmapCameraModel::SimplePinhole,
        ColmapCameraModel::SimpleRadial,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ColmapCameraModel::Pinhole => "PINHOLE",
            ColmapCameraModel::SimplePinhole => "SIMPLE_PINHOLE",
            ColmapCameraModel::SimpleRadial => "SIMPLE_RADIAL",
        }
    }

    /// Whether the model has a single focal length shared by both axes.
    pub fn is_single_focal(&self) -> bool {
        !matches!(self, ColmapCameraModel::Pinhole)
    }
}

impl fmt::Display for ColmapCameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColmapCameraModel {
    type Err = CameraModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PINHOLE" => Ok(ColmapCameraModel::Pinhole),
            "SIMPLE_PINHOLE" => Ok(ColmapCameraModel::SimplePinhole),
            "SIMPLE_RADIAL" => Ok(ColmapCameraModel::SimpleRadial),
            _ => Err(CameraModelError::UnsupportedModel(format!(
                "{s}. Supported models: PINHOLE, SIMPLE_PINHOLE, SIMPLE_RADIAL"
            ))),
        }
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        let positive = |f: f64| f.is_finite() && f > 0.0;
        if !positive(intrinsics.fx) || !positive(intrinsics.fy) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CameraModelError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::InvalidResolution(
                resolution.width,
                resolution.height,
            ));
        }
        Ok(())
    }

    pub fn validate_fov_deg(fov_deg: f64) -> Result<(), CameraModelError> {
        if !fov_deg.is_finite() || fov_deg <= 0.0 || fov_deg >= 180.0 {
            return Err(CameraModelError::InvalidFieldOfView(fov_deg));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colmap_model_parsing() {
        assert_eq!(
            "pinhole".parse::<ColmapCameraModel>().unwrap(),
            ColmapCameraModel::Pinhole
        );
        assert_eq!(
            "SIMPLE_RADIAL".parse::<ColmapCameraModel>().unwrap(),
            ColmapCameraModel::SimpleRadial
        );
        assert!(matches!(
            "OPENCV_FISHEYE".parse::<ColmapCameraModel>(),
            Err(CameraModelError::UnsupportedModel(_))
        ));
        for model in ColmapCameraModel::ALL {
            assert_eq!(model.name().parse::<ColmapCameraModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_colmap_model_serializes_as_engine_name() {
        let json = serde_json::to_string(&ColmapCameraModel::SimplePinhole).unwrap();
        assert_eq!(json, "\"SIMPLE_PINHOLE\"");
    }

    #[test]
    fn test_validate_intrinsics_rejects_bad_focal() {
        let good = Intrinsics {
            fx: 320.0,
            fy: 320.0,
            cx: 320.0,
            cy: 320.0,
        };
        assert!(validation::validate_intrinsics(&good).is_ok());
        for fx in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let bad = Intrinsics { fx, ..good };
            assert!(
                matches!(
                    validation::validate_intrinsics(&bad),
                    Err(CameraModelError::FocalLengthMustBePositive)
                ),
                "{fx}"
            );
        }
    }

    #[test]
    fn test_default_model_is_pinhole() {
        assert_eq!(ColmapCameraModel::default(), ColmapCameraModel::Pinhole);
    }

    #[test]
    fn test_validate_fov() {
        assert!(validation::validate_fov_deg(90.0).is_ok());
        assert!(validation::validate_fov_deg(0.0).is_err());
        assert!(validation::validate_fov_deg(180.0).is_err());
        assert!(validation::validate_fov_deg(f64::NAN).is_err());
    }
}

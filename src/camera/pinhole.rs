//! Implements the Pinhole camera model used for every virtual view.
//!
//! This module provides the [`PinholeModel`] struct and its associated methods
//! for representing a distortion-free rectilinear camera. It adheres to the
//! [`CameraModel`] trait defined in the parent `camera` module ([`crate::camera`]).
//!
//! Pixel coordinates follow the reconstruction engine's convention: the
//! center of pixel `(i, j)` sits at `(i + 0.5, j + 0.5)`, so a principal
//! point of `(width / 2, height / 2)` is the exact image center.

use crate::camera::{
    validation, CameraModel, CameraModelError, ColmapCameraModel, Intrinsics, Resolution,
};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when a single-focal model is requested.
const SINGLE_FOCAL_TOLERANCE: f64 = 1e-9;

/// Represents a Pinhole camera model.
///
/// This struct holds the intrinsic parameters (focal length, principal point)
/// and image resolution for a pinhole camera. It assumes no lens distortion.
///
/// # Examples
///
/// ```rust
/// use omni_rig::camera::pinhole::PinholeModel;
/// use omni_rig::camera::Resolution;
///
/// let resolution = Resolution { width: 640, height: 480 };
/// let model = PinholeModel::from_fov_deg(90.0, 90.0, resolution).unwrap();
/// assert!((model.intrinsics.fx - 320.0).abs() < 1e-9);
/// assert!((model.intrinsics.fy - 240.0).abs() < 1e-9);
/// assert_eq!(model.intrinsics.cx, 320.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] from explicit intrinsics and resolution.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidResolution`]
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Builds the camera that covers the given field of view at the given resolution.
    ///
    /// Focal lengths follow `f = (size / 2) / tan(fov / 2)` per axis and the
    /// principal point is the image center.
    ///
    /// # Arguments
    ///
    /// * `fov_h_rad` - Horizontal field of view in radians, in `(0, pi)`.
    /// * `fov_v_rad` - Vertical field of view in radians, in `(0, pi)`.
    /// * `resolution` - Output image size in pixels.
    pub fn from_fov(
        fov_h_rad: f64,
        fov_v_rad: f64,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        validation::validate_fov_deg(fov_h_rad.to_degrees())?;
        validation::validate_fov_deg(fov_v_rad.to_degrees())?;
        validation::validate_resolution(&resolution)?;

        let half_w = resolution.width as f64 / 2.0;
        let half_h = resolution.height as f64 / 2.0;
        let intrinsics = Intrinsics {
            fx: half_w / (fov_h_rad / 2.0).tan(),
            fy: half_h / (fov_v_rad / 2.0).tan(),
            cx: half_w,
            cy: half_h,
        };
        Self::new(intrinsics, resolution)
    }

    /// Same as [`PinholeModel::from_fov`] with angles in degrees.
    pub fn from_fov_deg(
        fov_h_deg: f64,
        fov_v_deg: f64,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        Self::from_fov(fov_h_deg.to_radians(), fov_v_deg.to_radians(), resolution)
    }

    /// Returns the (non-normalized, `z = 1`) ray through the center of pixel `(col, row)`.
    ///
    /// This is the hot-path variant of [`CameraModel::unproject`] used while
    /// rendering: no bounds check and no normalization.
    #[inline]
    pub fn pixel_ray(&self, col: u32, row: u32) -> Vector3<f64> {
        Vector3::new(
            (col as f64 + 0.5 - self.intrinsics.cx) / self.intrinsics.fx,
            (row as f64 + 0.5 - self.intrinsics.cy) / self.intrinsics.fy,
            1.0,
        )
    }

    /// Checks that the intrinsics can be expressed by the given engine model.
    pub fn check_model(&self, model: ColmapCameraModel) -> Result<(), CameraModelError> {
        if model.is_single_focal() {
            let Intrinsics { fx, fy, .. } = self.intrinsics;
            if (fx - fy).abs() > SINGLE_FOCAL_TOLERANCE * fx.max(fy) {
                return Err(CameraModelError::UnsupportedModel(format!(
                    "{model} needs fx == fy but the field of view gives fx={fx}, fy={fy}"
                )));
            }
        }
        Ok(())
    }

    /// The engine-native parameter vector for `model`.
    ///
    /// * `PINHOLE`: `fx, fy, cx, cy`
    /// * `SIMPLE_PINHOLE`: `f, cx, cy`
    /// * `SIMPLE_RADIAL`: `f, cx, cy, k` with `k = 0`
    pub fn colmap_params(&self, model: ColmapCameraModel) -> Result<Vec<f64>, CameraModelError> {
        self.check_model(model)?;
        let Intrinsics { fx, fy, cx, cy } = self.intrinsics;
        Ok(match model {
            ColmapCameraModel::Pinhole => vec![fx, fy, cx, cy],
            ColmapCameraModel::SimplePinhole => vec![fx, cx, cy],
            ColmapCameraModel::SimpleRadial => vec![fx, cx, cy, 0.0],
        })
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates.
    ///
    /// This method applies the pinhole camera projection equations:
    /// `u = fx * X / Z + cx`
    /// `v = fy * Y / Z + cy`
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too
    ///   close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If the projected 2D point falls
    ///   outside the camera's resolution.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let u: f64 = self.intrinsics.fx * point_3d.x / point_3d.z + self.intrinsics.cx;
        let v: f64 = self.intrinsics.fy * point_3d.y / point_3d.z + self.intrinsics.cy;

        if u < 0.0
            || u >= self.resolution.width as f64
            || v < 0.0
            || v >= self.resolution.height as f64
        {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(Vector2::new(u, v))
    }

    /// Unprojects a 2D image point to a unit ray in camera coordinates.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If the input 2D point is outside the
    ///   camera's resolution.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if point_2d.x < 0.0
            || point_2d.x >= self.resolution.width as f64
            || point_2d.y < 0.0
            || point_2d.y >= self.resolution.height as f64
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let mx: f64 = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my: f64 = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let norm_inv: f64 = 1.0 / (1.0 + mx * mx + my * my).sqrt();

        Ok(Vector3::new(mx * norm_inv, my * norm_inv, norm_inv))
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_resolution(&self.resolution)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }
}

//! Spherical geometry shared by the sampler, the projector and the rig assembler.
//!
//! Frame conventions:
//!
//! * Camera frame: `x` right, `y` down, `z` forward (the pinhole convention of
//!   [`crate::camera::PinholeModel`]).
//! * Panorama frame: the camera frame of the view at pitch 0 / yaw 0. Positive
//!   yaw turns toward `+x` (right), positive pitch tilts toward `-y` (up).
//! * `pano_from_cam = R_y(yaw) * R_x(pitch)`: the pitch is applied first in
//!   camera space, then the yaw about the panorama's vertical axis.
//! * Longitude is `atan2(x, z)` in `(-pi, pi]`, latitude is `asin(-y)` in
//!   `[-pi/2, pi/2]` (up positive).

use nalgebra::{Rotation3, UnitQuaternion, Vector3};

pub mod lattice;

pub use lattice::{SamplingConfig, ViewDirection, ViewLattice};

/// Values smaller than this are written as exact zeros in serialized rotations.
const SNAP_EPSILON: f64 = 1e-12;

/// Rotation taking rays from the virtual camera frame into the panorama frame.
pub fn pano_from_cam(pitch_rad: f64, yaw_rad: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), yaw_rad)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), pitch_rad)
}

/// Longitude and latitude (radians) of a direction in the panorama frame.
#[inline]
pub fn ray_to_lon_lat(ray: &Vector3<f64>) -> (f64, f64) {
    let norm = ray.norm();
    let lon = ray.x.atan2(ray.z);
    let lat = (-ray.y / norm).clamp(-1.0, 1.0).asin();
    (lon, lat)
}

/// Unit direction for a longitude / latitude pair (radians).
pub fn lon_lat_to_ray(lon: f64, lat: f64) -> Vector3<f64> {
    Vector3::new(lat.cos() * lon.sin(), -lat.sin(), lat.cos() * lon.cos())
}

/// Angle in radians between two directions.
pub fn angular_distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let cos = a.normalize().dot(&b.normalize());
    cos.clamp(-1.0, 1.0).acos()
}

/// Wraps a yaw angle in degrees into `(-180, 180]`.
pub fn normalize_yaw_deg(yaw_deg: f64) -> f64 {
    let wrapped = yaw_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Quaternion `[w, x, y, z]` of a rotation, canonicalised to `w >= 0`.
///
/// Near-zero components are snapped to `0.0` so repeated runs serialize
/// identically.
pub fn quaternion_wxyz(rotation: &Rotation3<f64>) -> [f64; 4] {
    let q = UnitQuaternion::from_rotation_matrix(rotation);
    let mut wxyz = [q.w, q.i, q.j, q.k];
    if wxyz[0] < 0.0 {
        for c in wxyz.iter_mut() {
            *c = -*c;
        }
    }
    for c in wxyz.iter_mut() {
        if c.abs() < SNAP_EPSILON {
            *c = 0.0;
        }
    }
    wxyz
}

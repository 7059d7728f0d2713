//! Cubemap inverse mapping: dominant-axis face selection plus a planar lookup
//! inside the selected face.
//!
//! Each face is stored as seen by a pinhole camera at the sphere center with a
//! 90 degree field of view, oriented like the lattice view that looks along
//! the face axis: Front is pitch 0 / yaw 0, Right yaw 90, Back yaw 180, Left
//! yaw -90, Up pitch 90 and Down pitch -90.

use super::sampling::{bilinear, Region};
use super::{CubemapLayout, SphericalSampler};
use image::{Rgb, RgbImage};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    Front,
    Right,
    Back,
    Left,
    Up,
    Down,
}

impl CubeFace {
    /// Face hit by `ray` and the in-face coordinates `(s, t)` in `[-1, 1]`,
    /// `s` to the face's right and `t` toward the face's bottom.
    pub fn locate(ray: &Vector3<f64>) -> (CubeFace, f64, f64) {
        let (x, y, z) = (ray.x, ray.y, ray.z);
        let (ax, ay, az) = (x.abs(), y.abs(), z.abs());

        if az >= ax && az >= ay {
            if z > 0.0 {
                (CubeFace::Front, x / az, y / az)
            } else {
                (CubeFace::Back, -x / az, y / az)
            }
        } else if ax >= ay {
            if x > 0.0 {
                (CubeFace::Right, -z / ax, y / ax)
            } else {
                (CubeFace::Left, z / ax, y / ax)
            }
        } else if y < 0.0 {
            (CubeFace::Up, x / ay, z / ay)
        } else {
            (CubeFace::Down, x / ay, -z / ay)
        }
    }

    /// Column and row of the face, in face units, inside a layout.
    pub fn tile(&self, layout: CubemapLayout) -> (u32, u32) {
        match layout {
            CubemapLayout::Horizon => {
                let column = match self {
                    CubeFace::Front => 0,
                    CubeFace::Right => 1,
                    CubeFace::Back => 2,
                    CubeFace::Left => 3,
                    CubeFace::Up => 4,
                    CubeFace::Down => 5,
                };
                (column, 0)
            }
            CubemapLayout::Dice => match self {
                CubeFace::Up => (1, 0),
                CubeFace::Left => (0, 1),
                CubeFace::Front => (1, 1),
                CubeFace::Right => (2, 1),
                CubeFace::Back => (3, 1),
                CubeFace::Down => (1, 2),
            },
        }
    }
}

pub struct CubemapSampler<'a> {
    image: &'a RgbImage,
    layout: CubemapLayout,
    face_size: u32,
}

impl<'a> CubemapSampler<'a> {
    /// The frame must already match `layout` (see
    /// [`super::PanoramaProjection::check_dimensions`]).
    pub fn new(image: &'a RgbImage, layout: CubemapLayout) -> Self {
        let face_size = match layout {
            CubemapLayout::Horizon => image.height(),
            CubemapLayout::Dice => image.width() / 4,
        };
        CubemapSampler {
            image,
            layout,
            face_size,
        }
    }

    pub fn face_region(&self, face: CubeFace) -> Region {
        let (column, row) = face.tile(self.layout);
        Region {
            x: column * self.face_size,
            y: row * self.face_size,
            width: self.face_size,
            height: self.face_size,
        }
    }
}

impl SphericalSampler for CubemapSampler<'_> {
    fn sample(&self, ray: &Vector3<f64>) -> Rgb<u8> {
        let (face, s, t) = CubeFace::locate(ray);
        let size = self.face_size as f64;
        let u = (s + 1.0) * 0.5 * size - 0.5;
        let v = (t + 1.0) * 0.5 * size - 0.5;
        bilinear(self.image, self.face_region(face), u, v, false)
    }
}

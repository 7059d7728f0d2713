//! Bilinear lookup into a rectangular region of an RGB panorama.

use image::{Rgb, RgbImage};

/// A pixel rectangle inside a panorama (a whole equirectangular frame or one cube face).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(image: &RgbImage) -> Self {
        Region {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Samples `image` at continuous region coordinates `(u, v)`, where integer
/// values address pixel centers.
///
/// Columns wrap around when `wrap_x` is set (the seam of an equirectangular
/// frame), otherwise they are clamped to the region like rows always are.
pub fn bilinear(image: &RgbImage, region: Region, u: f64, v: f64, wrap_x: bool) -> Rgb<u8> {
    let w = region.width as i64;
    let h = region.height as i64;

    let u0f = u.floor();
    let v0f = v.floor();
    let du = u - u0f;
    let dv = v - v0f;
    let u0 = u0f as i64;
    let v0 = v0f as i64;

    let col = |c: i64| -> u32 {
        let c = if wrap_x {
            c.rem_euclid(w)
        } else {
            c.clamp(0, w - 1)
        };
        region.x + c as u32
    };
    let row = |r: i64| -> u32 { region.y + r.clamp(0, h - 1) as u32 };

    let (c0, c1) = (col(u0), col(u0 + 1));
    let (r0, r1) = (row(v0), row(v0 + 1));

    let p00 = image.get_pixel(c0, r0);
    let p10 = image.get_pixel(c1, r0);
    let p01 = image.get_pixel(c0, r1);
    let p11 = image.get_pixel(c1, r1);

    let mut out = [0u8; 3];
    for (channel, value) in out.iter_mut().enumerate() {
        let top = p00[channel] as f64 * (1.0 - du) + p10[channel] as f64 * du;
        let bottom = p01[channel] as f64 * (1.0 - du) + p11[channel] as f64 * du;
        let mixed = top * (1.0 - dv) + bottom * dv;
        *value = mixed.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

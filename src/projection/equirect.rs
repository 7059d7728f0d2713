//! Equirectangular inverse mapping: longitude spans the width, latitude the height.

use super::sampling::{bilinear, Region};
use super::SphericalSampler;
use crate::geometry::ray_to_lon_lat;
use image::{Rgb, RgbImage};
use nalgebra::Vector3;
use std::f64::consts::PI;

pub struct EquirectSampler<'a> {
    image: &'a RgbImage,
    region: Region,
}

impl<'a> EquirectSampler<'a> {
    pub fn new(image: &'a RgbImage) -> Self {
        EquirectSampler {
            image,
            region: Region::full(image),
        }
    }

    /// Continuous pixel coordinates (pixel centers at integers) of a direction.
    pub fn pixel_of(&self, ray: &Vector3<f64>) -> (f64, f64) {
        let (lon, lat) = ray_to_lon_lat(ray);
        let u = (lon / (2.0 * PI) + 0.5) * self.region.width as f64 - 0.5;
        let v = (0.5 - lat / PI) * self.region.height as f64 - 0.5;
        (u, v)
    }
}

impl SphericalSampler for EquirectSampler<'_> {
    fn sample(&self, ray: &Vector3<f64>) -> Rgb<u8> {
        let (u, v) = self.pixel_of(ray);
        bilinear(self.image, self.region, u, v, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::lon_lat_to_ray;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_hits_image_center() {
        let image = RgbImage::new(400, 200);
        let sampler = EquirectSampler::new(&image);
        let (u, v) = sampler.pixel_of(&Vector3::z());
        // Forward sits on the boundary between the two middle columns and rows.
        assert_relative_eq!(u, 199.5);
        assert_relative_eq!(v, 99.5);
    }

    #[test]
    fn test_right_and_up_directions() {
        let image = RgbImage::new(400, 200);
        let sampler = EquirectSampler::new(&image);

        let (u, _) = sampler.pixel_of(&Vector3::x());
        assert_relative_eq!(u, 299.5, epsilon = 1e-9);

        let (_, v) = sampler.pixel_of(&lon_lat_to_ray(0.0, 45f64.to_radians()));
        assert_relative_eq!(v, 49.5, epsilon = 1e-9);
    }

    #[test]
    fn test_samples_pixel_block() {
        // Left half red, right half blue.
        let image = RgbImage::from_fn(400, 200, |x, _| {
            if x < 200 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let sampler = EquirectSampler::new(&image);
        assert_eq!(sampler.sample(&Vector3::x()), Rgb([0, 0, 255]));
        assert_eq!(sampler.sample(&-Vector3::x()), Rgb([255, 0, 0]));
    }
}

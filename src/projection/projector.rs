//! Rendering of virtual pinhole views out of a panorama frame.

use super::{
    CubemapSampler, EquirectSampler, PanoramaFrame, PanoramaProjection, ProjectionKind,
    SphericalSampler,
};
use crate::camera::{CameraModel, PinholeModel, Resolution};
use crate::error::PipelineError;
use crate::geometry::{SamplingConfig, ViewLattice};
use image::RgbImage;
use nalgebra::Rotation3;

/// Immutable projector state shared by every projection unit of a run.
///
/// The camera intrinsics and the lattice rotation table are computed once
/// here, so every frame renders with bit-identical geometry.
#[derive(Debug, Clone)]
pub struct ViewProjector {
    camera: PinholeModel,
    fov_deg: (f64, f64),
    lattice: ViewLattice,
    projection: PanoramaProjection,
}

impl ViewProjector {
    /// Validates the sampling configuration and precomputes the lattice and
    /// the shared pinhole camera.
    pub fn new(
        config: &SamplingConfig,
        projection: PanoramaProjection,
    ) -> Result<Self, PipelineError> {
        let lattice = ViewLattice::from_config(config)?;
        let camera = PinholeModel::from_fov_deg(
            config.fov_h,
            config.fov_v,
            Resolution {
                width: config.width,
                height: config.height,
            },
        )?;
        Ok(ViewProjector {
            camera,
            fov_deg: (config.fov_h, config.fov_v),
            lattice,
            projection,
        })
    }

    pub fn camera(&self) -> &PinholeModel {
        &self.camera
    }

    /// Horizontal and vertical field of view in degrees, as configured.
    pub fn fov_deg(&self) -> (f64, f64) {
        self.fov_deg
    }

    pub fn lattice(&self) -> &ViewLattice {
        &self.lattice
    }

    pub fn projection(&self) -> PanoramaProjection {
        self.projection
    }

    /// Renders lattice slot `slot` of `frame`.
    pub fn render(&self, frame: &PanoramaFrame, slot: usize) -> Result<RgbImage, PipelineError> {
        if slot >= self.lattice.len() {
            return Err(PipelineError::projection(
                frame.frame_index,
                None,
                format!("slot index {slot} outside lattice of {}", self.lattice.len()),
            ));
        }
        if frame.projection != self.projection {
            return Err(PipelineError::projection(
                frame.frame_index,
                Some(&self.lattice.slot_ids()[slot]),
                format!(
                    "frame is {:?} but the run is configured for {:?}",
                    frame.projection, self.projection
                ),
            ));
        }

        let rotation = self.lattice.rotation(slot);
        let image = match self.projection.kind {
            ProjectionKind::Equirectangular => {
                render_view(&EquirectSampler::new(&frame.image), &self.camera, rotation)
            }
            ProjectionKind::Cubemap => render_view(
                &CubemapSampler::new(&frame.image, self.projection.cubemap_layout),
                &self.camera,
                rotation,
            ),
        };
        Ok(image)
    }
}

/// Resamples a panorama into one pinhole image.
pub fn render_view<S: SphericalSampler>(
    sampler: &S,
    camera: &PinholeModel,
    pano_from_cam: &Rotation3<f64>,
) -> RgbImage {
    let Resolution { width, height } = camera.get_resolution();
    let mut out = RgbImage::new(width, height);
    for (col, row, pixel) in out.enumerate_pixels_mut() {
        let ray = pano_from_cam * camera.pixel_ray(col, row);
        *pixel = sampler.sample(&ray);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{angular_distance, lon_lat_to_ray, pano_from_cam};
    use crate::projection::CubemapLayout;
    use image::Rgb;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    const CAP: Rgb<u8> = Rgb([250, 20, 20]);
    const BACKGROUND: Rgb<u8> = Rgb([10, 10, 200]);

    fn small_config() -> SamplingConfig {
        SamplingConfig {
            base_pitches: vec![-35.0, 35.0],
            yaw_steps: 4,
            yaw_offset: 0.0,
            fov_h: 90.0,
            fov_v: 90.0,
            width: 32,
            height: 32,
        }
    }

    /// Equirectangular panorama with a flat-colored cap of `radius_deg` around `center`.
    fn equirect_with_cap(center: &Vector3<f64>, radius_deg: f64) -> RgbImage {
        let (w, h) = (360, 180);
        RgbImage::from_fn(w, h, |x, y| {
            let lon = ((x as f64 + 0.5) / w as f64 - 0.5) * 2.0 * PI;
            let lat = (0.5 - (y as f64 + 0.5) / h as f64) * PI;
            let dir = lon_lat_to_ray(lon, lat);
            if angular_distance(&dir, center) < radius_deg.to_radians() {
                CAP
            } else {
                BACKGROUND
            }
        })
    }

    #[test]
    fn test_center_pixel_sees_cap_for_every_direction() {
        let config = small_config();
        let projector = ViewProjector::new(&config, PanoramaProjection::equirectangular()).unwrap();

        for (slot, (slot_id, direction, _)) in projector.lattice().iter().enumerate() {
            let pano = equirect_with_cap(&direction.axis(), 12.0);
            let frame =
                PanoramaFrame::new(0, PanoramaProjection::equirectangular(), pano).unwrap();
            let view = projector.render(&frame, slot).unwrap();

            assert_eq!(*view.get_pixel(16, 16), CAP, "{slot_id}");
            // A far corner of a 90 degree view is well outside a 12 degree cap.
            assert_eq!(*view.get_pixel(0, 0), BACKGROUND, "{slot_id}");
        }
    }

    #[test]
    fn test_cubemap_center_pixel_sees_cap() {
        let config = small_config();
        let projection = PanoramaProjection::cubemap(CubemapLayout::Horizon);
        let projector = ViewProjector::new(&config, projection).unwrap();
        let face = 64u32;

        for (slot, (slot_id, direction, _)) in projector.lattice().iter().enumerate() {
            let center = direction.axis();
            // Paint the cube by asking, for each texel, which direction it stores.
            let mut pano = RgbImage::new(6 * face, face);
            let faces = [
                (0.0, 0.0),
                (0.0, 90.0),
                (0.0, 180.0),
                (0.0, -90.0),
                (90.0, 0.0),
                (-90.0, 0.0),
            ];
            for (index, (pitch, yaw)) in faces.iter().enumerate() {
                let rot = pano_from_cam(f64::to_radians(*pitch), f64::to_radians(*yaw));
                for y in 0..face {
                    for x in 0..face {
                        let s = (x as f64 + 0.5) / face as f64 * 2.0 - 1.0;
                        let t = (y as f64 + 0.5) / face as f64 * 2.0 - 1.0;
                        let dir = rot * Vector3::new(s, t, 1.0);
                        let color = if angular_distance(&dir, &center) < 12f64.to_radians() {
                            CAP
                        } else {
                            BACKGROUND
                        };
                        pano.put_pixel(index as u32 * face + x, y, color);
                    }
                }
            }

            let frame = PanoramaFrame::new(3, projection, pano).unwrap();
            let view = projector.render(&frame, slot).unwrap();
            assert_eq!(*view.get_pixel(16, 16), CAP, "{slot_id}");
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let config = small_config();
        let projector = ViewProjector::new(&config, PanoramaProjection::equirectangular()).unwrap();
        let pano = equirect_with_cap(&Vector3::new(0.3, -0.2, 1.0).normalize(), 30.0);
        let frame = PanoramaFrame::new(0, PanoramaProjection::equirectangular(), pano).unwrap();

        let first = projector.render(&frame, 4).unwrap();
        let second = projector.render(&frame, 4).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_render_rejects_mismatched_frame() {
        let projector =
            ViewProjector::new(&small_config(), PanoramaProjection::equirectangular()).unwrap();
        let frame = PanoramaFrame::new(
            2,
            PanoramaProjection::cubemap(CubemapLayout::Horizon),
            RgbImage::new(60, 10),
        )
        .unwrap();
        assert!(matches!(
            projector.render(&frame, 0),
            Err(PipelineError::Projection { frame_index: 2, .. })
        ));

        let frame = PanoramaFrame::new(
            2,
            PanoramaProjection::equirectangular(),
            RgbImage::new(20, 10),
        )
        .unwrap();
        assert!(projector.render(&frame, 99).is_err());
    }

    #[test]
    fn test_new_fails_fast_on_bad_config() {
        let mut config = small_config();
        config.yaw_steps = 0;
        assert!(matches!(
            ViewProjector::new(&config, PanoramaProjection::equirectangular()),
            Err(PipelineError::Configuration(_))
        ));

        let mut config = small_config();
        config.fov_h = 0.0;
        assert!(matches!(
            ViewProjector::new(&config, PanoramaProjection::equirectangular()),
            Err(PipelineError::Configuration(_))
        ));
    }
}

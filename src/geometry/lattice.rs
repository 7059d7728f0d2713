//! The spherical sampler: turns a sampling configuration into the View Lattice.
//!
//! The lattice is built once per run, before any frame is read. It owns the
//! per-direction rotation table so every projection unit reads the same
//! precomputed rotations.

use super::{normalize_yaw_deg, pano_from_cam};
use crate::error::PipelineError;
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// More yaw steps than this put two views of a ring on the same integer
/// degree, so their slot identifiers collide.
pub const MAX_YAW_STEPS: u32 = 360;

/// Parameters of the View Lattice and of the virtual pinhole views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Pitch of each lattice ring in degrees, each in `(-90, 90)`.
    pub base_pitches: Vec<f64>,
    /// Number of evenly spaced yaw angles per ring.
    pub yaw_steps: u32,
    /// Yaw of the first view of every ring, in degrees.
    pub yaw_offset: f64,
    /// Horizontal field of view in degrees.
    pub fov_h: f64,
    /// Vertical field of view in degrees.
    pub fov_v: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            base_pitches: vec![-35.0, 35.0],
            yaw_steps: 4,
            yaw_offset: 0.0,
            fov_h: 90.0,
            fov_v: 90.0,
            width: 640,
            height: 640,
        }
    }
}

/// Optical axis of one virtual pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDirection {
    pub pitch_deg: f64,
    /// Yaw in degrees, wrapped into `(-180, 180]`.
    pub yaw_deg: f64,
    pub pitch_rad: f64,
    pub yaw_rad: f64,
}

impl ViewDirection {
    pub fn new(pitch_deg: f64, yaw_deg: f64) -> Self {
        let yaw_deg = normalize_yaw_deg(yaw_deg);
        ViewDirection {
            pitch_deg,
            yaw_deg,
            pitch_rad: pitch_deg.to_radians(),
            yaw_rad: yaw_deg.to_radians(),
        }
    }

    /// Stable slot identifier, also the image sub-directory name.
    ///
    /// Angles are rounded to the nearest integer degree and written as signed
    /// integers, e.g. `pitch_-35_yaw_90`.
    pub fn slot_id(&self) -> String {
        format!(
            "pitch_{}_yaw_{}",
            self.pitch_deg.round() as i64,
            self.yaw_deg.round() as i64
        )
    }

    /// Unit optical axis in the panorama frame.
    pub fn axis(&self) -> Vector3<f64> {
        pano_from_cam(self.pitch_rad, self.yaw_rad) * Vector3::z()
    }
}

/// The ordered, validated set of view directions of a run.
#[derive(Debug, Clone)]
pub struct ViewLattice {
    directions: Vec<ViewDirection>,
    slot_ids: Vec<String>,
    pano_from_cam: Vec<Rotation3<f64>>,
}

impl ViewLattice {
    /// Enumerates the lattice for `config`.
    ///
    /// For every base pitch, in configuration order, yaws run from
    /// `yaw_offset` in steps of `360 / yaw_steps`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Configuration`] when `yaw_steps` is zero or above
    /// [`MAX_YAW_STEPS`], when a pitch
    /// is outside `(-90, 90)` or not finite, when no pitch is given, or when
    /// two directions map to the same slot identifier.
    pub fn from_config(config: &SamplingConfig) -> Result<Self, PipelineError> {
        if config.yaw_steps == 0 {
            return Err(PipelineError::Configuration(
                "yaw_steps must be at least 1".to_string(),
            ));
        }
        if config.yaw_steps > MAX_YAW_STEPS {
            return Err(PipelineError::Configuration(format!(
                "yaw_steps {} exceeds {MAX_YAW_STEPS}; slot ids use integer degrees",
                config.yaw_steps
            )));
        }
        if config.base_pitches.is_empty() {
            return Err(PipelineError::Configuration(
                "base_pitches must contain at least one pitch".to_string(),
            ));
        }
        if !config.yaw_offset.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "yaw_offset must be finite, got {}",
                config.yaw_offset
            )));
        }
        for &pitch in &config.base_pitches {
            if !pitch.is_finite() || pitch <= -90.0 || pitch >= 90.0 {
                return Err(PipelineError::Configuration(format!(
                    "base pitch {pitch} is outside (-90, 90); polar views are degenerate"
                )));
            }
        }

        let yaw_step = 360.0 / config.yaw_steps as f64;
        let mut directions =
            Vec::with_capacity(config.base_pitches.len() * config.yaw_steps as usize);
        for &pitch in &config.base_pitches {
            for i in 0..config.yaw_steps {
                directions.push(ViewDirection::new(
                    pitch,
                    config.yaw_offset + i as f64 * yaw_step,
                ));
            }
        }

        Self::from_directions(directions)
    }

    /// Builds a lattice from an explicit list of directions.
    pub fn from_directions(directions: Vec<ViewDirection>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::with_capacity(directions.len());
        let mut slot_ids = Vec::with_capacity(directions.len());
        for direction in &directions {
            let slot_id = direction.slot_id();
            if !seen.insert(slot_id.clone()) {
                return Err(PipelineError::Configuration(format!(
                    "duplicate view direction {slot_id} (pitch {}, yaw {})",
                    direction.pitch_deg, direction.yaw_deg
                )));
            }
            slot_ids.push(slot_id);
        }

        let pano_from_cam = directions
            .iter()
            .map(|d| pano_from_cam(d.pitch_rad, d.yaw_rad))
            .collect();

        Ok(ViewLattice {
            directions,
            slot_ids,
            pano_from_cam,
        })
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    pub fn directions(&self) -> &[ViewDirection] {
        &self.directions
    }

    pub fn slot_ids(&self) -> &[String] {
        &self.slot_ids
    }

    /// Precomputed `pano_from_cam` rotation of slot `index`.
    pub fn rotation(&self, index: usize) -> &Rotation3<f64> {
        &self.pano_from_cam[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ViewDirection, &Rotation3<f64>)> {
        self.slot_ids
            .iter()
            .zip(self.directions.iter())
            .zip(self.pano_from_cam.iter())
            .map(|((slot, dir), rot)| (slot.as_str(), dir, rot))
    }
}

//! The rig assembler.
//!
//! Every virtual view of one panorama frame is taken from the same optical
//! center at the same instant, so the views form a rigid rig whose relative
//! rotations are fixed by the View Lattice alone. This module derives that
//! rig topology once per run and serializes it next to the per-slot camera
//! intrinsics, in the JSON shapes the reconstruction engine reads.

use crate::camera::ColmapCameraModel;
use crate::error::PipelineError;
use crate::geometry::{angular_distance, quaternion_wxyz, ViewLattice};
use crate::projection::ViewProjector;
use log::debug;
use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub mod params;

pub use params::{CameraParams, CameraSlot};

pub const RIG_CONFIG_FILE: &str = "rig_config.json";
pub const CAMERA_PARAMS_FILE: &str = "camera_params.json";

/// One camera of the rig, as consumed by the engine's rig configurator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigCamera {
    pub slot_id: String,
    /// Image sub-directory of the slot, with a trailing `/`.
    pub image_prefix: String,
    /// Camera model class of the slot.
    pub model: ColmapCameraModel,
    #[serde(default)]
    pub ref_sensor: bool,
    /// Slot the relative pose is expressed against.
    pub ref_slot: String,
    /// Rotation from the reference sensor into this camera, `[w, x, y, z]`.
    /// Absent for the reference sensor itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_from_rig_rotation: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_from_rig_translation: Option<[f64; 3]>,
    /// Rotation from the panorama frame (pitch 0 / yaw 0) into this camera.
    pub cam_from_pano_rotation: [f64; 4],
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigDefinition {
    pub cameras: Vec<RigCamera>,
}

/// Rig topology shared by every frame of a run.
///
/// Serialized as a JSON array holding a single rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RigConfig {
    pub rigs: Vec<RigDefinition>,
}

impl RigConfig {
    pub fn cameras(&self) -> impl Iterator<Item = &RigCamera> {
        self.rigs.iter().flat_map(|rig| rig.cameras.iter())
    }

    pub fn slot_ids(&self) -> BTreeSet<String> {
        self.cameras().map(|c| c.slot_id.clone()).collect()
    }

    pub fn reference(&self) -> Option<&RigCamera> {
        self.cameras().find(|c| c.ref_sensor)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let config: RigConfig = read_json(path)?;
        config.validate().map_err(PipelineError::RigConsistency)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_json(self, path)
    }

    /// Structural checks: one rig, unique slots, exactly one reference sensor.
    pub fn validate(&self) -> Result<(), String> {
        if self.rigs.len() != 1 {
            return Err(format!("expected exactly one rig, found {}", self.rigs.len()));
        }
        let cameras: Vec<&RigCamera> = self.cameras().collect();
        if cameras.is_empty() {
            return Err("rig has no cameras".to_string());
        }
        if self.slot_ids().len() != cameras.len() {
            return Err("rig lists the same slot more than once".to_string());
        }
        let references: Vec<&&RigCamera> = cameras.iter().filter(|c| c.ref_sensor).collect();
        if references.len() != 1 {
            return Err(format!(
                "rig must have exactly one reference sensor, found {}",
                references.len()
            ));
        }
        let reference = &references[0].slot_id;
        for camera in &cameras {
            if &camera.ref_slot != reference {
                return Err(format!(
                    "slot {} refers to {} but the reference sensor is {reference}",
                    camera.slot_id, camera.ref_slot
                ));
            }
            if !camera.ref_sensor && camera.cam_from_rig_rotation.is_none() {
                return Err(format!("slot {} has no cam_from_rig_rotation", camera.slot_id));
            }
        }
        Ok(())
    }
}

/// Both run-wide artifacts, built together so their slot ids always agree.
#[derive(Debug, Clone, PartialEq)]
pub struct RigArtifacts {
    pub rig_config: RigConfig,
    pub camera_params: CameraParams,
}

impl RigArtifacts {
    /// Writes `rig_config.json` and `camera_params.json` into `root`.
    pub fn save(&self, root: &Path) -> Result<(), PipelineError> {
        self.rig_config.save(&root.join(RIG_CONFIG_FILE))?;
        self.camera_params.save(&root.join(CAMERA_PARAMS_FILE))?;
        Ok(())
    }
}

/// Index of the lattice slot closest to pitch 0 / yaw 0; the first one wins ties.
pub fn reference_slot(lattice: &ViewLattice) -> usize {
    let forward = Vector3::z();
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, direction) in lattice.directions().iter().enumerate() {
        let distance = angular_distance(&direction.axis(), &forward);
        if distance < best_distance - 1e-12 {
            best = index;
            best_distance = distance;
        }
    }
    best
}

/// Builds the rig topology and the camera parameters from the projector's
/// lattice and shared camera.
///
/// Rotations come straight from the lattice's precomputed table; nothing here
/// depends on frame content.
pub fn assemble(
    projector: &ViewProjector,
    model: ColmapCameraModel,
) -> Result<RigArtifacts, PipelineError> {
    let lattice = projector.lattice();
    let camera = projector.camera();
    if lattice.is_empty() {
        return Err(PipelineError::Configuration(
            "cannot assemble a rig from an empty lattice".to_string(),
        ));
    }
    let params = camera.colmap_params(model)?;

    let reference = reference_slot(lattice);
    let ref_slot = lattice.slot_ids()[reference].clone();
    let pano_from_ref = lattice.rotation(reference);
    debug!("Rig reference sensor: {ref_slot}");

    let mut cameras = Vec::with_capacity(lattice.len());
    let mut slots = Vec::with_capacity(lattice.len());
    for (index, (slot_id, direction, pano_from_cam)) in lattice.iter().enumerate() {
        let cam_from_pano = pano_from_cam.inverse();
        let is_ref = index == reference;
        let cam_from_rig = cam_from_pano * pano_from_ref;

        cameras.push(RigCamera {
            slot_id: slot_id.to_string(),
            image_prefix: format!("{slot_id}/"),
            model,
            ref_sensor: is_ref,
            ref_slot: ref_slot.clone(),
            cam_from_rig_rotation: (!is_ref).then(|| quaternion_wxyz(&cam_from_rig)),
            cam_from_rig_translation: (!is_ref).then_some([0.0, 0.0, 0.0]),
            cam_from_pano_rotation: quaternion_wxyz(&cam_from_pano),
            pitch: direction.pitch_deg,
            yaw: direction.yaw_deg,
        });
        slots.push(CameraSlot::new(
            slot_id,
            direction,
            camera,
            projector.fov_deg(),
            model,
            params.clone(),
        ));
    }

    Ok(RigArtifacts {
        rig_config: RigConfig {
            rigs: vec![RigDefinition { cameras }],
        },
        camera_params: CameraParams { slots },
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let data = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| PipelineError::serialization(path, e))
}

pub(crate) fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), PipelineError> {
    let mut json =
        serde_json::to_string_pretty(value).map_err(|e| PipelineError::serialization(path, e))?;
    json.push('\n');
    fs::write(path, json).map_err(|e| PipelineError::io(path, e))
}

//! Per-slot camera intrinsics (`camera_params.json`).

use super::{read_json, write_json};
use crate::camera::{CameraModel, ColmapCameraModel, PinholeModel};
use crate::error::PipelineError;
use crate::geometry::ViewDirection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSlot {
    pub slot_id: String,
    pub image_prefix: String,
    pub model: ColmapCameraModel,
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Parameter vector in the engine's order for `model`.
    pub params: Vec<f64>,
    pub fov_h: f64,
    pub fov_v: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl CameraSlot {
    pub fn new(
        slot_id: &str,
        direction: &ViewDirection,
        camera: &PinholeModel,
        fov_deg: (f64, f64),
        model: ColmapCameraModel,
        params: Vec<f64>,
    ) -> Self {
        let intrinsics = camera.get_intrinsics();
        let resolution = camera.get_resolution();
        CameraSlot {
            slot_id: slot_id.to_string(),
            image_prefix: format!("{slot_id}/"),
            model,
            width: resolution.width,
            height: resolution.height,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            params,
            fov_h: fov_deg.0,
            fov_v: fov_deg.1,
            pitch: direction.pitch_deg,
            yaw: direction.yaw_deg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraParams {
    pub slots: Vec<CameraSlot>,
}

impl CameraParams {
    pub fn slot_ids(&self) -> BTreeSet<String> {
        self.slots.iter().map(|s| s.slot_id.clone()).collect()
    }

    pub fn get(&self, slot_id: &str) -> Option<&CameraSlot> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }

    /// The intrinsics every slot shares, if they are indeed shared.
    ///
    /// The lattice uses one field of view and one resolution, so this holds
    /// for every dataset the assembler writes.
    pub fn shared_slot(&self) -> Option<&CameraSlot> {
        let first = self.slots.first()?;
        self.slots
            .iter()
            .all(|s| {
                s.model == first.model
                    && s.params == first.params
                    && s.width == first.width
                    && s.height == first.height
            })
            .then_some(first)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let params: CameraParams = read_json(path)?;
        if params.slots.is_empty() {
            return Err(PipelineError::RigConsistency(format!(
                "{} lists no camera slots",
                path.display()
            )));
        }
        if params.slot_ids().len() != params.slots.len() {
            return Err(PipelineError::RigConsistency(format!(
                "{} lists the same slot more than once",
                path.display()
            )));
        }
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_json(self, path)
    }
}

//! Run configuration, loadable from and savable to YAML.

use crate::camera::ColmapCameraModel;
use crate::error::PipelineError;
use crate::geometry::SamplingConfig;
use crate::projection::PanoramaProjection;
use crate::util::OutputFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything a conversion run needs besides its input and output paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub sampling: SamplingConfig,
    pub projection: PanoramaProjection,
    pub camera_model: ColmapCameraModel,
    pub image_format: OutputFormat,
    /// Keep every `frame_stride`-th input frame.
    pub frame_stride: usize,
    /// Skip frames that fail to project instead of aborting the run.
    pub skip_failed_frames: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            sampling: SamplingConfig::default(),
            projection: PanoramaProjection::default(),
            camera_model: ColmapCameraModel::Pinhole,
            image_format: OutputFormat::Jpg,
            frame_stride: 1,
            skip_failed_frames: false,
        }
    }
}

impl RunConfig {
    /// Loads a configuration from YAML; missing keys take their defaults.
    ///
    /// Malformed YAML and unknown enum values (for example an unsupported
    /// projection kind) are configuration errors.
    pub fn load_from_yaml(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: RunConfig = serde_yaml::from_str(&contents).map_err(|e| {
            PipelineError::Configuration(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: &Path) -> Result<(), PipelineError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| PipelineError::serialization(path, e))?;
        fs::write(path, yaml).map_err(|e| PipelineError::io(path, e))
    }

    /// Checks the run-level settings; lattice and camera checks happen when
    /// the projector is built.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.frame_stride == 0 {
            return Err(PipelineError::Configuration(
                "frame_stride must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

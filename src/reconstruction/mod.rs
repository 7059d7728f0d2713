//! The reconstruction driver.
//!
//! The driver performs no geometry. It checks that the image tree, the rig
//! file and the camera file exist and agree on their slot ids, then hands the
//! dataset to one [`ReconstructionBackend`]. Both backends see exactly the
//! same validated inputs.

use crate::camera::{ColmapCameraModel, Intrinsics, PinholeModel, Resolution};
use crate::dataset::{slot_directories, DatasetLayout};
use crate::error::PipelineError;
use crate::rig::{CameraParams, RigConfig};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod colmap;
pub mod in_process;

pub use colmap::{ColmapCli, EngineCommand};
pub use in_process::{InProcessBackend, SfmEngine};

/// Feature matching strategy of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    #[default]
    Sequential,
    Exhaustive,
    VocabTree,
    Spatial,
}

impl Matcher {
    /// Engine command running this matcher.
    pub fn command(&self) -> &'static str {
        match self {
            Matcher::Sequential => "sequential_matcher",
            Matcher::Exhaustive => "exhaustive_matcher",
            Matcher::VocabTree => "vocab_tree_matcher",
            Matcher::Spatial => "spatial_matcher",
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Matcher::Sequential => "sequential",
            Matcher::Exhaustive => "exhaustive",
            Matcher::VocabTree => "vocab_tree",
            Matcher::Spatial => "spatial",
        };
        f.write_str(name)
    }
}

impl FromStr for Matcher {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Matcher::Sequential),
            "exhaustive" => Ok(Matcher::Exhaustive),
            "vocab_tree" | "vocabtree" => Ok(Matcher::VocabTree),
            "spatial" => Ok(Matcher::Spatial),
            _ => Err(PipelineError::Configuration(format!(
                "unsupported matcher '{s}'. Supported: sequential, exhaustive, vocab_tree, spatial"
            ))),
        }
    }
}

/// Bundle adjustment switches for the mapping stage.
///
/// The rig intrinsics and relative poses are exact by construction, so the
/// defaults keep all of them fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapperOptions {
    pub refine_focal_length: bool,
    pub refine_principal_point: bool,
    pub refine_extra_params: bool,
    pub refine_sensor_from_rig: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Subprocess,
    InProcess,
}

impl FromStr for BackendKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subprocess" | "cli" => Ok(BackendKind::Subprocess),
            "in-process" | "in_process" => Ok(BackendKind::InProcess),
            _ => Err(PipelineError::Configuration(format!(
                "unsupported reconstruction backend '{s}'. Supported: subprocess, in-process"
            ))),
        }
    }
}

/// Backend choice and engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub backend: BackendKind,
    /// Engine executable for the subprocess backend.
    pub colmap_executable: PathBuf,
    pub matcher: Matcher,
    /// Loop detection for the sequential matcher.
    pub loop_detection: bool,
    pub mapper: MapperOptions,
    /// Whole-run budget; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            backend: BackendKind::Subprocess,
            colmap_executable: PathBuf::from(if cfg!(windows) { "colmap.exe" } else { "colmap" }),
            matcher: Matcher::Sequential,
            loop_detection: true,
            mapper: MapperOptions::default(),
            timeout_secs: None,
        }
    }
}

impl DriverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Inputs of one reconstruction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionRequest {
    pub image_root: PathBuf,
    pub rig_config_path: PathBuf,
    pub camera_params_path: PathBuf,
    /// Workspace for the engine database and the sparse models.
    pub output_path: PathBuf,
    pub camera_model: ColmapCameraModel,
    pub visualize: bool,
}

impl ReconstructionRequest {
    /// Request for a dataset written by the conversion pipeline.
    pub fn for_dataset(
        layout: &DatasetLayout,
        output_path: impl Into<PathBuf>,
        camera_model: ColmapCameraModel,
    ) -> Self {
        ReconstructionRequest {
            image_root: layout.images_dir(),
            rig_config_path: layout.rig_config_path(),
            camera_params_path: layout.camera_params_path(),
            output_path: output_path.into(),
            camera_model,
            visualize: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionResult {
    pub success: bool,
    pub sparse_model_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl ReconstructionResult {
    pub fn succeeded(sparse_model_path: Option<PathBuf>) -> Self {
        ReconstructionResult {
            success: true,
            sparse_model_path,
            error_message: None,
        }
    }

    pub fn failed(err: &PipelineError) -> Self {
        ReconstructionResult {
            success: false,
            sparse_model_path: None,
            error_message: Some(err.to_string()),
        }
    }
}

/// Rig and camera files after the consistency checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInputs {
    pub rig_config: RigConfig,
    pub camera_params: CameraParams,
    pub slot_ids: BTreeSet<String>,
    /// Intrinsics shared by every slot, in the order of the requested model.
    pub shared_params: Vec<f64>,
}

impl ValidatedInputs {
    /// `shared_params` as the engine's comma separated list.
    pub fn params_arg(&self) -> String {
        self.shared_params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn require_exists(path: &Path, what: &str) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, format!("{what} not found")),
        ))
    }
}

fn describe_difference(
    left_name: &str,
    left: &BTreeSet<String>,
    right_name: &str,
    right: &BTreeSet<String>,
) -> String {
    let only_left: Vec<&str> = left.difference(right).map(String::as_str).collect();
    let only_right: Vec<&str> = right.difference(left).map(String::as_str).collect();
    format!(
        "slot ids differ between {left_name} and {right_name}: \
         only in {left_name} {only_left:?}, only in {right_name} {only_right:?}"
    )
}

/// Loads and cross-checks the three driver inputs.
pub fn validate_inputs(request: &ReconstructionRequest) -> Result<ValidatedInputs, PipelineError> {
    require_exists(&request.image_root, "image directory")?;
    require_exists(&request.rig_config_path, "rig config")?;
    require_exists(&request.camera_params_path, "camera params")?;

    let rig_config = RigConfig::load(&request.rig_config_path)?;
    let camera_params = CameraParams::load(&request.camera_params_path)?;
    let image_slots = slot_directories(&request.image_root)?;

    let rig_slots = rig_config.slot_ids();
    let camera_slots = camera_params.slot_ids();
    if rig_slots != camera_slots {
        return Err(PipelineError::RigConsistency(describe_difference(
            "rig config",
            &rig_slots,
            "camera params",
            &camera_slots,
        )));
    }
    if rig_slots != image_slots {
        return Err(PipelineError::RigConsistency(describe_difference(
            "rig config",
            &rig_slots,
            "image directory",
            &image_slots,
        )));
    }
    for camera in rig_config.cameras() {
        if camera.image_prefix.trim_end_matches('/') != camera.slot_id {
            return Err(PipelineError::RigConsistency(format!(
                "slot {} uses image prefix {}",
                camera.slot_id, camera.image_prefix
            )));
        }
        if let Some(slot) = camera_params.get(&camera.slot_id) {
            if slot.model != camera.model {
                return Err(PipelineError::RigConsistency(format!(
                    "slot {} is {} in the rig config but {} in the camera params",
                    camera.slot_id, camera.model, slot.model
                )));
            }
        }
    }

    let shared = camera_params.shared_slot().ok_or_else(|| {
        PipelineError::RigConsistency("camera slots do not share intrinsics".to_string())
    })?;
    let camera = PinholeModel::new(
        Intrinsics {
            fx: shared.fx,
            fy: shared.fy,
            cx: shared.cx,
            cy: shared.cy,
        },
        Resolution {
            width: shared.width,
            height: shared.height,
        },
    )?;
    let shared_params = camera.colmap_params(request.camera_model)?;

    Ok(ValidatedInputs {
        rig_config,
        camera_params,
        slot_ids: rig_slots,
        shared_params,
    })
}

/// Engine paths inside the request's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineWorkspace {
    pub database_path: PathBuf,
    pub sparse_path: PathBuf,
}

impl EngineWorkspace {
    pub fn new(output_path: &Path) -> Self {
        EngineWorkspace {
            database_path: output_path.join("database.db"),
            sparse_path: output_path.join("sparse"),
        }
    }

    /// Creates the sparse directory and removes a stale database.
    pub fn prepare(output_path: &Path) -> Result<Self, PipelineError> {
        let workspace = Self::new(output_path);
        fs::create_dir_all(&workspace.sparse_path)
            .map_err(|e| PipelineError::io(&workspace.sparse_path, e))?;
        if workspace.database_path.exists() {
            fs::remove_file(&workspace.database_path)
                .map_err(|e| PipelineError::io(&workspace.database_path, e))?;
        }
        Ok(workspace)
    }

    /// The first reconstructed model, if mapping produced one.
    pub fn first_model(&self) -> Option<PathBuf> {
        let model = self.sparse_path.join("0");
        model.is_dir().then_some(model)
    }
}

/// One way of running the engine on a validated dataset.
pub trait ReconstructionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Runs every engine stage and returns the first sparse model, if any.
    fn reconstruct(
        &self,
        request: &ReconstructionRequest,
        inputs: &ValidatedInputs,
    ) -> Result<Option<PathBuf>, PipelineError>;
}

/// Builds the backend named by `config`.
///
/// The in-process backend needs an engine supplied by the embedding
/// application.
pub fn select_backend(
    config: &DriverConfig,
    engine: Option<Arc<dyn SfmEngine>>,
) -> Result<Box<dyn ReconstructionBackend>, PipelineError> {
    match config.backend {
        BackendKind::Subprocess => Ok(Box::new(ColmapCli::from_config(config))),
        BackendKind::InProcess => {
            let engine = engine.ok_or_else(|| {
                PipelineError::Configuration(
                    "the in-process backend needs an engine implementation".to_string(),
                )
            })?;
            Ok(Box::new(InProcessBackend::from_config(engine, config)))
        }
    }
}

pub struct ReconstructionDriver {
    backend: Box<dyn ReconstructionBackend>,
}

impl ReconstructionDriver {
    pub fn new(backend: Box<dyn ReconstructionBackend>) -> Self {
        ReconstructionDriver { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Validates the inputs and runs the backend, keeping the typed error.
    pub fn try_run(
        &self,
        request: &ReconstructionRequest,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let inputs = validate_inputs(request)?;
        info!(
            "Reconstructing {} rig slots with the {} backend ({})",
            inputs.slot_ids.len(),
            self.backend.name(),
            request.camera_model
        );
        self.backend.reconstruct(request, &inputs)
    }

    pub fn run(&self, request: &ReconstructionRequest) -> ReconstructionResult {
        match self.try_run(request) {
            Ok(sparse_model_path) => {
                match &sparse_model_path {
                    Some(path) => info!("Sparse model written to {}", path.display()),
                    None => info!("Mapping finished without a sparse model"),
                }
                ReconstructionResult::succeeded(sparse_model_path)
            }
            Err(e) => {
                error!("Reconstruction failed: {e}");
                ReconstructionResult::failed(&e)
            }
        }
    }
}

//! In-process backend over an embedded engine.

use super::{
    DriverConfig, EngineWorkspace, MapperOptions, Matcher, ReconstructionBackend,
    ReconstructionRequest, ValidatedInputs,
};
use crate::camera::ColmapCameraModel;
use crate::error::PipelineError;
use crate::rig::RigConfig;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Engine library bound into the process.
///
/// Each stage reports failures as the engine's own diagnostic text; the
/// backend attaches the stage name.
pub trait SfmEngine: Send + Sync {
    fn extract_features(
        &self,
        database_path: &Path,
        image_root: &Path,
        camera_model: ColmapCameraModel,
        camera_params: &[f64],
    ) -> Result<(), String>;

    fn apply_rig_config(&self, database_path: &Path, rig_config: &RigConfig) -> Result<(), String>;

    fn match_features(
        &self,
        database_path: &Path,
        matcher: Matcher,
        loop_detection: bool,
    ) -> Result<(), String>;

    /// Runs incremental mapping and returns the directories of the models
    /// it wrote under `sparse_path`.
    fn map(
        &self,
        database_path: &Path,
        image_root: &Path,
        sparse_path: &Path,
        options: &MapperOptions,
    ) -> Result<Vec<PathBuf>, String>;

    fn visualize(&self, _model_path: &Path) -> Result<(), String> {
        Err("this engine has no viewer".to_string())
    }
}

pub struct InProcessBackend {
    engine: Arc<dyn SfmEngine>,
    matcher: Matcher,
    loop_detection: bool,
    mapper: MapperOptions,
    timeout: Option<Duration>,
}

impl InProcessBackend {
    pub fn new(engine: Arc<dyn SfmEngine>) -> Self {
        Self::from_config(engine, &DriverConfig::default())
    }

    pub fn from_config(engine: Arc<dyn SfmEngine>, config: &DriverConfig) -> Self {
        InProcessBackend {
            engine,
            matcher: config.matcher,
            loop_detection: config.loop_detection,
            mapper: config.mapper,
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct StageJob {
    engine: Arc<dyn SfmEngine>,
    workspace: EngineWorkspace,
    image_root: PathBuf,
    camera_model: ColmapCameraModel,
    camera_params: Vec<f64>,
    rig_config: RigConfig,
    matcher: Matcher,
    loop_detection: bool,
    mapper: MapperOptions,
}

impl StageJob {
    fn run(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let database = &self.workspace.database_path;
        info!("--- Stage: feature_extractor ---");
        self.engine
            .extract_features(
                database,
                &self.image_root,
                self.camera_model,
                &self.camera_params,
            )
            .map_err(|e| PipelineError::engine("feature_extractor", e))?;

        info!("--- Stage: rig_configurator ---");
        self.engine
            .apply_rig_config(database, &self.rig_config)
            .map_err(|e| PipelineError::engine("rig_configurator", e))?;

        info!("--- Stage: {} ---", self.matcher.command());
        self.engine
            .match_features(database, self.matcher, self.loop_detection)
            .map_err(|e| PipelineError::engine(self.matcher.command(), e))?;

        info!("--- Stage: mapper ---");
        self.engine
            .map(
                database,
                &self.image_root,
                &self.workspace.sparse_path,
                &self.mapper,
            )
            .map_err(|e| PipelineError::engine("mapper", e))
    }
}

impl ReconstructionBackend for InProcessBackend {
    fn name(&self) -> &str {
        "in-process"
    }

    fn reconstruct(
        &self,
        request: &ReconstructionRequest,
        inputs: &ValidatedInputs,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let workspace = EngineWorkspace::prepare(&request.output_path)?;
        let job = StageJob {
            engine: Arc::clone(&self.engine),
            workspace: workspace.clone(),
            image_root: request.image_root.clone(),
            camera_model: request.camera_model,
            camera_params: inputs.shared_params.clone(),
            rig_config: inputs.rig_config.clone(),
            matcher: self.matcher,
            loop_detection: self.loop_detection,
            mapper: self.mapper,
        };

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("sfm-engine".to_string())
            .spawn(move || {
                let _ = tx.send(job.run());
            })
            .map_err(|e| PipelineError::engine("startup", e))?;

        let received = match self.timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => PipelineError::engine(
                    "reconstruction",
                    format!("timed out after {timeout:.0?}"),
                ),
                mpsc::RecvTimeoutError::Disconnected => {
                    PipelineError::engine("reconstruction", "engine thread panicked")
                }
            })?,
            None => rx
                .recv()
                .map_err(|_| PipelineError::engine("reconstruction", "engine thread panicked"))?,
        };
        let models = received?;

        let model = models
            .into_iter()
            .next()
            .or_else(|| workspace.first_model());
        if request.visualize {
            if let Some(model) = &model {
                if let Err(e) = self.engine.visualize(model) {
                    warn!("Viewer failed: {e}");
                }
            }
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedEngine {
        calls: Mutex<Vec<String>>,
        fail_stage: Option<&'static str>,
        delay: Option<Duration>,
    }

    impl ScriptedEngine {
        fn step(&self, stage: &str) -> Result<(), String> {
            self.calls.lock().unwrap().push(stage.to_string());
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail_stage == Some(stage) {
                return Err(format!("{stage} exploded"));
            }
            Ok(())
        }
    }

    impl SfmEngine for ScriptedEngine {
        fn extract_features(
            &self,
            _database_path: &Path,
            _image_root: &Path,
            camera_model: ColmapCameraModel,
            camera_params: &[f64],
        ) -> Result<(), String> {
            assert_eq!(camera_model, ColmapCameraModel::Pinhole);
            assert_eq!(camera_params.len(), 4);
            self.step("extract")
        }

        fn apply_rig_config(
            &self,
            _database_path: &Path,
            rig_config: &RigConfig,
        ) -> Result<(), String> {
            assert!(rig_config.reference().is_some());
            self.step("rig")
        }

        fn match_features(
            &self,
            _database_path: &Path,
            matcher: Matcher,
            loop_detection: bool,
        ) -> Result<(), String> {
            assert_eq!(matcher, Matcher::Sequential);
            assert!(loop_detection);
            self.step("match")
        }

        fn map(
            &self,
            _database_path: &Path,
            _image_root: &Path,
            sparse_path: &Path,
            options: &MapperOptions,
        ) -> Result<Vec<PathBuf>, String> {
            assert_eq!(*options, MapperOptions::default());
            self.step("map")?;
            let model = sparse_path.join("0");
            fs::create_dir_all(&model).map_err(|e| e.to_string())?;
            Ok(vec![model])
        }
    }

    fn request_and_inputs(dir: &Path) -> (ReconstructionRequest, ValidatedInputs) {
        use crate::dataset::DatasetLayout;
        use crate::geometry::SamplingConfig;
        use crate::projection::{PanoramaProjection, ViewProjector};
        use crate::reconstruction::validate_inputs;
        use crate::util::OutputFormat;

        let layout = DatasetLayout::new(dir.join("run"), OutputFormat::Jpg);
        let projector = ViewProjector::new(
            &SamplingConfig::default(),
            PanoramaProjection::equirectangular(),
        )
        .unwrap();
        layout
            .prepare(projector.lattice().slot_ids().iter().map(String::as_str))
            .unwrap();
        crate::rig::assemble(&projector, ColmapCameraModel::Pinhole)
            .unwrap()
            .save(layout.root())
            .unwrap();
        let request = ReconstructionRequest::for_dataset(
            &layout,
            dir.join("sfm"),
            ColmapCameraModel::Pinhole,
        );
        let inputs = validate_inputs(&request).unwrap();
        (request, inputs)
    }

    #[test]
    fn test_stages_run_in_order() {
        let dir = tempdir().unwrap();
        let (request, inputs) = request_and_inputs(dir.path());
        let engine = Arc::new(ScriptedEngine::default());
        let backend = InProcessBackend::new(engine.clone());

        let model = backend.reconstruct(&request, &inputs).unwrap();
        assert_eq!(model, Some(request.output_path.join("sparse").join("0")));
        assert_eq!(
            *engine.calls.lock().unwrap(),
            vec!["extract", "rig", "match", "map"]
        );
    }

    #[test]
    fn test_stage_failure_names_stage() {
        let dir = tempdir().unwrap();
        let (request, inputs) = request_and_inputs(dir.path());
        let engine = Arc::new(ScriptedEngine {
            fail_stage: Some("rig"),
            ..ScriptedEngine::default()
        });
        let err = InProcessBackend::new(engine.clone())
            .reconstruct(&request, &inputs)
            .unwrap_err();
        match err {
            PipelineError::Engine { stage, message } => {
                assert_eq!(stage, "rig_configurator");
                assert_eq!(message, "rig exploded");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*engine.calls.lock().unwrap(), vec!["extract", "rig"]);
    }

    #[test]
    fn test_timeout_is_engine_error() {
        let dir = tempdir().unwrap();
        let (request, inputs) = request_and_inputs(dir.path());
        let engine = Arc::new(ScriptedEngine {
            delay: Some(Duration::from_millis(300)),
            // The detached engine thread stops after its first stage.
            fail_stage: Some("extract"),
            ..ScriptedEngine::default()
        });
        let err = InProcessBackend::new(engine)
            .with_timeout(Duration::from_millis(50))
            .reconstruct(&request, &inputs)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Engine { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}

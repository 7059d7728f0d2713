//! Subprocess backend driving the `colmap` command line.

use super::{
    DriverConfig, EngineWorkspace, MapperOptions, Matcher, ReconstructionBackend,
    ReconstructionRequest, ValidatedInputs,
};
use crate::error::PipelineError;
use log::{info, warn};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Engine output lines kept per stream for the error message.
const DIAGNOSTIC_TAIL: usize = 20;

/// One engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub stage: &'static str,
    pub args: Vec<OsString>,
}

impl EngineCommand {
    fn new(stage: &'static str) -> Self {
        EngineCommand {
            stage,
            args: vec![OsString::from(stage)],
        }
    }

    fn arg(mut self, key: &str, value: impl Into<OsString>) -> Self {
        self.args.push(OsString::from(key));
        self.args.push(value.into());
        self
    }

    fn flag(self, key: &str, value: bool) -> Self {
        self.arg(key, if value { "1" } else { "0" })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColmapCli {
    pub executable: PathBuf,
    pub matcher: Matcher,
    pub loop_detection: bool,
    pub mapper: MapperOptions,
    /// Budget for the whole run, shared by all stages.
    pub timeout: Option<Duration>,
}

impl ColmapCli {
    pub fn from_config(config: &DriverConfig) -> Self {
        ColmapCli {
            executable: config.colmap_executable.clone(),
            matcher: config.matcher,
            loop_detection: config.loop_detection,
            mapper: config.mapper,
            timeout: config.timeout(),
        }
    }

    /// The mandatory stages, in execution order.
    pub fn commands(
        &self,
        request: &ReconstructionRequest,
        inputs: &ValidatedInputs,
        workspace: &EngineWorkspace,
    ) -> Vec<EngineCommand> {
        let database = &workspace.database_path;
        let images = &request.image_root;

        let extract = EngineCommand::new("feature_extractor")
            .arg("--database_path", database)
            .arg("--image_path", images)
            .arg("--ImageReader.camera_model", request.camera_model.name())
            .arg("--ImageReader.single_camera_per_folder", "1")
            .arg("--ImageReader.camera_params", inputs.params_arg());

        let rig = EngineCommand::new("rig_configurator")
            .arg("--database_path", database)
            .arg("--rig_config_path", &request.rig_config_path);

        let mut matcher =
            EngineCommand::new(self.matcher.command()).arg("--database_path", database);
        if self.matcher == Matcher::Sequential {
            matcher = matcher.flag("--SequentialMatching.loop_detection", self.loop_detection);
        }

        let mapper = EngineCommand::new("mapper")
            .arg("--database_path", database)
            .arg("--image_path", images)
            .arg("--output_path", &workspace.sparse_path)
            .flag("--Mapper.ba_refine_focal_length", self.mapper.refine_focal_length)
            .flag("--Mapper.ba_refine_principal_point", self.mapper.refine_principal_point)
            .flag("--Mapper.ba_refine_extra_params", self.mapper.refine_extra_params)
            .flag("--Mapper.ba_refine_sensor_from_rig", self.mapper.refine_sensor_from_rig);

        vec![extract, rig, matcher, mapper]
    }

    fn viewer_command(
        &self,
        request: &ReconstructionRequest,
        workspace: &EngineWorkspace,
        model: &Path,
    ) -> EngineCommand {
        EngineCommand::new("gui")
            .arg("--import_path", model)
            .arg("--database_path", &workspace.database_path)
            .arg("--image_path", &request.image_root)
    }

    /// Runs one stage, streaming its output to the log.
    fn run_stage(
        &self,
        command: &EngineCommand,
        deadline: Option<Instant>,
    ) -> Result<(), PipelineError> {
        let stage = command.stage;
        info!(
            "Executing: {} {}",
            self.executable.display(),
            command
                .args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&self.executable)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => PipelineError::engine(
                    stage,
                    format!(
                        "command '{}' not found. Is COLMAP installed and in your PATH?",
                        self.executable.display()
                    ),
                ),
                _ => PipelineError::engine(stage, format!("failed to start: {e}")),
            })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr));
        }

        let status = wait_with_deadline(&mut child, deadline)
            .map_err(|e| PipelineError::engine(stage, format!("failed to wait: {e}")))?;
        let Some(status) = status else {
            // Readers may be held open by grandchildren; leave them detached.
            return Err(PipelineError::engine(
                stage,
                format!(
                    "timed out after {:.0?}",
                    self.timeout.unwrap_or_default()
                ),
            ));
        };
        let mut diagnostics = Vec::new();
        for reader in readers {
            if let Ok(tail) = reader.join() {
                diagnostics.extend(tail);
            }
        }

        if status.success() {
            return Ok(());
        }
        let mut message = match status.code() {
            Some(code) => format!("command failed with exit code {code}"),
            None => "command terminated by a signal".to_string(),
        };
        if !diagnostics.is_empty() {
            message.push('\n');
            message.push_str(&diagnostics.join("\n"));
        }
        Err(PipelineError::engine(stage, message))
    }
}

/// Logs every line of `stream` and returns its last [`DIAGNOSTIC_TAIL`] lines.
fn forward_lines<R: Read + Send + 'static>(stream: R) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            info!("{line}");
            if tail.len() == DIAGNOSTIC_TAIL {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
        Vec::from(tail)
    })
}

/// Waits for `child`; `Ok(None)` means the deadline passed and it was killed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl ReconstructionBackend for ColmapCli {
    fn name(&self) -> &str {
        "colmap-cli"
    }

    fn reconstruct(
        &self,
        request: &ReconstructionRequest,
        inputs: &ValidatedInputs,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let workspace = EngineWorkspace::prepare(&request.output_path)?;
        let deadline = self.timeout.map(|t| Instant::now() + t);

        for command in self.commands(request, inputs, &workspace) {
            info!("--- Stage: {} ---", command.stage);
            self.run_stage(&command, deadline)?;
        }

        let model = workspace.first_model();
        if request.visualize {
            match &model {
                Some(model) => {
                    let viewer = self.viewer_command(request, &workspace, model);
                    if let Err(e) = self.run_stage(&viewer, None) {
                        warn!("Viewer failed: {e}");
                    }
                }
                None => warn!("Nothing to visualize: mapping produced no model"),
            }
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ColmapCameraModel;
    use crate::dataset::DatasetLayout;
    use crate::geometry::SamplingConfig;
    use crate::projection::{PanoramaProjection, ViewProjector};
    use crate::reconstruction::validate_inputs;
    use crate::rig;
    use crate::util::OutputFormat;
    use tempfile::{tempdir, TempDir};

    fn fixture() -> (TempDir, ReconstructionRequest, ValidatedInputs) {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("run"), OutputFormat::Jpg);
        let projector = ViewProjector::new(
            &SamplingConfig {
                base_pitches: vec![0.0],
                yaw_steps: 4,
                ..SamplingConfig::default()
            },
            PanoramaProjection::equirectangular(),
        )
        .unwrap();
        layout
            .prepare(projector.lattice().slot_ids().iter().map(String::as_str))
            .unwrap();
        rig::assemble(&projector, ColmapCameraModel::Pinhole)
            .unwrap()
            .save(layout.root())
            .unwrap();
        let request = ReconstructionRequest::for_dataset(
            &layout,
            dir.path().join("sfm"),
            ColmapCameraModel::Pinhole,
        );
        let inputs = validate_inputs(&request).unwrap();
        (dir, request, inputs)
    }

    fn strings(command: &EngineCommand) -> Vec<String> {
        command
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn value_of(args: &[String], key: &str) -> Option<String> {
        let position = args.iter().position(|a| a == key)?;
        args.get(position + 1).cloned()
    }

    #[test]
    fn test_stage_order_and_arguments() {
        let (_dir, request, inputs) = fixture();
        let cli = ColmapCli::from_config(&DriverConfig::default());
        let workspace = EngineWorkspace::new(&request.output_path);
        let commands = cli.commands(&request, &inputs, &workspace);

        let stages: Vec<&str> = commands.iter().map(|c| c.stage).collect();
        assert_eq!(
            stages,
            vec!["feature_extractor", "rig_configurator", "sequential_matcher", "mapper"]
        );

        let extract = strings(&commands[0]);
        assert_eq!(extract[0], "feature_extractor");
        assert_eq!(
            value_of(&extract, "--ImageReader.camera_model").as_deref(),
            Some("PINHOLE")
        );
        assert_eq!(
            value_of(&extract, "--ImageReader.single_camera_per_folder").as_deref(),
            Some("1")
        );
        assert_eq!(
            value_of(&extract, "--ImageReader.camera_params"),
            Some(inputs.params_arg())
        );

        let rig = strings(&commands[1]);
        assert_eq!(
            value_of(&rig, "--rig_config_path"),
            Some(request.rig_config_path.to_string_lossy().into_owned())
        );

        let matcher = strings(&commands[2]);
        assert_eq!(
            value_of(&matcher, "--SequentialMatching.loop_detection").as_deref(),
            Some("1")
        );

        let mapper = strings(&commands[3]);
        for key in [
            "--Mapper.ba_refine_focal_length",
            "--Mapper.ba_refine_principal_point",
            "--Mapper.ba_refine_extra_params",
            "--Mapper.ba_refine_sensor_from_rig",
        ] {
            assert_eq!(value_of(&mapper, key).as_deref(), Some("0"), "{key}");
        }
        assert_eq!(
            value_of(&mapper, "--output_path"),
            Some(workspace.sparse_path.to_string_lossy().into_owned())
        );
    }

    #[test]
    fn test_exhaustive_matcher_has_no_loop_flag() {
        let (_dir, request, inputs) = fixture();
        let cli = ColmapCli::from_config(&DriverConfig {
            matcher: Matcher::Exhaustive,
            ..DriverConfig::default()
        });
        let workspace = EngineWorkspace::new(&request.output_path);
        let commands = cli.commands(&request, &inputs, &workspace);
        let matcher = strings(&commands[2]);
        assert_eq!(matcher[0], "exhaustive_matcher");
        assert!(value_of(&matcher, "--SequentialMatching.loop_detection").is_none());
    }

    #[test]
    fn test_missing_executable_is_engine_error() {
        let (dir, request, inputs) = fixture();
        let cli = ColmapCli::from_config(&DriverConfig {
            colmap_executable: dir.path().join("no-such-colmap"),
            ..DriverConfig::default()
        });
        let err = cli.reconstruct(&request, &inputs).unwrap_err();
        match err {
            PipelineError::Engine { stage, message } => {
                assert_eq!(stage, "feature_extractor");
                assert!(message.contains("not found"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use std::time::{Duration, Instant};

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-colmap");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_successful_run_reports_first_model() {
            let (dir, request, inputs) = fixture();
            // mapper --database_path D --image_path I --output_path S ...
            let exe = script(
                dir.path(),
                "echo \"stage $1\"\nif [ \"$1\" = mapper ]; then mkdir -p \"$7/0\"; fi\nexit 0",
            );
            let cli = ColmapCli::from_config(&DriverConfig {
                colmap_executable: exe,
                ..DriverConfig::default()
            });
            let model = cli.reconstruct(&request, &inputs).unwrap();
            assert_eq!(model, Some(request.output_path.join("sparse").join("0")));
        }

        #[test]
        fn test_failing_stage_is_named() {
            let (dir, request, inputs) = fixture();
            let exe = script(
                dir.path(),
                "if [ \"$1\" = rig_configurator ]; then echo boom >&2; exit 3; fi\nexit 0",
            );
            let cli = ColmapCli::from_config(&DriverConfig {
                colmap_executable: exe,
                ..DriverConfig::default()
            });
            let err = cli.reconstruct(&request, &inputs).unwrap_err();
            match err {
                PipelineError::Engine { stage, message } => {
                    assert_eq!(stage, "rig_configurator");
                    assert!(message.contains("exit code 3"), "{message}");
                    assert!(message.contains("boom"), "{message}");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }

        #[test]
        fn test_failure_carries_engine_diagnostics() {
            let (dir, request, inputs) = fixture();
            let exe = script(
                dir.path(),
                "i=0\nwhile [ $i -lt 30 ]; do echo \"progress $i\"; i=$((i+1)); done\n\
                 echo 'ERROR: no images with matches found' >&2\nexit 1",
            );
            let cli = ColmapCli::from_config(&DriverConfig {
                colmap_executable: exe,
                ..DriverConfig::default()
            });
            let err = cli.reconstruct(&request, &inputs).unwrap_err();
            match err {
                PipelineError::Engine { stage, message } => {
                    assert_eq!(stage, "feature_extractor");
                    assert!(message.contains("exit code 1"), "{message}");
                    assert!(message.contains("no images with matches found"), "{message}");
                    // Only the tail of a long stream is kept.
                    assert!(message.contains("progress 29"), "{message}");
                    assert!(!message.contains("progress 0\n"), "{message}");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }

        #[test]
        fn test_timeout_kills_the_stage() {
            let (dir, request, inputs) = fixture();
            let exe = script(dir.path(), "exec sleep 5");
            let cli = ColmapCli {
                timeout: Some(Duration::from_millis(200)),
                ..ColmapCli::from_config(&DriverConfig {
                    colmap_executable: exe,
                    ..DriverConfig::default()
                })
            };
            let started = Instant::now();
            let err = cli.reconstruct(&request, &inputs).unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(4));
            match err {
                PipelineError::Engine { stage, message } => {
                    assert_eq!(stage, "feature_extractor");
                    assert!(message.contains("timed out"), "{message}");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }
}

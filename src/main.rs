//! `omni-rig` command line.
//!
//! ```bash
//! omni-rig convert --input panoramas/ --output outputs --base-pitch -35 --base-pitch 35
//! omni-rig reconstruct \
//!   --image-path outputs/<run_id>/images \
//!   --output-path outputs/<run_id>/sfm \
//!   --rig-config outputs/<run_id>/rig_config.json \
//!   --camera-config outputs/<run_id>/camera_params.json
//! omni-rig lattice --yaw-steps 6
//! ```

use clap::{Args, Parser, Subcommand};
use flexi_logger::{
    colored_detailed_format, detailed_format, Duplicate, FileSpec, FlexiLoggerError, Logger,
    LoggerHandle,
};
use log::{error, info};
use omni_rig::camera::ColmapCameraModel;
use omni_rig::config::RunConfig;
use omni_rig::dataset::{DatasetLayout, FrameSource};
use omni_rig::error::PipelineError;
use omni_rig::pipeline::{CancelToken, Pipeline};
use omni_rig::projection::{CubemapLayout, PanoramaProjection, ProjectionKind};
use omni_rig::reconstruction::{
    select_backend, DriverConfig, Matcher, ReconstructionDriver, ReconstructionRequest,
};
use omni_rig::util::OutputFormat;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

/// Panorama to camera-rig conversion and reconstruction tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Slice panorama frames into a virtual pinhole rig dataset
    Convert(ConvertArgs),
    /// Run the reconstruction engine on a rig dataset
    Reconstruct(ReconstructArgs),
    /// Print the view lattice and per-slot intrinsics without reading frames
    Lattice(SamplingArgs),
}

/// Sampling options; each one overrides the YAML config when given.
#[derive(Args, Debug)]
struct SamplingArgs {
    /// Run configuration in YAML
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Panorama projection: equirectangular or cubemap
    #[arg(long)]
    projection: Option<ProjectionKind>,

    /// Cubemap face layout: horizon or dice
    #[arg(long)]
    cubemap_layout: Option<CubemapLayout>,

    /// Base pitch in degrees, repeat for several rings
    #[arg(long = "base-pitch", allow_negative_numbers = true)]
    base_pitches: Vec<f64>,

    #[arg(long)]
    yaw_steps: Option<u32>,

    #[arg(long, allow_negative_numbers = true)]
    yaw_offset: Option<f64>,

    /// Horizontal field of view in degrees
    #[arg(long)]
    fov_h: Option<f64>,

    /// Vertical field of view in degrees
    #[arg(long)]
    fov_v: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// PINHOLE, SIMPLE_PINHOLE or SIMPLE_RADIAL
    #[arg(long)]
    camera_model: Option<ColmapCameraModel>,
}

impl SamplingArgs {
    fn run_config(&self) -> Result<RunConfig, PipelineError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load_from_yaml(path)?,
            None => RunConfig::default(),
        };
        let sampling = &mut config.sampling;
        if !self.base_pitches.is_empty() {
            sampling.base_pitches = self.base_pitches.clone();
        }
        if let Some(steps) = self.yaw_steps {
            sampling.yaw_steps = steps;
        }
        if let Some(offset) = self.yaw_offset {
            sampling.yaw_offset = offset;
        }
        if let Some(fov) = self.fov_h {
            sampling.fov_h = fov;
        }
        if let Some(fov) = self.fov_v {
            sampling.fov_v = fov;
        }
        if let Some(width) = self.width {
            sampling.width = width;
        }
        if let Some(height) = self.height {
            sampling.height = height;
        }
        if let Some(kind) = self.projection {
            config.projection = match kind {
                ProjectionKind::Equirectangular => PanoramaProjection::equirectangular(),
                ProjectionKind::Cubemap => PanoramaProjection::cubemap(
                    self.cubemap_layout
                        .unwrap_or(config.projection.cubemap_layout),
                ),
            };
        } else if let Some(layout) = self.cubemap_layout {
            config.projection.cubemap_layout = layout;
        }
        if let Some(model) = self.camera_model {
            config.camera_model = model;
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Panorama image or directory of panorama frames
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Root directory for datasets
    #[arg(short = 'o', long, default_value = "outputs")]
    output: PathBuf,

    /// Dataset name under the output root (default: run_<unix time>)
    #[arg(long)]
    run_id: Option<String>,

    /// Keep every N-th input frame
    #[arg(long)]
    frame_stride: Option<usize>,

    /// Rendered image format: jpg or png
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Skip frames that cannot be projected instead of aborting
    #[arg(long)]
    skip_failed_frames: bool,

    #[command(flatten)]
    sampling: SamplingArgs,
}

#[derive(Args, Debug)]
struct ReconstructArgs {
    /// Image directory holding one sub-directory per rig slot
    #[arg(long)]
    image_path: PathBuf,

    /// Workspace for the database and the sparse models
    #[arg(long)]
    output_path: PathBuf,

    #[arg(long)]
    rig_config: PathBuf,

    #[arg(long)]
    camera_config: PathBuf,

    #[arg(long, default_value = "PINHOLE")]
    camera_model: ColmapCameraModel,

    /// Open the engine viewer on the sparse model
    #[arg(long)]
    visualize: bool,

    /// COLMAP executable
    #[arg(long)]
    colmap: Option<PathBuf>,

    /// sequential, exhaustive, vocab_tree or spatial
    #[arg(long, default_value = "sequential")]
    matcher: Matcher,

    /// Disable loop detection in sequential matching
    #[arg(long)]
    no_loop_detection: bool,

    /// Give up after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn init_logger(log_dir: Option<&Path>) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str("info")?
        .format_for_stderr(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string());
    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename("omni-rig")
                    .suppress_timestamp()
                    .suffix("log"),
            )
            .duplicate_to_stderr(Duplicate::All)
            .format_for_files(detailed_format),
        None => logger.log_to_stderr(),
    };
    logger.start()
}

fn default_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("run_{secs}")
}

fn convert(args: ConvertArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = args.sampling.run_config()?;
    if let Some(stride) = args.frame_stride {
        config.frame_stride = stride;
    }
    if let Some(format) = args.format {
        config.image_format = format;
    }
    config.skip_failed_frames |= args.skip_failed_frames;

    let pipeline = Pipeline::new(config)?;
    let source = FrameSource::from_path(&args.input, pipeline.config().frame_stride)?;
    let run_id = args.run_id.unwrap_or_else(default_run_id);
    let layout = DatasetLayout::for_run(&args.output, &run_id, pipeline.config().image_format);

    let report = pipeline.run(&source, &layout, &CancelToken::new())?;
    for frame in &report.skipped_frames {
        info!("Skipped frame {frame}");
    }
    println!("{}", report.dataset_root.display());
    Ok(())
}

fn reconstruct(args: ReconstructArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut driver_config = DriverConfig {
        matcher: args.matcher,
        loop_detection: !args.no_loop_detection,
        timeout_secs: args.timeout_secs,
        ..DriverConfig::default()
    };
    if let Some(colmap) = args.colmap {
        driver_config.colmap_executable = colmap;
    }
    let driver = ReconstructionDriver::new(select_backend(&driver_config, None)?);

    let request = ReconstructionRequest {
        image_root: args.image_path,
        rig_config_path: args.rig_config,
        camera_params_path: args.camera_config,
        output_path: args.output_path,
        camera_model: args.camera_model,
        visualize: args.visualize,
    };
    let result = driver.run(&request);
    if !result.success {
        return Err(result
            .error_message
            .unwrap_or_else(|| "reconstruction failed".to_string())
            .into());
    }
    if let Some(path) = result.sparse_model_path {
        println!("{}", path.display());
    }
    Ok(())
}

fn lattice(args: SamplingArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(args.run_config()?)?;
    let artifacts = pipeline.artifacts();
    let reference = artifacts
        .rig_config
        .reference()
        .map(|camera| camera.slot_id.clone())
        .unwrap_or_default();

    println!(
        "{:<22} {:>8} {:>8} {:>10} {:>10} {:>8} {:>8}",
        "slot", "pitch", "yaw", "fx", "fy", "cx", "cy"
    );
    println!("{}", "-".repeat(80));
    for slot in &artifacts.camera_params.slots {
        let marker = if slot.slot_id == reference { " (ref)" } else { "" };
        println!(
            "{:<22} {:>8.2} {:>8.2} {:>10.3} {:>10.3} {:>8.1} {:>8.1}{marker}",
            slot.slot_id, slot.pitch, slot.yaw, slot.fx, slot.fy, slot.cx, slot.cy
        );
    }
    println!(
        "{} slots, {} {}x{}",
        artifacts.camera_params.slots.len(),
        pipeline.config().camera_model,
        pipeline.config().sampling.width,
        pipeline.config().sampling.height
    );
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Convert(args) => convert(args),
        Commands::Reconstruct(args) => reconstruct(args),
        Commands::Lattice(args) => lattice(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger = match init_logger(cli.log_dir.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialise logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

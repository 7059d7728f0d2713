//! Omni Rig Library
//!
//! Turns omnidirectional panoramas into a rigid rig of virtual pinhole
//! cameras that a pinhole-only Structure-from-Motion engine can reconstruct.
//! The library provides:
//! - A deterministic View Lattice of (pitch, yaw) viewing directions
//! - Rectilinear reprojection of equirectangular and cubemap panoramas
//! - Rig topology and camera intrinsics in the engine's JSON shapes
//! - A reproducible on-disk dataset layout with a manifest
//! - A reconstruction driver with subprocess and in-process backends

pub mod camera;
pub mod config;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod projection;
pub mod reconstruction;
pub mod rig;
pub mod util;

// Re-export commonly used types
pub use camera::{CameraModel, ColmapCameraModel, Intrinsics, PinholeModel, Resolution};
pub use config::RunConfig;
pub use dataset::{DatasetLayout, FrameSource, Manifest};
pub use error::PipelineError;
pub use geometry::{SamplingConfig, ViewDirection, ViewLattice};
pub use pipeline::{CancelToken, ConversionReport, Pipeline};
pub use projection::{PanoramaFrame, PanoramaProjection, ProjectionKind, ViewProjector};
pub use reconstruction::{
    ReconstructionBackend, ReconstructionDriver, ReconstructionRequest, ReconstructionResult,
};
pub use rig::{CameraParams, RigArtifacts, RigConfig};

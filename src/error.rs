//! Error taxonomy shared by the sampling, projection, layout and
//! reconstruction stages.
//!
//! Every variant carries enough context (frame index, slot id, path, engine
//! stage) to reproduce a failure without rerunning the whole pipeline.

use crate::camera::CameraModelError;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Invalid lattice parameters, unsupported projection kind or camera model.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A source frame could not be resampled for a view.
    #[error("Projection error at frame {frame_index}{}: {reason}", slot_suffix(.slot_id))]
    Projection {
        frame_index: usize,
        slot_id: Option<String>,
        reason: String,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding of an on-disk artifact failed.
    #[error("Serialization error at {}: {message}", .path.display())]
    Serialization { path: PathBuf, message: String },

    /// Slot identifiers disagree between the rig file, the camera file and
    /// the image directory.
    #[error("Rig consistency error: {0}")]
    RigConsistency(String),

    /// The external reconstruction engine failed or timed out.
    #[error("Engine error during {stage}: {message}")]
    Engine { stage: String, message: String },

    #[error("Run cancelled after frame {completed_frames}")]
    Cancelled { completed_frames: usize },
}

fn slot_suffix(slot_id: &Option<String>) -> String {
    match slot_id {
        Some(slot) => format!(" ({slot})"),
        None => String::new(),
    }
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn serialization(path: impl AsRef<Path>, message: impl ToString) -> Self {
        PipelineError::Serialization {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn projection(frame_index: usize, slot_id: Option<&str>, reason: impl ToString) -> Self {
        PipelineError::Projection {
            frame_index,
            slot_id: slot_id.map(str::to_string),
            reason: reason.to_string(),
        }
    }

    pub fn engine(stage: impl ToString, message: impl ToString) -> Self {
        PipelineError::Engine {
            stage: stage.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<CameraModelError> for PipelineError {
    fn from(err: CameraModelError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

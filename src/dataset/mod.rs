//! On-disk dataset layout.
//!
//! ```text
//! <root>/
//!   images/<slot_id>/<frame_index:04>.<ext>
//!   rig_config.json
//!   camera_params.json
//!   manifest.csv
//!   run_config.yaml
//! ```
//!
//! The slot directory names are the only link between the rig files and the
//! images, so they are always the lattice slot ids verbatim.

use crate::error::PipelineError;
use crate::rig::{CAMERA_PARAMS_FILE, RIG_CONFIG_FILE};
use crate::util::{ensure_dir, OutputFormat};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub mod manifest;
pub mod source;

pub use manifest::{Manifest, ManifestRow};
pub use source::FrameSource;

pub const IMAGES_DIR: &str = "images";
pub const MANIFEST_FILE: &str = "manifest.csv";
pub const RUN_CONFIG_FILE: &str = "run_config.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    format: OutputFormat,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat) -> Self {
        DatasetLayout {
            root: root.into(),
            format,
        }
    }

    /// `<output>/<run_id>`.
    pub fn for_run(output: &Path, run_id: &str, format: OutputFormat) -> Self {
        Self::new(output.join(run_id), format)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn slot_dir(&self, slot_id: &str) -> PathBuf {
        self.images_dir().join(slot_id)
    }

    pub fn file_name(&self, frame_index: usize) -> String {
        format!("{frame_index:04}.{}", self.format.extension())
    }

    pub fn image_path(&self, frame_index: usize, slot_id: &str) -> PathBuf {
        self.slot_dir(slot_id).join(self.file_name(frame_index))
    }

    /// Same as [`Self::image_path`], relative to the root and `/` separated
    /// on every platform.
    pub fn relative_image_path(&self, frame_index: usize, slot_id: &str) -> String {
        format!("{IMAGES_DIR}/{slot_id}/{}", self.file_name(frame_index))
    }

    pub fn rig_config_path(&self) -> PathBuf {
        self.root.join(RIG_CONFIG_FILE)
    }

    pub fn camera_params_path(&self) -> PathBuf {
        self.root.join(CAMERA_PARAMS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn run_config_path(&self) -> PathBuf {
        self.root.join(RUN_CONFIG_FILE)
    }

    /// Creates the root and one image directory per slot.
    ///
    /// Workers later write into distinct files of these directories, so no
    /// directory is created concurrently. Re-preparing a root for the same
    /// lattice is fine; a root holding slot directories of another lattice
    /// is refused, since the rig files would no longer match its images.
    pub fn prepare<'a>(
        &self,
        slot_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), PipelineError> {
        let wanted: BTreeSet<&str> = slot_ids.into_iter().collect();
        let images_dir = self.images_dir();
        if images_dir.is_dir() {
            let stale: Vec<String> = slot_directories(&images_dir)?
                .into_iter()
                .filter(|slot| !wanted.contains(slot.as_str()))
                .collect();
            if !stale.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "{} already holds slot directories of another lattice {stale:?}; \
                     choose a new run id",
                    self.root.display()
                )));
            }
        }

        ensure_dir(&self.root)?;
        for slot_id in wanted {
            ensure_dir(&self.slot_dir(slot_id))?;
        }
        Ok(())
    }
}

/// Names of the sub-directories of `images_dir`.
pub fn slot_directories(images_dir: &Path) -> Result<BTreeSet<String>, PipelineError> {
    let entries = fs::read_dir(images_dir).map_err(|e| PipelineError::io(images_dir, e))?;
    let mut slots = BTreeSet::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(images_dir, e))?.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                slots.insert(name.to_string());
            }
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths() {
        let layout = DatasetLayout::for_run(Path::new("outputs"), "run_a", OutputFormat::Png);
        assert_eq!(layout.root(), Path::new("outputs/run_a"));
        assert_eq!(
            layout.image_path(7, "pitch_-35_yaw_90"),
            Path::new("outputs/run_a/images/pitch_-35_yaw_90/0007.png")
        );
        assert_eq!(
            layout.relative_image_path(12, "pitch_35_yaw_0"),
            "images/pitch_35_yaw_0/0012.png"
        );
        assert_eq!(
            layout.rig_config_path(),
            Path::new("outputs/run_a/rig_config.json")
        );
        assert_eq!(layout.file_name(12345), "12345.png");
    }

    #[test]
    fn test_prepare_creates_slot_dirs() {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("run"), OutputFormat::Jpg);
        layout
            .prepare(["pitch_0_yaw_0", "pitch_0_yaw_180"])
            .unwrap();
        // Idempotent for the same lattice.
        layout
            .prepare(["pitch_0_yaw_180", "pitch_0_yaw_0"])
            .unwrap();
        fs::write(layout.images_dir().join("stray.txt"), "x").unwrap();

        let slots = slot_directories(&layout.images_dir()).unwrap();
        assert_eq!(
            slots.into_iter().collect::<Vec<_>>(),
            vec!["pitch_0_yaw_0", "pitch_0_yaw_180"]
        );
    }

    #[test]
    fn test_prepare_refuses_other_lattice() {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("run"), OutputFormat::Jpg);
        layout
            .prepare(["pitch_0_yaw_0", "pitch_0_yaw_180"])
            .unwrap();

        let err = layout.prepare(["pitch_0_yaw_0"]).unwrap_err();
        match err {
            PipelineError::Configuration(message) => {
                assert!(message.contains("pitch_0_yaw_180"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!layout.slot_dir("pitch_35_yaw_0").exists());
    }

    #[test]
    fn test_slot_directories_missing() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            slot_directories(&dir.path().join("images")),
            Err(PipelineError::Io { .. })
        ));
    }
}

//! Panorama to rig dataset conversion.
//!
//! A run validates its configuration into an immutable [`ViewProjector`],
//! assembles the rig once, then renders frames in order. The views of one
//! frame are rendered on the rayon pool; each worker writes its own output
//! path, so the workers share nothing mutable.

use crate::config::RunConfig;
use crate::dataset::{DatasetLayout, FrameSource, Manifest, ManifestRow};
use crate::error::PipelineError;
use crate::projection::{PanoramaFrame, ViewProjector};
use crate::rig::{self, RigArtifacts};
use crate::util::save_image;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub dataset_root: PathBuf,
    pub frames_written: usize,
    pub images_written: usize,
    /// Frames dropped by frame-level isolation.
    pub skipped_frames: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: RunConfig,
    projector: ViewProjector,
    artifacts: RigArtifacts,
}

impl Pipeline {
    /// Validates `config` and precomputes everything frame-independent.
    ///
    /// Any configuration problem surfaces here, before a frame is read.
    pub fn new(config: RunConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let projector = ViewProjector::new(&config.sampling, config.projection)?;
        let artifacts = rig::assemble(&projector, config.camera_model)?;
        info!(
            "View lattice: {} slots ({} pitches x {} yaw steps), {}x{} px",
            projector.lattice().len(),
            config.sampling.base_pitches.len(),
            config.sampling.yaw_steps,
            config.sampling.width,
            config.sampling.height
        );
        Ok(Pipeline {
            config,
            projector,
            artifacts,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn projector(&self) -> &ViewProjector {
        &self.projector
    }

    pub fn artifacts(&self) -> &RigArtifacts {
        &self.artifacts
    }

    /// Converts every frame of `source` into the dataset at `layout`.
    ///
    /// On any failure the partial dataset stays on disk together with a
    /// manifest of the images written so far.
    pub fn run(
        &self,
        source: &FrameSource,
        layout: &DatasetLayout,
        cancel: &CancelToken,
    ) -> Result<ConversionReport, PipelineError> {
        let slot_ids = self.projector.lattice().slot_ids();
        layout.prepare(slot_ids.iter().map(String::as_str))?;
        self.artifacts.save(layout.root())?;
        self.config.save_to_yaml(&layout.run_config_path())?;
        info!(
            "Writing rig dataset for {} frames to {}",
            source.len(),
            layout.root().display()
        );

        let mut manifest = Manifest::default();
        let mut report = ConversionReport {
            dataset_root: layout.root().to_path_buf(),
            frames_written: 0,
            images_written: 0,
            skipped_frames: Vec::new(),
        };
        let outcome = self.convert_frames(source, layout, cancel, &mut manifest, &mut report);
        let written = manifest.write(&layout.manifest_path());
        if let Err(e) = outcome {
            if let Err(manifest_error) = written {
                warn!("Could not write the manifest of the aborted run: {manifest_error}");
            }
            return Err(e);
        }
        written?;

        info!(
            "Wrote {} images for {} frames ({} skipped)",
            report.images_written,
            report.frames_written,
            report.skipped_frames.len()
        );
        Ok(report)
    }

    fn convert_frames(
        &self,
        source: &FrameSource,
        layout: &DatasetLayout,
        cancel: &CancelToken,
        manifest: &mut Manifest,
        report: &mut ConversionReport,
    ) -> Result<(), PipelineError> {
        for (frame_index, path) in source.iter() {
            if cancel.is_cancelled() {
                warn!("Run cancelled before frame {frame_index}");
                return Err(PipelineError::Cancelled {
                    completed_frames: report.frames_written,
                });
            }
            debug!("Frame {frame_index}: {}", path.display());

            let rows = source
                .load(frame_index, self.config.projection)
                .and_then(|frame| self.process_frame(&frame, layout));
            match rows {
                Ok(rows) => {
                    report.frames_written += 1;
                    report.images_written += rows.len();
                    manifest.extend(rows);
                }
                Err(e @ PipelineError::Projection { .. }) if self.config.skip_failed_frames => {
                    warn!("Skipping frame {frame_index}: {e}");
                    report.skipped_frames.push(frame_index);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Renders and writes every lattice view of one frame.
    ///
    /// Rows come back in lattice order regardless of which worker finished
    /// first.
    pub fn process_frame(
        &self,
        frame: &PanoramaFrame,
        layout: &DatasetLayout,
    ) -> Result<Vec<ManifestRow>, PipelineError> {
        let lattice = self.projector.lattice();
        lattice
            .iter()
            .enumerate()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(slot, (slot_id, direction, _))| -> Result<ManifestRow, PipelineError> {
                let image = self.projector.render(frame, slot)?;
                let path = layout.image_path(frame.frame_index, slot_id);
                save_image(&image, &path, layout.format())?;
                debug!("Wrote {}", path.display());
                Ok(ManifestRow {
                    frame_index: frame.frame_index,
                    slot_id: slot_id.to_string(),
                    pitch: direction.pitch_deg,
                    yaw: direction.yaw_deg,
                    relative_path: layout.relative_image_path(frame.frame_index, slot_id),
                })
            })
            .collect()
    }
}

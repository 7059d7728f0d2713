//! `manifest.csv`: one row per rendered view.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub frame_index: usize,
    pub slot_id: String,
    pub pitch: f64,
    pub yaw: f64,
    /// Image path relative to the dataset root, `/` separated.
    pub relative_path: String,
}

/// Rows in frame order, lattice order within a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn extend(&mut self, rows: impl IntoIterator<Item = ManifestRow>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct frames with at least one row.
    pub fn frame_count(&self) -> usize {
        let mut frames: Vec<usize> = self.rows.iter().map(|r| r.frame_index).collect();
        frames.dedup();
        frames.len()
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| PipelineError::serialization(path, e))?;
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|e| PipelineError::serialization(path, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let mut reader =
            csv::Reader::from_path(path).map_err(|e| PipelineError::serialization(path, e))?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<ManifestRow>, _>>()
            .map_err(|e| PipelineError::serialization(path, e))?;
        Ok(Manifest { rows })
    }
}

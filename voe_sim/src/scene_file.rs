//! Recorded scenes on disk.
//!
//! A scene file is JSON holding per-frame object observations, optional id
//! masks and occlusion flags, produced by an upstream perception stack.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use voe_core::masks::blank_mask;
use voe_core::{FrameInput, FrameTime, ObjectId, ObjectMask, Observation, Plausibility, Position, VoeConfig};

#[derive(Error, Debug)]
pub enum SceneFileError {
    #[error("Scene path not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Frame {time}: mask rows have unequal lengths")]
    RaggedMask { time: FrameTime },
}

/// One tracked object in a recorded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: ObjectId,
    pub position: Position,

    #[serde(default = "default_present")]
    pub present: bool,
}

fn default_present() -> bool {
    true
}

/// One recorded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFrame {
    pub time: FrameTime,
    pub objects: Vec<SceneObject>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occluded: Vec<ObjectId>,

    /// Row-major id mask; `-1` for background
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<Vec<ObjectId>>>,
}

impl SceneFrame {
    /// Converts to engine input. Frames without a mask get an empty one.
    pub fn to_input(&self) -> Result<FrameInput, SceneFileError> {
        let mask = match &self.mask {
            Some(rows) => mask_from_rows(rows).ok_or(SceneFileError::RaggedMask { time: self.time })?,
            None => blank_mask(0, 0),
        };

        let observations = self
            .objects
            .iter()
            .map(|o| Observation {
                time: self.time,
                object_id: o.id,
                position: o.position,
                present: o.present,
            })
            .collect();

        Ok(FrameInput {
            time: self.time,
            mask,
            observations,
            occluded: self.occluded.clone(),
        })
    }
}

fn mask_from_rows(rows: &[Vec<ObjectId>]) -> Option<ObjectMask> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return None;
    }
    Some(DMatrix::from_fn(rows.len(), ncols, |r, c| rows[r][c]))
}

/// A recorded scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    pub name: String,

    /// Verdict the scene should produce, when labelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Plausibility>,

    /// Detector overrides; runner defaults otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<VoeConfig>,

    pub frames: Vec<SceneFrame>,
}

impl SceneFile {
    pub fn load(path: &Path) -> Result<Self, SceneFileError> {
        let text = fs::read_to_string(path).map_err(|source| SceneFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SceneFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), SceneFileError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| SceneFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| SceneFileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Engine inputs for every frame, in file order.
    pub fn inputs(&self) -> Result<Vec<FrameInput>, SceneFileError> {
        self.frames.iter().map(SceneFrame::to_input).collect()
    }
}

/// Lists the scene files to run.
///
/// A file path is returned as is. A directory yields its `*.json` files whose
/// stem contains `filter` and does not contain `exclude`, sorted by name.
pub fn find_scenes(
    path: &Path,
    filter: Option<&str>,
    exclude: Option<&str>,
) -> Result<Vec<PathBuf>, SceneFileError> {
    if !path.exists() {
        return Err(SceneFileError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = fs::read_dir(path).map_err(|source| SceneFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut scenes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SceneFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let candidate = entry.path();

        if candidate.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = candidate
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        if filter.is_some_and(|f| !stem.contains(f)) {
            continue;
        }
        if exclude.is_some_and(|x| stem.contains(x)) {
            continue;
        }
        scenes.push(candidate);
    }

    scenes.sort();
    debug!("found {} scene files under {}", scenes.len(), path.display());
    Ok(scenes)
}

//! Session recording and playback
//!
//! Recordings hold resolved world-space poses, one entry per frame, and are
//! stored as pretty-printed JSON. The initialization snapshot stores the
//! skeleton shape (bone ids and parent ids) next to them so playback can
//! announce a definition before emitting frames.

pub mod player;
pub mod recorder;

pub use player::SessionPlayer;
pub use recorder::{SaveOutcome, SessionRecorder};

use glam::{Quat, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{RecordingError, SkeletonError};
use crate::skeleton::{BoneId, BonePose, ResolvedFrame, SkeletonDefinition};

/// Format version written into every recording
pub const RECORDING_VERSION: &str = "1.0";

/// One bone of a recorded frame, in resolved space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedBone {
    pub bone_id: BoneId,
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub frame_id: u32,
    pub timestamp: f32,
    pub unix_time: f64,
    #[serde(default)]
    pub bones: Vec<RecordedBone>,
}

impl RecordedFrame {
    /// Capture a resolved frame, optionally restricted to `only` bones
    pub fn from_resolved(frame: &ResolvedFrame, only: Option<&HashSet<BoneId>>) -> Self {
        let bones = frame
            .bones
            .iter()
            .filter(|(id, _)| only.map_or(true, |set| set.contains(*id)))
            .map(|(id, pose)| RecordedBone {
                bone_id: *id,
                position: pose.position,
                rotation: pose.rotation,
            })
            .collect();

        Self {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            unix_time: frame.unix_time,
            bones,
        }
    }

    pub fn to_resolved(&self) -> ResolvedFrame {
        let bones: BTreeMap<BoneId, BonePose> = self
            .bones
            .iter()
            .map(|b| (b.bone_id, BonePose::new(b.position, b.rotation)))
            .collect();

        ResolvedFrame {
            frame_id: self.frame_id,
            timestamp: self.timestamp,
            unix_time: self.unix_time,
            bones,
            partial: Vec::new(),
        }
    }
}

/// A complete recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub approx_frame_rate: f32,
    #[serde(default)]
    pub frames: Vec<RecordedFrame>,
}

fn default_version() -> String {
    RECORDING_VERSION.to_string()
}

impl Default for Recording {
    fn default() -> Self {
        Self {
            version: default_version(),
            approx_frame_rate: 0.0,
            frames: Vec::new(),
        }
    }
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the recording as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), RecordingError> {
        write_json(path, self)
    }

    /// Read a recording. A file without frames is rejected as empty.
    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        let recording: Recording = read_json(path)?;
        if recording.frames.is_empty() {
            return Err(RecordingError::Empty(path.to_path_buf()));
        }
        if recording.version != RECORDING_VERSION {
            tracing::warn!(
                "Recording {} has version {}, expected {}",
                path.display(),
                recording.version,
                RECORDING_VERSION
            );
        }
        Ok(recording)
    }
}

/// Skeleton shape saved alongside recordings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationSnapshot {
    pub bone_ids: Vec<i32>,
    /// Parent of each entry in `bone_ids`, -1 for the root
    pub parent_ids: Vec<i32>,
}

impl InitializationSnapshot {
    pub fn from_definition(definition: &SkeletonDefinition) -> Self {
        let (bone_ids, parent_ids) = definition.id_arrays();
        Self {
            bone_ids,
            parent_ids,
        }
    }

    /// Rebuild a definition with identity rest poses
    pub fn to_definition(&self) -> Result<SkeletonDefinition, SkeletonError> {
        SkeletonDefinition::from_id_arrays(&self.bone_ids, &self.parent_ids)
    }

    pub fn save(&self, path: &Path) -> Result<(), RecordingError> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        read_json(path)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RecordingError> {
    let save_failed = |reason: String| RecordingError::Save {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| save_failed(e.to_string()))?;
    fs::write(path, json).map_err(|e| save_failed(e.to_string()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecordingError> {
    if !path.exists() {
        return Err(RecordingError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| RecordingError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if content.trim().is_empty() {
        return Err(RecordingError::Empty(path.to_path_buf()));
    }

    serde_json::from_str(&content).map_err(|e| RecordingError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolved(frame_id: u32) -> ResolvedFrame {
        let mut bones = BTreeMap::new();
        bones.insert(
            BoneId(0),
            BonePose::new(Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY),
        );
        bones.insert(
            BoneId(7),
            BonePose::new(
                Vec3::new(0.5, 1.5, -0.25),
                Quat::from_rotation_y(0.5),
            ),
        );
        ResolvedFrame {
            frame_id,
            timestamp: frame_id as f32 * 0.125,
            unix_time: 1_700_000_000.0 + frame_id as f64,
            bones,
            partial: Vec::new(),
        }
    }

    #[test]
    fn test_recorded_frame_filter() {
        let only: HashSet<BoneId> = [BoneId(7)].into_iter().collect();
        let frame = RecordedFrame::from_resolved(&resolved(3), Some(&only));
        assert_eq!(frame.bones.len(), 1);
        assert_eq!(frame.bones[0].bone_id, BoneId(7));

        let all = RecordedFrame::from_resolved(&resolved(3), None);
        assert_eq!(all.bones.len(), 2);
        assert_eq!(all.to_resolved().bones, resolved(3).bones);
    }

    #[test]
    fn test_recording_json_layout() {
        let mut recording = Recording::new();
        recording.frames.push(RecordedFrame::from_resolved(&resolved(1), None));

        let value = serde_json::to_value(&recording).unwrap();
        assert_eq!(value["version"], "1.0");
        let bone = &value["frames"][0]["bones"][0];
        assert_eq!(bone["bone_id"], 0);
        assert_eq!(bone["position"].as_array().unwrap().len(), 3);
        assert_eq!(bone["rotation"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut recording = Recording::new();
        recording.approx_frame_rate = 30.0;
        recording.frames.push(RecordedFrame::from_resolved(&resolved(1), None));
        recording.save(&path).unwrap();

        let loaded = Recording::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.frames[0].frame_id, 1);
        let a = loaded.frames[0].bones[1].rotation;
        let b = recording.frames[0].bones[1].rotation;
        assert!(a.dot(b).abs() > 1.0 - 1e-6);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            Recording::load(&missing),
            Err(RecordingError::NotFound(_))
        ));

        let blank = dir.path().join("blank.json");
        fs::write(&blank, "  \n").unwrap();
        assert!(matches!(Recording::load(&blank), Err(RecordingError::Empty(_))));

        let no_frames = dir.path().join("no_frames.json");
        fs::write(&no_frames, r#"{"version":"1.0","approx_frame_rate":0,"frames":[]}"#).unwrap();
        assert!(matches!(
            Recording::load(&no_frames),
            Err(RecordingError::Empty(_))
        ));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(matches!(
            Recording::load(&corrupt),
            Err(RecordingError::Parse { .. })
        ));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mocopi_initialization.json");

        let definition =
            SkeletonDefinition::from_id_arrays(&[0, 1, 2], &[-1, 0, 1]).unwrap();
        let snapshot = InitializationSnapshot::from_definition(&definition);
        assert_eq!(snapshot.parent_ids, vec![-1, 0, 1]);
        snapshot.save(&path).unwrap();

        let loaded = InitializationSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        let rebuilt = loaded.to_definition().unwrap();
        assert_eq!(rebuilt.root(), BoneId(0));
        assert_eq!(rebuilt.len(), 3);
    }

    #[test]
    fn test_snapshot_with_bad_shape() {
        let snapshot = InitializationSnapshot {
            bone_ids: vec![0, 1],
            parent_ids: vec![-1],
        };
        assert!(matches!(
            snapshot.to_definition(),
            Err(SkeletonError::LengthMismatch {
                bones: 2,
                parents: 1
            })
        ));
    }
}

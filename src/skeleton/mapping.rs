//! Tracker mappings: bind a resolved bone to a named target transform.

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{BoneId, BonePose, ResolvedFrame};

/// Binding from a bone to a target slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerMapping {
    /// Bone to follow (0 = hips, 10 = head, ...)
    pub bone_id: BoneId,
    /// Name of the target transform to write
    pub target: String,
    /// Write the resolved position
    pub apply_position: bool,
    /// Write the resolved rotation
    pub apply_rotation: bool,
    /// Added after the resolved position
    pub position_offset: Vec3,
    /// Euler angles in degrees, multiplied after the resolved rotation
    pub rotation_offset: Vec3,
}

impl Default for TrackerMapping {
    fn default() -> Self {
        Self {
            bone_id: BoneId(0),
            target: String::new(),
            apply_position: true,
            apply_rotation: true,
            position_offset: Vec3::ZERO,
            rotation_offset: Vec3::ZERO,
        }
    }
}

impl TrackerMapping {
    pub fn new(bone_id: BoneId, target: impl Into<String>) -> Self {
        Self {
            bone_id,
            target: target.into(),
            ..Default::default()
        }
    }

    /// Rotation offset as a quaternion. Applies Z, then X, then Y.
    pub fn rotation_offset_quat(&self) -> Quat {
        if self.rotation_offset == Vec3::ZERO {
            return Quat::IDENTITY;
        }
        Quat::from_euler(
            EulerRot::YXZ,
            self.rotation_offset.y.to_radians(),
            self.rotation_offset.x.to_radians(),
            self.rotation_offset.z.to_radians(),
        )
    }

    /// Resolved pose with this mapping's offsets applied
    pub fn offset_pose(&self, resolved: &BonePose) -> BonePose {
        BonePose {
            position: resolved.position + self.position_offset,
            rotation: resolved.rotation * self.rotation_offset_quat(),
        }
    }
}

/// Current transform of a target slot. New slots start at the origin with an
/// identity rotation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TargetPose {
    pub position: Vec3,
    pub rotation: Quat,
    /// Frame id of the last write
    pub frame_id: Option<u32>,
}

/// Named target transforms written by mappings
#[derive(Debug, Default)]
pub struct TargetTable {
    targets: BTreeMap<String, TargetPose>,
}

impl TargetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TargetPose> {
        self.targets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetPose)> {
        self.targets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn entry(&mut self, name: &str) -> &mut TargetPose {
        self.targets.entry(name.to_string()).or_default()
    }
}

/// The set of mappings a tracker drives.
///
/// Copy-on-write: `apply` iterates a shared snapshot, so edits made while a
/// frame is being applied never invalidate the iteration.
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    mappings: Arc<Vec<TrackerMapping>>,
}

impl MappingSet {
    /// Build a mapping set, dropping mappings without a target name
    pub fn new(mappings: Vec<TrackerMapping>) -> Self {
        let mut set = Self {
            mappings: Arc::new(mappings),
        };
        set.validate();
        set
    }

    /// Remove mappings that cannot be applied
    pub fn validate(&mut self) {
        if self.mappings.iter().all(|m| !m.target.trim().is_empty()) {
            return;
        }
        let mappings = Arc::make_mut(&mut self.mappings);
        mappings.retain(|m| {
            let keep = !m.target.trim().is_empty();
            if !keep {
                tracing::warn!("Removing mapping for bone {} - target name is empty", m.bone_id);
            }
            keep
        });
    }

    pub fn add(&mut self, mapping: TrackerMapping) {
        if mapping.target.trim().is_empty() {
            tracing::warn!("Ignoring mapping for bone {} - target name is empty", mapping.bone_id);
            return;
        }
        Arc::make_mut(&mut self.mappings).push(mapping);
    }

    /// Target name of the first mapping bound to `bone`
    pub fn target_for_bone(&self, bone: BoneId) -> Option<&str> {
        self.mappings
            .iter()
            .find(|m| m.bone_id == bone)
            .map(|m| m.target.as_str())
    }

    pub fn bone_ids(&self) -> HashSet<BoneId> {
        self.mappings.iter().map(|m| m.bone_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackerMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Write every mapped bone present in `frame` into its target.
    ///
    /// Returns the number of targets written.
    pub fn apply(&self, frame: &ResolvedFrame, targets: &mut TargetTable) -> usize {
        let snapshot = Arc::clone(&self.mappings);
        let mut written = 0;

        for mapping in snapshot.iter() {
            let Some(resolved) = frame.bones.get(&mapping.bone_id) else {
                continue;
            };
            let pose = mapping.offset_pose(resolved);
            let target = targets.entry(&mapping.target);

            if mapping.apply_position {
                target.position = pose.position;
            }
            if mapping.apply_rotation {
                target.rotation = pose.rotation;
            }
            target.frame_id = Some(frame.frame_id);
            written += 1;
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn frame_with(bone: u16, pose: BonePose) -> ResolvedFrame {
        let mut bones = BTreeMap::new();
        bones.insert(BoneId(bone), pose);
        ResolvedFrame {
            frame_id: 7,
            timestamp: 0.0,
            unix_time: 0.0,
            bones,
            partial: Vec::new(),
        }
    }

    #[test]
    fn test_apply_writes_offset_pose() {
        let mut mapping = TrackerMapping::new(BoneId(10), "head");
        mapping.position_offset = Vec3::new(0.0, 0.1, 0.0);
        mapping.rotation_offset = Vec3::new(0.0, 90.0, 0.0);
        let set = MappingSet::new(vec![mapping]);

        let mut targets = TargetTable::new();
        let frame = frame_with(10, BonePose::new(Vec3::new(1.0, 1.5, 0.0), Quat::IDENTITY));
        assert_eq!(set.apply(&frame, &mut targets), 1);

        let head = targets.get("head").unwrap();
        assert!((head.position - Vec3::new(1.0, 1.6, 0.0)).length() < 1e-5);
        let expected = Quat::from_rotation_y(90f32.to_radians());
        assert!(head.rotation.dot(expected).abs() > 1.0 - 1e-5);
        assert_eq!(head.frame_id, Some(7));
    }

    #[test]
    fn test_apply_respects_flags() {
        let mut mapping = TrackerMapping::new(BoneId(0), "hips");
        mapping.apply_position = false;
        let set = MappingSet::new(vec![mapping]);

        let mut targets = TargetTable::new();
        let rotation = Quat::from_rotation_x(0.5);
        set.apply(&frame_with(0, BonePose::new(Vec3::ONE, rotation)), &mut targets);

        let hips = targets.get("hips").unwrap();
        assert_eq!(hips.position, Vec3::ZERO);
        assert!(hips.rotation.dot(rotation).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_apply_skips_absent_bones() {
        let set = MappingSet::new(vec![TrackerMapping::new(BoneId(3), "knee")]);
        let mut targets = TargetTable::new();
        assert_eq!(set.apply(&frame_with(0, BonePose::IDENTITY), &mut targets), 0);
        assert!(targets.is_empty());
    }

    #[test]
    fn test_validate_drops_unnamed_targets() {
        let set = MappingSet::new(vec![
            TrackerMapping::new(BoneId(0), "hips"),
            TrackerMapping::new(BoneId(10), "  "),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.target_for_bone(BoneId(0)), Some("hips"));
        assert_eq!(set.target_for_bone(BoneId(10)), None);
    }

    #[test]
    fn test_add_after_clone_does_not_touch_snapshot() {
        let mut set = MappingSet::new(vec![TrackerMapping::new(BoneId(0), "hips")]);
        let snapshot = set.clone();
        set.add(TrackerMapping::new(BoneId(10), "head"));
        assert_eq!(set.len(), 2);
        assert_eq!(snapshot.len(), 1);
    }
}

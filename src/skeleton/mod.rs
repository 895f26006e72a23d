//! Skeleton data model
//!
//! Bone ids, the parent-indexed skeleton definition, per-bone poses and the
//! frame events produced by the transport or by playback.

pub mod mapping;
pub mod resolver;

pub use mapping::{MappingSet, TargetPose, TargetTable, TrackerMapping};
pub use resolver::{PartialPolicy, PartialResolution, PositionMode, ResolvedFrame, SkeletonResolver};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::SkeletonError;

/// Identifier of a skeletal joint. 0 is the root (hips) by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoneId(pub u16);

impl std::fmt::Display for BoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for BoneId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Position and rotation of a single bone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonePose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for BonePose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BonePose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Convert a pose from the sender's axis convention into the target
    /// engine convention.
    ///
    /// The X axis is mirrored and the quaternion's scalar part is negated.
    /// Both sign flips are required; dropping either one corrupts every
    /// rotation downstream.
    pub fn from_native(position: [f32; 3], rotation: [f32; 4]) -> Self {
        let [px, py, pz] = position;
        let [qx, qy, qz, qw] = rotation;
        Self {
            position: Vec3::new(-px, py, pz),
            rotation: Quat::from_xyzw(-qx, qy, qz, -qw),
        }
    }

    /// Treat `self` as a native-convention pose and convert it
    pub fn to_engine(&self) -> Self {
        Self::from_native(self.position.to_array(), self.rotation.to_array())
    }
}

/// One bone entry in a skeleton definition
#[derive(Debug, Clone, PartialEq)]
pub struct BoneDefinition {
    pub id: BoneId,
    /// `None` for the root bone
    pub parent: Option<BoneId>,
    /// Rest pose in the sender's native convention
    pub rest: BonePose,
}

/// Validated bone tree received once per connection or session.
///
/// Exactly one root, every parent present, no cycles. Immutable once built;
/// a new definition supersedes it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonDefinition {
    bones: Vec<BoneDefinition>,
    root: BoneId,
    /// Parents-first traversal order
    order: Vec<BoneId>,
}

impl SkeletonDefinition {
    /// Build and validate a definition
    pub fn new(bones: Vec<BoneDefinition>) -> Result<Self, SkeletonError> {
        if bones.is_empty() {
            return Err(SkeletonError::Empty);
        }

        let mut seen = HashSet::with_capacity(bones.len());
        let mut root = None;
        for bone in &bones {
            if !seen.insert(bone.id) {
                return Err(SkeletonError::DuplicateBone(bone.id));
            }
            if bone.parent.is_none() {
                if let Some(existing) = root {
                    return Err(SkeletonError::MultipleRoots(existing, bone.id));
                }
                root = Some(bone.id);
            }
        }
        let root = root.ok_or(SkeletonError::NoRoot)?;

        let mut children: HashMap<BoneId, Vec<BoneId>> = HashMap::new();
        for bone in &bones {
            if let Some(parent) = bone.parent {
                if !seen.contains(&parent) {
                    return Err(SkeletonError::MissingParent {
                        bone: bone.id,
                        parent,
                    });
                }
                children.entry(parent).or_default().push(bone.id);
            }
        }

        // Breadth-first from the root; anything unreached sits on a cycle.
        let mut order = Vec::with_capacity(bones.len());
        order.push(root);
        let mut next = 0;
        while next < order.len() {
            if let Some(kids) = children.get(&order[next]) {
                order.extend(kids.iter().copied());
            }
            next += 1;
        }
        if order.len() != bones.len() {
            let reached: HashSet<BoneId> = order.iter().copied().collect();
            let stray = bones
                .iter()
                .find(|b| !reached.contains(&b.id))
                .map(|b| b.id)
                .unwrap_or(root);
            return Err(SkeletonError::Cycle(stray));
        }

        Ok(Self { bones, root, order })
    }

    /// Build a definition from parallel id arrays, as stored in the
    /// initialization snapshot. A negative parent id marks the root.
    /// Rest poses are identity.
    pub fn from_id_arrays(bone_ids: &[i32], parent_ids: &[i32]) -> Result<Self, SkeletonError> {
        if bone_ids.len() != parent_ids.len() {
            return Err(SkeletonError::LengthMismatch {
                bones: bone_ids.len(),
                parents: parent_ids.len(),
            });
        }

        let to_bone = |raw: i32| -> Result<BoneId, SkeletonError> {
            u16::try_from(raw)
                .map(BoneId)
                .map_err(|_| SkeletonError::InvalidBoneId(raw as i64))
        };

        let bones = bone_ids
            .iter()
            .zip(parent_ids)
            .map(|(&id, &parent)| {
                Ok(BoneDefinition {
                    id: to_bone(id)?,
                    parent: if parent < 0 { None } else { Some(to_bone(parent)?) },
                    rest: BonePose::IDENTITY,
                })
            })
            .collect::<Result<Vec<_>, SkeletonError>>()?;

        Self::new(bones)
    }

    pub fn bones(&self) -> &[BoneDefinition] {
        &self.bones
    }

    pub fn root(&self) -> BoneId {
        self.root
    }

    /// Bone ids ordered so that every parent precedes its children
    pub fn order(&self) -> &[BoneId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn parent_of(&self, bone: BoneId) -> Option<BoneId> {
        self.bones.iter().find(|b| b.id == bone).and_then(|b| b.parent)
    }

    /// Bone ids and parent ids (-1 for the root) as parallel arrays
    pub fn id_arrays(&self) -> (Vec<i32>, Vec<i32>) {
        self.bones
            .iter()
            .map(|b| {
                (
                    b.id.0 as i32,
                    b.parent.map(|p| p.0 as i32).unwrap_or(-1),
                )
            })
            .unzip()
    }
}

/// One frame of per-bone local poses, as delivered by the transport or by
/// playback. Poses are in the sender's native convention.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvent {
    /// Monotonic frame counter from the sender
    pub frame_id: u32,
    /// Capture-relative seconds
    pub timestamp: f32,
    /// Absolute epoch time in seconds
    pub unix_time: f64,
    pub poses: BTreeMap<BoneId, BonePose>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(id: u16, parent: Option<u16>) -> BoneDefinition {
        BoneDefinition {
            id: BoneId(id),
            parent: parent.map(BoneId),
            rest: BonePose::IDENTITY,
        }
    }

    #[test]
    fn test_definition_order_is_parents_first() {
        let def = SkeletonDefinition::new(vec![bone(2, Some(1)), bone(0, None), bone(1, Some(0))])
            .unwrap();

        assert_eq!(def.root(), BoneId(0));
        assert_eq!(def.order(), &[BoneId(0), BoneId(1), BoneId(2)]);
        assert_eq!(def.parent_of(BoneId(2)), Some(BoneId(1)));
        assert_eq!(def.parent_of(BoneId(0)), None);
    }

    #[test]
    fn test_definition_rejects_missing_parent() {
        let err = SkeletonDefinition::new(vec![bone(0, None), bone(1, Some(7))]).unwrap_err();
        assert_eq!(
            err,
            SkeletonError::MissingParent {
                bone: BoneId(1),
                parent: BoneId(7)
            }
        );
    }

    #[test]
    fn test_definition_rejects_bad_roots() {
        assert_eq!(
            SkeletonDefinition::new(vec![bone(0, Some(1)), bone(1, Some(0))]).unwrap_err(),
            SkeletonError::NoRoot
        );
        assert_eq!(
            SkeletonDefinition::new(vec![bone(0, None), bone(1, None)]).unwrap_err(),
            SkeletonError::MultipleRoots(BoneId(0), BoneId(1))
        );
    }

    #[test]
    fn test_definition_rejects_cycle() {
        let err = SkeletonDefinition::new(vec![
            bone(0, None),
            bone(1, Some(2)),
            bone(2, Some(1)),
        ])
        .unwrap_err();
        assert!(matches!(err, SkeletonError::Cycle(_)));
    }

    #[test]
    fn test_definition_rejects_duplicates() {
        let err = SkeletonDefinition::new(vec![bone(0, None), bone(0, Some(0))]).unwrap_err();
        assert_eq!(err, SkeletonError::DuplicateBone(BoneId(0)));
    }

    #[test]
    fn test_id_arrays_round_trip() {
        let def = SkeletonDefinition::from_id_arrays(&[0, 1, 2, 3], &[-1, 0, 1, 0]).unwrap();
        let (ids, parents) = def.id_arrays();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(parents, vec![-1, 0, 1, 0]);

        assert!(matches!(
            SkeletonDefinition::from_id_arrays(&[0, 1], &[-1]),
            Err(SkeletonError::LengthMismatch { bones: 2, parents: 1 })
        ));
    }

    #[test]
    fn test_native_conversion_flips_x_and_w() {
        let pose = BonePose::from_native([1.0, 2.0, 3.0], [0.1, 0.2, 0.3, 0.9]);
        assert_eq!(pose.position, Vec3::new(-1.0, 2.0, 3.0));
        assert_eq!(pose.rotation, Quat::from_xyzw(-0.1, 0.2, 0.3, -0.9));
    }
}

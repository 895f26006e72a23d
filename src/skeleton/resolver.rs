//! Skeleton resolver
//!
//! Turns parent-relative bone poses into world-space poses. The resolver owns
//! the parent map and the per-bone local pose cache; it is only ever touched
//! from the tracker's update tick.
//!
//! Each frame runs in two passes:
//! 1. convert every incoming local pose into the engine convention and
//!    overwrite the cache entry for that bone;
//! 2. resolve every bone present in the frame, parents first, under the
//!    configured [`PositionMode`].

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{BoneId, BonePose, FrameEvent, SkeletonDefinition};

/// How local poses become resolved poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// Packets already carry absolute positions
    WorldSpace,
    /// Positions re-centred on the root's movement since the definition
    RootRelative,
    /// Positions composed through the bone hierarchy
    #[default]
    Hierarchical,
}

/// What to do with a bone whose ancestor chain cannot be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Leave the bone's previous resolved pose untouched for this frame
    #[default]
    Skip,
    /// Emit whatever part of the chain could be composed
    BestEffort,
}

/// Non-fatal record of a bone whose ancestor chain was incomplete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialResolution {
    /// Bone being resolved
    pub bone: BoneId,
    /// First bone in the chain with no known parent or pose
    pub missing: BoneId,
}

/// World-space poses for one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedFrame {
    pub frame_id: u32,
    pub timestamp: f32,
    pub unix_time: f64,
    pub bones: BTreeMap<BoneId, BonePose>,
    /// Bones that hit an incomplete chain this frame
    pub partial: Vec<PartialResolution>,
}

/// Resolves frames against the current skeleton definition
#[derive(Debug)]
pub struct SkeletonResolver {
    mode: PositionMode,
    policy: PartialPolicy,
    definition: Option<Arc<SkeletonDefinition>>,
    parents: HashMap<BoneId, Option<BoneId>>,
    /// Engine-convention local poses, latest value per bone
    locals: HashMap<BoneId, BonePose>,
    /// Last resolved pose per bone
    resolved: HashMap<BoneId, BonePose>,
    root_offset: Vec3,
    current_root: Vec3,
}

impl SkeletonResolver {
    pub fn new(mode: PositionMode, policy: PartialPolicy) -> Self {
        Self {
            mode,
            policy,
            definition: None,
            parents: HashMap::new(),
            locals: HashMap::new(),
            resolved: HashMap::new(),
            root_offset: Vec3::ZERO,
            current_root: Vec3::ZERO,
        }
    }

    pub fn mode(&self) -> PositionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PositionMode) {
        self.mode = mode;
    }

    pub fn policy(&self) -> PartialPolicy {
        self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.definition.is_some()
    }

    pub fn definition(&self) -> Option<&Arc<SkeletonDefinition>> {
        self.definition.as_ref()
    }

    /// Root position captured from the definition
    pub fn root_offset(&self) -> Vec3 {
        self.root_offset
    }

    /// Last resolved pose of `bone`
    pub fn resolved_pose(&self, bone: BoneId) -> Option<&BonePose> {
        self.resolved.get(&bone)
    }

    fn root(&self) -> Option<BoneId> {
        self.definition.as_ref().map(|d| d.root())
    }

    /// Rebuild the parent map and seed the cache from the definition's rest
    /// poses. The root's rest position becomes the baseline offset, so the
    /// root resolves to the origin at this instant.
    pub fn on_definition(&mut self, definition: Arc<SkeletonDefinition>) {
        self.parents.clear();
        self.locals.clear();
        self.resolved.clear();

        for bone in definition.bones() {
            self.parents.insert(bone.id, bone.parent);

            let local = bone.rest.to_engine();
            self.locals.insert(bone.id, local);

            if bone.parent.is_none() {
                self.root_offset = local.position;
                self.current_root = local.position;
                self.resolved
                    .insert(bone.id, BonePose::new(Vec3::ZERO, local.rotation));
            }
        }

        tracing::info!(
            "Skeleton initialized with {} bones (root {}, offset {:?})",
            definition.len(),
            definition.root(),
            self.root_offset
        );
        self.definition = Some(definition);
    }

    /// Resolve one frame
    pub fn on_frame(&mut self, frame: &FrameEvent) -> ResolvedFrame {
        let root = self.root();

        // Pass 1: convert everything before touching the cache
        let staged: Vec<(BoneId, BonePose)> = frame
            .poses
            .iter()
            .map(|(&id, pose)| (id, pose.to_engine()))
            .collect();

        for (id, local) in &staged {
            self.locals.insert(*id, *local);
            if Some(*id) == root {
                self.current_root = local.position;
            }
        }

        // Pass 2: parents first, then bones the skeleton does not know about
        let order: Vec<BoneId> = match &self.definition {
            Some(def) => def
                .order()
                .iter()
                .copied()
                .filter(|id| frame.poses.contains_key(id))
                .chain(
                    frame
                        .poses
                        .keys()
                        .copied()
                        .filter(|id| !self.parents.contains_key(id)),
                )
                .collect(),
            None => frame.poses.keys().copied().collect(),
        };

        let mut out = ResolvedFrame {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            unix_time: frame.unix_time,
            bones: BTreeMap::new(),
            partial: Vec::new(),
        };
        let mut memo: HashMap<BoneId, BonePose> = HashMap::with_capacity(order.len());

        for bone in order {
            match self.resolve_bone(bone, root, &frame.poses, &mut memo) {
                Ok(pose) => {
                    self.resolved.insert(bone, pose);
                    out.bones.insert(bone, pose);
                }
                Err((partial, best)) => {
                    tracing::debug!(
                        "Partial resolution for bone {}: chain breaks at {}",
                        partial.bone,
                        partial.missing
                    );
                    out.partial.push(partial);
                    if self.policy == PartialPolicy::BestEffort {
                        self.resolved.insert(bone, best);
                        out.bones.insert(bone, best);
                    }
                }
            }
        }

        out
    }

    fn resolve_bone(
        &self,
        bone: BoneId,
        root: Option<BoneId>,
        present: &BTreeMap<BoneId, BonePose>,
        memo: &mut HashMap<BoneId, BonePose>,
    ) -> Result<BonePose, (PartialResolution, BonePose)> {
        let local = self.locals.get(&bone).copied().unwrap_or_default();

        match self.mode {
            PositionMode::WorldSpace => Ok(local),
            PositionMode::RootRelative => {
                if Some(bone) == root {
                    Ok(BonePose::new(Vec3::ZERO, local.rotation))
                } else {
                    let drift = self.current_root - self.root_offset;
                    Ok(BonePose::new(local.position - drift, local.rotation))
                }
            }
            PositionMode::Hierarchical => self.compose(bone, local, root, present, memo),
        }
    }

    /// Walk up the parent chain applying `pos = parent_rot * pos + parent_pos`
    /// and `rot = parent_rot * rot`.
    ///
    /// Rotations are composed too, so the emitted and recorded rotation of a
    /// bone is its world rotation, not the local rotation from the packet.
    ///
    /// Only ancestors present in this frame take part; the root alone may
    /// fall back to its cached pose. `memo` holds completed world poses
    /// (before the root offset is removed) for bones already resolved this
    /// frame; hitting one ends the walk.
    fn compose(
        &self,
        bone: BoneId,
        local: BonePose,
        root: Option<BoneId>,
        present: &BTreeMap<BoneId, BonePose>,
        memo: &mut HashMap<BoneId, BonePose>,
    ) -> Result<BonePose, (PartialResolution, BonePose)> {
        let mut position = local.position;
        let mut rotation = local.rotation;
        let mut current = bone;

        loop {
            let parent = match self.parents.get(&current) {
                Some(Some(parent)) => *parent,
                Some(None) => break,
                None => {
                    return Err((
                        PartialResolution {
                            bone,
                            missing: current,
                        },
                        BonePose::new(position, rotation),
                    ))
                }
            };

            let (parent_position, parent_rotation, done) = match memo.get(&parent) {
                Some(world) => (world.position, world.rotation, true),
                None => match self.locals.get(&parent) {
                    Some(pose) if present.contains_key(&parent) || Some(parent) == root => {
                        (pose.position, pose.rotation, false)
                    }
                    _ => {
                        return Err((
                            PartialResolution {
                                bone,
                                missing: parent,
                            },
                            BonePose::new(position, rotation),
                        ))
                    }
                },
            };

            position = parent_rotation * position + parent_position;
            rotation = normalize(parent_rotation * rotation);

            if done {
                break;
            }
            current = parent;
        }

        memo.insert(bone, BonePose::new(position, rotation));
        Ok(BonePose::new(position - self.root_offset, rotation))
    }
}

fn normalize(q: Quat) -> Quat {
    let len = q.length();
    if len > f32::EPSILON {
        q / len
    } else {
        Quat::IDENTITY
    }
}

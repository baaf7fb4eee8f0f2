//! Host skeleton capability trait
//!
//! The solver never depends on a concrete runtime. Whatever owns the real
//! skeleton implements [`SkeletonHost`]: bone topology, per-bone local
//! poses, a transient pose-override channel for the solver's output, the
//! skeleton's own world transform, and a scene lookup resolving a named
//! path to a world transform.

use crate::transform::Pose;
use marionette_core::BoneId;

/// Capabilities the solver requires from its host.
pub trait SkeletonHost {
    /// Number of bones in the host skeleton
    fn bone_count(&self) -> usize;

    /// Resolve a bone name to its identifier
    fn find_bone(&self, name: &str) -> Option<BoneId>;

    /// Name of a bone, if it exists
    fn bone_name(&self, bone: BoneId) -> Option<String>;

    /// Parent of a bone; `None` for roots and unknown bones
    fn bone_parent(&self, bone: BoneId) -> Option<BoneId>;

    /// Children of a bone, in the host's order
    fn bone_children(&self, bone: BoneId) -> Vec<BoneId>;

    /// The bone's base local pose (without transient overrides)
    fn bone_local_pose(&self, bone: BoneId) -> Option<Pose>;

    /// Replace the bone's base local pose
    fn set_bone_local_pose(&mut self, bone: BoneId, pose: Pose);

    /// Install a transient local-pose override, blended over the base pose
    /// by `amount` in `[0, 1]`
    fn set_bone_pose_override(&mut self, bone: BoneId, pose: Pose, amount: f32);

    /// Remove any transient override from the bone
    fn clear_bone_pose_override(&mut self, bone: BoneId);

    /// The skeleton's own world transform
    fn global_transform(&self) -> Pose;

    /// World transform of a named scene node, if the path resolves
    fn node_world_transform(&self, path: &str) -> Option<Pose>;
}

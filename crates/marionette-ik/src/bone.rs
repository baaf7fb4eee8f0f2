//! Shadow bones
//!
//! A shadow bone mirrors one host bone for the duration of a solve: local
//! pose, cached global pose, optional pin, optional joint constraint, and
//! the per-bone solver state (dampening and the mean-squared-deviation gate).

use crate::constraint::BoneConstraint;
use crate::effector::IkEffector;
use crate::host::SkeletonHost;
use crate::transform::{IkTransform, Pose};
use marionette_core::BoneId;

/// Default per-bone dampening angle, radians (about 12 degrees).
/// Root bones are unclamped and use PI instead.
pub const DEFAULT_DAMPENING: f32 = 0.20944;

/// A node in the shadow skeleton.
#[derive(Debug)]
pub struct IkBone {
    bone_id: BoneId,
    parent: Option<BoneId>,
    children: Vec<BoneId>,
    transform: IkTransform,
    effector: Option<IkEffector>,
    constraint: Option<BoneConstraint>,
    dampening: f32,
    cos_half_dampen: f32,
    last_msd: f64,
    orientation_lock: bool,
}

impl IkBone {
    /// Create a shadow bone. Parentless bones are unclamped (dampening PI).
    #[must_use]
    pub fn new(bone_id: BoneId, parent: Option<BoneId>, dampening: f32) -> Self {
        let dampening = if parent.is_none() {
            std::f32::consts::PI
        } else {
            dampening
        };
        Self {
            bone_id,
            parent,
            children: Vec::new(),
            transform: IkTransform::default(),
            effector: None,
            constraint: None,
            dampening,
            cos_half_dampen: (dampening / 2.0).cos(),
            last_msd: f64::INFINITY,
            orientation_lock: false,
        }
    }

    /// Host identifier of this bone
    #[must_use]
    pub const fn bone_id(&self) -> BoneId {
        self.bone_id
    }

    /// Parent bone, if any
    #[must_use]
    pub const fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    /// Child bones
    #[must_use]
    pub fn children(&self) -> &[BoneId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: BoneId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    /// The bone's local/global transform pair
    #[must_use]
    pub const fn transform(&self) -> &IkTransform {
        &self.transform
    }

    /// Mutable access to the transform pair
    pub fn transform_mut(&mut self) -> &mut IkTransform {
        &mut self.transform
    }

    /// Whether an effector is pinned to this bone
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.effector.is_some()
    }

    /// The pinned effector, if any
    #[must_use]
    pub const fn effector(&self) -> Option<&IkEffector> {
        self.effector.as_ref()
    }

    /// Mutable access to the pinned effector
    pub fn effector_mut(&mut self) -> Option<&mut IkEffector> {
        self.effector.as_mut()
    }

    /// Pin a freshly constructed effector to this bone
    pub fn create_effector(&mut self) -> &mut IkEffector {
        self.effector.get_or_insert_with(IkEffector::new)
    }

    /// Replace the pinned effector
    pub fn set_effector(&mut self, effector: Option<IkEffector>) {
        self.effector = effector;
    }

    /// The attached joint constraint, if any
    #[must_use]
    pub const fn constraint(&self) -> Option<&BoneConstraint> {
        self.constraint.as_ref()
    }

    /// Attach or remove a joint constraint
    pub fn set_constraint(&mut self, constraint: Option<BoneConstraint>) {
        self.constraint = constraint;
    }

    /// Per-iteration rotation budget, radians
    #[must_use]
    pub const fn dampening(&self) -> f32 {
        self.dampening
    }

    /// Cached cosine of half the dampening angle
    #[must_use]
    pub const fn cos_half_dampen(&self) -> f32 {
        self.cos_half_dampen
    }

    /// Set the dampening angle, refreshing the cached half-angle cosine
    pub fn set_dampening(&mut self, dampening: f32) {
        self.dampening = dampening;
        self.cos_half_dampen = (dampening / 2.0).cos();
    }

    /// Mean squared deviation recorded by the last accepted solver pass
    #[must_use]
    pub const fn last_msd(&self) -> f64 {
        self.last_msd
    }

    /// Record the deviation measured before the pass that was just applied
    pub fn set_last_msd(&mut self, msd: f64) {
        self.last_msd = msd;
    }

    /// Reopen the monotonicity gate
    pub fn reset_last_msd(&mut self) {
        self.last_msd = f64::INFINITY;
    }

    /// Whether the per-segment pass skips this bone
    #[must_use]
    pub const fn is_orientation_locked(&self) -> bool {
        self.orientation_lock
    }

    /// Lock or unlock this bone against solver rotation
    pub fn set_orientation_lock(&mut self, locked: bool) {
        self.orientation_lock = locked;
    }

    /// Copy the host's current local pose into the shadow transform and
    /// reopen the monotonicity gate. Called once per solve, before iteration.
    pub fn set_initial_pose(&mut self, pose: Pose) {
        self.transform.set_local(pose);
        self.last_msd = f64::INFINITY;
    }

    /// Hand the solved local pose to the host's transient override channel,
    /// which blends it over the base pose by `strength`.
    pub fn set_skeleton_bone_pose<H: SkeletonHost>(&self, host: &mut H, strength: f32) {
        host.set_bone_pose_override(self.bone_id, self.transform.local(), strength);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_bone_is_unclamped() {
        let root = IkBone::new(BoneId::from_raw(0), None, DEFAULT_DAMPENING);
        assert!((root.dampening() - std::f32::consts::PI).abs() < 1e-6);

        let child = IkBone::new(BoneId::from_raw(1), Some(BoneId::from_raw(0)), DEFAULT_DAMPENING);
        assert!((child.dampening() - DEFAULT_DAMPENING).abs() < 1e-6);
    }

    #[test]
    fn cos_half_dampen_tracks_dampening() {
        let mut bone = IkBone::new(BoneId::from_raw(1), Some(BoneId::from_raw(0)), 0.5);
        assert!((bone.cos_half_dampen() - 0.25f32.cos()).abs() < 1e-6);
        bone.set_dampening(1.0);
        assert!((bone.cos_half_dampen() - 0.5f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn initial_pose_reopens_gate() {
        let mut bone = IkBone::new(BoneId::from_raw(1), Some(BoneId::from_raw(0)), 0.5);
        bone.set_last_msd(0.25);
        bone.set_initial_pose(Pose::IDENTITY);
        assert!(bone.last_msd().is_infinite());
    }
}

//! Rigid transforms and the local/global bone transform pair

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A rigid transform: rotation followed by translation, no scale.
///
/// Bones are rigid, so the solver never carries scale or shear; hosts that
/// scale their skeletons apply it outside the solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation component
    pub rotation: Quat,
    /// Translation component
    pub origin: Vec3,
}

impl Pose {
    /// The identity transform
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        origin: Vec3::ZERO,
    };

    /// Create a pose from rotation and origin
    #[must_use]
    pub const fn new(rotation: Quat, origin: Vec3) -> Self {
        Self { rotation, origin }
    }

    /// A pure translation
    #[must_use]
    pub const fn from_origin(origin: Vec3) -> Self {
        Self {
            rotation: Quat::IDENTITY,
            origin,
        }
    }

    /// A pure rotation
    #[must_use]
    pub const fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            origin: Vec3::ZERO,
        }
    }

    /// Transform a point
    #[must_use]
    pub fn xform(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.origin
    }

    /// Inverse-transform a point
    #[must_use]
    pub fn xform_inv(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.origin)
    }

    /// The inverse transform
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv = self.rotation.inverse();
        Self {
            rotation: inv,
            origin: -(inv * self.origin),
        }
    }

    /// Renormalize the rotation component
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            rotation: self.rotation.normalize(),
            origin: self.origin,
        }
    }

    /// Whether both components contain only finite values
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.origin.is_finite()
    }

    /// Component-wise approximate equality
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.origin - other.origin).abs().max_element() <= epsilon
            && self.rotation.abs_diff_eq(other.rotation, epsilon)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::ops::Mul for Pose {
    type Output = Self;

    /// Composition: `self * rhs` applies `rhs` first, then `self`.
    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            origin: self.xform(rhs.origin),
        }
    }
}

/// A bone's local pose paired with its cached global pose.
///
/// The global cache is owned by the shadow skeleton's traversal: parents are
/// always refreshed before children read them, and every solver write is
/// followed by a subtree refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct IkTransform {
    local: Pose,
    global: Pose,
}

impl IkTransform {
    /// Create from a local pose; the global cache starts equal to it
    #[must_use]
    pub const fn from_local(local: Pose) -> Self {
        Self {
            local,
            global: local,
        }
    }

    /// The local pose
    #[must_use]
    pub const fn local(&self) -> Pose {
        self.local
    }

    /// The cached global pose
    #[must_use]
    pub const fn global(&self) -> Pose {
        self.global
    }

    /// Replace the local pose; the global cache is stale until the owner
    /// refreshes it
    pub fn set_local(&mut self, pose: Pose) {
        self.local = pose;
    }

    /// Recompute the global cache from the parent's global pose
    pub fn update_global(&mut self, parent_global: Option<&Pose>) {
        self.global = match parent_global {
            Some(parent) => *parent * self.local,
            None => self.local,
        };
    }

    /// Set the global pose and re-derive the local pose from the parent
    pub fn set_global(&mut self, global: Pose, parent_global: Option<&Pose>) {
        self.global = global;
        self.local = match parent_global {
            Some(parent) => parent.inverse() * global,
            None => global,
        };
    }

    /// Apply a global-space rotation to the local pose.
    ///
    /// Conjugates `rotation` through the parent's global rotation into the
    /// local frame and composes it onto the local rotation; the bone pivots
    /// about its own origin. The caller refreshes the global cache.
    pub fn rotate_local_with_global(&mut self, rotation: Quat, parent_global: Option<&Pose>) {
        let local_rotation = match parent_global {
            Some(parent) => parent.rotation.inverse() * rotation * parent.rotation,
            None => rotation,
        };
        self.local.rotation = (local_rotation * self.local.rotation).normalize();
    }

    /// Move the global origin by `delta`, re-deriving the local pose
    pub fn translate_global(&mut self, delta: Vec3, parent_global: Option<&Pose>) {
        let moved = Pose::new(self.global.rotation, self.global.origin + delta);
        self.set_global(moved, parent_global);
    }

    /// Transform a point by the cached global pose
    #[must_use]
    pub fn to_global(&self, point: Vec3) -> Vec3 {
        self.global.xform(point)
    }

    /// Inverse-transform a point by the cached global pose
    #[must_use]
    pub fn to_local(&self, point: Vec3) -> Vec3 {
        self.global.xform_inv(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn compose_then_invert_is_identity() {
        let pose = Pose::new(
            Quat::from_rotation_z(0.7),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let round_trip = pose * pose.inverse();
        assert!(round_trip.approx_eq(&Pose::IDENTITY, 1e-6));
    }

    #[test]
    fn xform_matches_composition() {
        let a = Pose::new(Quat::from_rotation_y(0.3), Vec3::new(0.0, 1.0, 0.0));
        let b = Pose::new(Quat::from_rotation_x(1.1), Vec3::new(2.0, 0.0, 0.0));
        let p = Vec3::new(0.5, -0.5, 2.0);
        let composed = (a * b).xform(p);
        let sequential = a.xform(b.xform(p));
        assert!((composed - sequential).length() < 1e-5);
    }

    #[test]
    fn global_follows_parent_chain() {
        let parent = Pose::new(Quat::from_rotation_z(FRAC_PI_2), Vec3::new(1.0, 0.0, 0.0));
        let mut xform = IkTransform::from_local(Pose::from_origin(Vec3::X));
        xform.update_global(Some(&parent));
        // Parent rotates +x into +y.
        assert!((xform.global().origin - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn set_global_round_trips_local() {
        let parent = Pose::new(Quat::from_rotation_y(0.4), Vec3::new(0.0, 2.0, 0.0));
        let target = Pose::new(Quat::from_rotation_x(0.9), Vec3::new(1.0, 1.0, 1.0));
        let mut xform = IkTransform::default();
        xform.set_global(target, Some(&parent));
        xform.update_global(Some(&parent));
        assert!(xform.global().approx_eq(&target, 1e-5));
    }

    #[test]
    fn global_rotation_pivots_about_own_origin() {
        let parent = Pose::new(Quat::from_rotation_z(0.8), Vec3::new(0.5, 0.0, 0.0));
        let mut xform = IkTransform::from_local(Pose::from_origin(Vec3::X));
        xform.update_global(Some(&parent));
        let origin_before = xform.global().origin;
        let global_rot_before = xform.global().rotation;

        let q = Quat::from_rotation_y(0.25);
        xform.rotate_local_with_global(q, Some(&parent));
        xform.update_global(Some(&parent));

        assert!((xform.global().origin - origin_before).length() < 1e-5);
        let expected = q * global_rot_before;
        assert!(xform.global().rotation.abs_diff_eq(expected, 1e-5));
    }
}

//! Joint-limit constraint hooks
//!
//! Limit geometries (cones, twist ranges) live outside the solver core; the
//! core only asks a constraint whether it restricts orientation and/or
//! twist, and invokes the matching snap after every per-bone fit.

use crate::transform::Pose;
use std::rc::Rc;

/// Capability interface the solver expects from a joint limit.
///
/// The snap methods receive the bone's *global* pose and adjust it in
/// place; the solver re-derives the local pose and refreshes the subtree
/// afterwards. `dampening` is the rotation budget the current pass solved
/// under (radians); `cos_half_dampen` is the bone's cached cosine of half
/// its own dampening angle.
pub trait ConstraintHook {
    /// Whether the constraint restricts the bone's orientation
    fn is_orientationally_constrained(&self) -> bool;

    /// Whether the constraint restricts rotation about the bone's twist axis
    fn is_axially_constrained(&self) -> bool;

    /// Pull the bone's global pose back inside the orientation limits
    fn snap_to_orientation(
        &self,
        bone_global: &mut Pose,
        constraint_frame: &Pose,
        dampening: f32,
        cos_half_dampen: f32,
    );

    /// Pull the bone's global pose back inside the twist limits
    fn snap_to_twist(
        &self,
        bone_global: &mut Pose,
        constraint_frame: &Pose,
        dampening: f32,
        cos_half_dampen: f32,
    );
}

/// A constraint attached to a bone: the hook plus the frame the limits are
/// expressed in (parent-local space).
#[derive(Clone)]
pub struct BoneConstraint {
    /// The limit implementation
    pub hook: Rc<dyn ConstraintHook>,
    /// Frame the limits are expressed in
    pub frame: Pose,
}

impl BoneConstraint {
    /// Attach a hook with its limit frame
    #[must_use]
    pub fn new(hook: Rc<dyn ConstraintHook>, frame: Pose) -> Self {
        Self { hook, frame }
    }
}

impl std::fmt::Debug for BoneConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoneConstraint")
            .field("frame", &self.frame)
            .field(
                "orientational",
                &self.hook.is_orientationally_constrained(),
            )
            .field("axial", &self.hook.is_axially_constrained())
            .finish()
    }
}

//! Pins and their heading clouds
//!
//! An effector pins a bone to a target. Each solve it resolves a *goal
//! transform* in the skeleton's local space, and during iteration it emits a
//! block of headings: one origin offset plus an antipodal pair of
//! origin-centred unit axis directions per followed axis. The axis pairs
//! make the QCP fit orientation-aware without disturbing the weighted
//! centroid; the unpaired origin slot is what lets the root segment
//! translate.

use crate::host::SkeletonHost;
use crate::transform::Pose;
use glam::{DVec3, Vec3};

/// Epsilon for the steady-state target-node comparison
const NODE_XFORM_EPSILON: f32 = 1e-6;

/// Default priority: follow the x and z axes, ignore twist about y
pub const DEFAULT_PRIORITY: Vec3 = Vec3::new(1.0, 0.0, 1.0);

/// A pin binding a bone to a target transform.
#[derive(Debug, Clone)]
pub struct IkEffector {
    target_node: Option<String>,
    target_transform: Pose,
    use_target_node_rotation: bool,
    priority: Vec3,
    weight: f32,
    depth_falloff: f32,
    goal_transform: Pose,
    prev_node_xform: Option<Pose>,
    follow_x: bool,
    follow_y: bool,
    follow_z: bool,
}

impl Default for IkEffector {
    fn default() -> Self {
        Self::new()
    }
}

impl IkEffector {
    /// Create an effector with default tuning
    #[must_use]
    pub fn new() -> Self {
        let mut effector = Self {
            target_node: None,
            target_transform: Pose::IDENTITY,
            use_target_node_rotation: false,
            priority: DEFAULT_PRIORITY,
            weight: 1.0,
            depth_falloff: 1.0,
            goal_transform: Pose::IDENTITY,
            prev_node_xform: None,
            follow_x: false,
            follow_y: false,
            follow_z: false,
        };
        effector.update_priorities();
        effector
    }

    /// Path of the scene node sourcing the target, if any
    #[must_use]
    pub fn target_node(&self) -> Option<&str> {
        self.target_node.as_deref()
    }

    /// Point the effector at a scene node (or back at its local transform)
    pub fn set_target_node(&mut self, path: Option<String>) {
        self.target_node = path;
        self.prev_node_xform = None;
    }

    /// The local target transform composed onto the resolved goal
    #[must_use]
    pub const fn target_transform(&self) -> Pose {
        self.target_transform
    }

    /// Set the local target transform
    pub fn set_target_transform(&mut self, transform: Pose) {
        self.target_transform = transform;
    }

    /// Whether the target node's rotation is followed
    #[must_use]
    pub const fn use_target_node_rotation(&self) -> bool {
        self.use_target_node_rotation
    }

    /// Follow or ignore the target node's rotation
    pub fn set_use_target_node_rotation(&mut self, use_rotation: bool) {
        self.use_target_node_rotation = use_rotation;
    }

    /// Per-axis priority; a zero component drops that axis from the fit
    #[must_use]
    pub const fn priority(&self) -> Vec3 {
        self.priority
    }

    /// Set the per-axis priority and refresh the followed-axis flags
    pub fn set_priority(&mut self, priority: Vec3) {
        self.priority = priority;
        self.update_priorities();
    }

    /// The effector's overall weight
    #[must_use]
    pub const fn weight(&self) -> f32 {
        self.weight
    }

    /// Set the effector's overall weight
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    /// Attenuation applied to descendant pins seen from this pin's segment
    #[must_use]
    pub const fn depth_falloff(&self) -> f32 {
        self.depth_falloff
    }

    /// Set the depth falloff
    pub fn set_depth_falloff(&mut self, falloff: f32) {
        self.depth_falloff = falloff;
    }

    /// The goal transform resolved by the current solve
    #[must_use]
    pub const fn goal_transform(&self) -> Pose {
        self.goal_transform
    }

    /// True when no axis is followed and only position is solved for
    #[must_use]
    pub const fn is_translation_only(&self) -> bool {
        !(self.follow_x || self.follow_y || self.follow_z)
    }

    /// Headings this effector contributes per cloud: the origin offset plus
    /// an antipodal pair per followed axis
    #[must_use]
    pub fn num_headings(&self) -> usize {
        1 + 2 * self.followed_axis_count()
    }

    fn followed_axis_count(&self) -> usize {
        usize::from(self.follow_x) + usize::from(self.follow_y) + usize::from(self.follow_z)
    }

    fn update_priorities(&mut self) {
        self.follow_x = self.priority.x > 0.0;
        self.follow_y = self.priority.y > 0.0;
        self.follow_z = self.priority.z > 0.0;
    }

    /// Resolve the goal transform in the skeleton's local space.
    ///
    /// With a resolvable target node, the goal tracks the node (rotation
    /// included only when configured); otherwise it falls back to the tip
    /// bone's current global pose. The local target transform composes on
    /// top in both cases. `tip_global` is the pinned bone's global pose at
    /// solve start.
    pub fn update_goal_transform<H: SkeletonHost>(&mut self, host: &H, tip_global: Pose) {
        let node_xform = self
            .target_node
            .as_deref()
            .and_then(|path| host.node_world_transform(path));
        match node_xform {
            Some(node) => {
                let skeleton_inv = host.global_transform().inverse();
                let base = if self.use_target_node_rotation {
                    skeleton_inv * node
                } else {
                    Pose::from_origin(skeleton_inv.xform(node.origin))
                };
                self.goal_transform = self.target_transform * base;
                self.prev_node_xform = Some(node);
            }
            None => {
                self.goal_transform = tip_global * self.target_transform;
                self.prev_node_xform = None;
            }
        }
    }

    /// Whether the target node's world transform moved since the last solve.
    ///
    /// Uses an epsilon comparison so steady-state ticks are not recomputed
    /// over floating-point noise.
    #[must_use]
    pub fn is_node_xform_changed<H: SkeletonHost>(&self, host: &H) -> bool {
        let Some(path) = self.target_node.as_deref() else {
            return false;
        };
        match (host.node_world_transform(path), self.prev_node_xform) {
            (Some(node), Some(prev)) => !node.approx_eq(&prev, NODE_XFORM_EPSILON),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Append this effector's weight block: the origin slot at `falloff *
    /// weight`, then a pair of `falloff * weight * priority` slots per
    /// followed axis.
    pub fn push_heading_weights(&self, falloff: f64, weights: &mut Vec<f64>) {
        let base = falloff * f64::from(self.weight);
        weights.push(base);
        for (followed, priority) in [
            (self.follow_x, self.priority.x),
            (self.follow_y, self.priority.y),
            (self.follow_z, self.priority.z),
        ] {
            if followed {
                let w = base * f64::from(priority);
                weights.push(w);
                weights.push(w);
            }
        }
    }

    /// Write this effector's target headings for a solve of `for_bone`.
    pub fn write_target_headings(&self, out: &mut [DVec3], index: &mut usize, for_bone_origin: DVec3) {
        let goal = &self.goal_transform;
        out[*index] = goal.origin.as_dvec3() - for_bone_origin;
        *index += 1;
        for (followed, axis) in [
            (self.follow_x, Vec3::X),
            (self.follow_y, Vec3::Y),
            (self.follow_z, Vec3::Z),
        ] {
            if followed {
                let heading = (goal.rotation * axis).as_dvec3();
                out[*index] = heading;
                out[*index + 1] = -heading;
                *index += 2;
            }
        }
    }

    /// Write this effector's tip headings, mirroring the target layout but
    /// sourced from the pinned bone's actual global pose.
    pub fn write_tip_headings(
        &self,
        out: &mut [DVec3],
        index: &mut usize,
        for_bone_origin: DVec3,
        tip_global: &Pose,
    ) {
        out[*index] = tip_global.origin.as_dvec3() - for_bone_origin;
        *index += 1;
        for (followed, axis) in [
            (self.follow_x, Vec3::X),
            (self.follow_y, Vec3::Y),
            (self.follow_z, Vec3::Z),
        ] {
            if followed {
                let heading = (tip_global.rotation * axis).as_dvec3();
                out[*index] = heading;
                out[*index + 1] = -heading;
                *index += 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureSkeleton;
    use glam::Quat;

    #[test]
    fn default_effector_follows_x_and_z() {
        let effector = IkEffector::new();
        assert!(!effector.is_translation_only());
        assert_eq!(effector.num_headings(), 5);
    }

    #[test]
    fn zero_priority_is_translation_only() {
        let mut effector = IkEffector::new();
        effector.set_priority(Vec3::ZERO);
        assert!(effector.is_translation_only());
        assert_eq!(effector.num_headings(), 1);
    }

    #[test]
    fn goal_falls_back_to_tip_pose() {
        let host = FixtureSkeleton::new();
        let mut effector = IkEffector::new();
        effector.set_target_transform(Pose::from_origin(Vec3::new(0.0, 0.5, 0.0)));
        let tip = Pose::new(Quat::IDENTITY, Vec3::new(2.0, 0.0, 0.0));

        effector.update_goal_transform(&host, tip);
        let goal = effector.goal_transform();
        assert!((goal.origin - Vec3::new(2.0, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn goal_tracks_node_position_only() {
        let mut host = FixtureSkeleton::new();
        host.set_node(
            "target",
            Pose::new(Quat::from_rotation_z(1.0), Vec3::new(1.0, 2.0, 3.0)),
        );
        let mut effector = IkEffector::new();
        effector.set_target_node(Some("target".to_string()));

        effector.update_goal_transform(&host, Pose::IDENTITY);
        let goal = effector.goal_transform();
        assert!((goal.origin - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
        // Node rotation ignored unless opted in.
        assert!(goal.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));

        effector.set_use_target_node_rotation(true);
        effector.update_goal_transform(&host, Pose::IDENTITY);
        assert!(effector
            .goal_transform()
            .rotation
            .abs_diff_eq(Quat::from_rotation_z(1.0), 1e-6));
    }

    #[test]
    fn node_change_detection_uses_epsilon() {
        let mut host = FixtureSkeleton::new();
        host.set_node("target", Pose::from_origin(Vec3::X));
        let mut effector = IkEffector::new();
        effector.set_target_node(Some("target".to_string()));
        effector.update_goal_transform(&host, Pose::IDENTITY);
        assert!(!effector.is_node_xform_changed(&host));

        // Sub-epsilon jitter is steady state.
        host.set_node("target", Pose::from_origin(Vec3::new(1.0 + 1e-8, 0.0, 0.0)));
        assert!(!effector.is_node_xform_changed(&host));

        host.set_node("target", Pose::from_origin(Vec3::new(1.5, 0.0, 0.0)));
        assert!(effector.is_node_xform_changed(&host));
    }

    #[test]
    fn heading_block_layout() {
        let mut effector = IkEffector::new();
        effector.set_priority(Vec3::new(1.0, 1.0, 0.0));
        effector.set_weight(2.0);

        let mut weights = Vec::new();
        effector.push_heading_weights(0.5, &mut weights);
        assert_eq!(weights, vec![1.0, 1.0, 1.0, 1.0, 1.0]);

        let mut headings = vec![DVec3::ZERO; effector.num_headings()];
        let mut index = 0;
        effector.write_target_headings(&mut headings, &mut index, DVec3::ZERO);
        assert_eq!(index, 5);
        // Axis pairs are antipodal.
        assert!((headings[1] + headings[2]).length() < 1e-9);
        assert!((headings[3] + headings[4]).length() < 1e-9);
    }
}

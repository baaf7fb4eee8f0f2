//! Pin-terminated bone segments and the per-bone QCP pass
//!
//! The shadow skeleton is partitioned into maximal chains ending at pinned
//! or branching bones. Each segment carries the effectors visible from its
//! subtree (attenuated by depth falloff), a weight vector, and a pair of
//! heading buffers sized once at rebuild so steady-state ticks allocate
//! nothing. Segments form a flat arena owned by the modifier; parent links
//! are indices, never owning pointers.

use crate::bone::IkBone;
use crate::qcp::QcpSolver;
use crate::skeleton::ShadowSkeleton;
use glam::{DQuat, DVec3};
use marionette_core::BoneId;
use std::collections::HashSet;
use std::f32::consts::PI;

/// One entry in a segment's effector list: the pinned bone and the
/// accumulated depth-falloff factor it is seen through.
#[derive(Debug, Clone, Copy)]
struct SegmentEffector {
    bone: BoneId,
    falloff: f64,
}

/// A maximal pin-terminated chain of shadow bones.
#[derive(Debug)]
pub struct BoneSegment {
    root: BoneId,
    tip: BoneId,
    parent: Option<usize>,
    children: Vec<usize>,
    effector_direct_descendants: Vec<usize>,
    /// Chain bones, tip first, root last
    bones: Vec<BoneId>,
    effectors: Vec<SegmentEffector>,
    heading_weights: Vec<f64>,
    target_headings: Vec<DVec3>,
    tip_headings: Vec<DVec3>,
    pinned_descendants: bool,
    qcp: QcpSolver,
}

impl BoneSegment {
    fn new(root: BoneId, tip: BoneId, parent: Option<usize>, bones: Vec<BoneId>) -> Self {
        Self {
            root,
            tip,
            parent,
            children: Vec::new(),
            effector_direct_descendants: Vec::new(),
            bones,
            effectors: Vec::new(),
            heading_weights: Vec::new(),
            target_headings: Vec::new(),
            tip_headings: Vec::new(),
            pinned_descendants: false,
            qcp: QcpSolver::default(),
        }
    }

    /// First bone of the chain (closest to the skeleton root)
    #[must_use]
    pub const fn root(&self) -> BoneId {
        self.root
    }

    /// Last bone of the chain (pinned or branching)
    #[must_use]
    pub const fn tip(&self) -> BoneId {
        self.tip
    }

    /// Parent segment index in the arena, `None` for the root segment
    #[must_use]
    pub const fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Child segment indices
    #[must_use]
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Chain bones, tip to root inclusive
    #[must_use]
    pub fn bones(&self) -> &[BoneId] {
        &self.bones
    }

    /// Whether this segment or any descendant segment ends at a pin
    #[must_use]
    pub const fn has_pinned_descendants(&self) -> bool {
        self.pinned_descendants
    }

    /// Whether this segment's tip bone is pinned
    #[must_use]
    pub fn is_pinned(&self, shadow: &ShadowSkeleton) -> bool {
        shadow.bone(self.tip).is_some_and(IkBone::is_pinned)
    }

    fn update_target_headings(&mut self, shadow: &ShadowSkeleton, for_bone: BoneId) {
        let Some(bone) = shadow.bone(for_bone) else {
            return;
        };
        let origin = bone.transform().global().origin.as_dvec3();
        let mut index = 0;
        for entry in &self.effectors {
            let Some(effector) = shadow.bone(entry.bone).and_then(IkBone::effector) else {
                continue;
            };
            effector.write_target_headings(&mut self.target_headings, &mut index, origin);
        }
    }

    fn update_tip_headings(&mut self, shadow: &ShadowSkeleton, for_bone: BoneId) {
        let Some(bone) = shadow.bone(for_bone) else {
            return;
        };
        let origin = bone.transform().global().origin.as_dvec3();
        let mut index = 0;
        for entry in &self.effectors {
            let Some(pinned) = shadow.bone(entry.bone) else {
                continue;
            };
            let Some(effector) = pinned.effector() else {
                continue;
            };
            let tip_global = pinned.transform().global();
            effector.write_tip_headings(&mut self.tip_headings, &mut index, origin, &tip_global);
        }
    }

    /// One solve step for `for_bone`: refresh both heading clouds, apply the
    /// monotonicity gate, then fit, clamp, apply, and snap constraints.
    pub fn update_optimal_rotation(
        &mut self,
        shadow: &mut ShadowSkeleton,
        for_bone: BoneId,
        damp: Option<f32>,
        translate: bool,
        stabilization_passes: u32,
    ) {
        self.update_target_headings(shadow, for_bone);
        self.update_tip_headings(shadow, for_bone);
        let msd = weighted_msd(&self.tip_headings, &self.target_headings, &self.heading_weights);

        let (finite, last_msd) = match shadow.bone(for_bone) {
            Some(bone) => (
                msd.is_finite() && bone.transform().global().is_finite(),
                bone.last_msd(),
            ),
            None => return,
        };
        if !finite {
            // Non-finite host data: skip this bone for the tick and reopen
            // its gate so a recovered pose solves again.
            if let Some(bone) = shadow.bone_mut(for_bone) {
                bone.reset_last_msd();
            }
            return;
        }
        if msd > last_msd {
            return;
        }

        self.apply_optimal_rotation(shadow, for_bone, damp, translate);
        for _ in 0..stabilization_passes {
            self.update_tip_headings(shadow, for_bone);
            let settled =
                weighted_msd(&self.tip_headings, &self.target_headings, &self.heading_weights);
            if settled <= msd {
                break;
            }
            self.apply_optimal_rotation(shadow, for_bone, damp, translate);
        }

        if let Some(bone) = shadow.bone_mut(for_bone) {
            bone.set_last_msd(msd);
        }
    }

    fn apply_optimal_rotation(
        &mut self,
        shadow: &mut ShadowSkeleton,
        for_bone: BoneId,
        damp: Option<f32>,
        translate: bool,
    ) {
        let (rotation, translation) = self.qcp.weighted_superpose(
            &self.tip_headings,
            &self.target_headings,
            &self.heading_weights,
            translate,
        );

        let Some(bone) = shadow.bone(for_bone) else {
            return;
        };
        let dampening = damp.unwrap_or_else(|| bone.dampening());
        let cos_half_dampen = bone.cos_half_dampen();
        let clamped = match damp {
            Some(angle) => clamp_to_angle(rotation, f64::from(angle)),
            None => clamp_to_quadrance_angle(rotation, f64::from(cos_half_dampen)),
        };

        shadow.rotate_bone_local_with_global(for_bone, clamped.as_quat());
        if translate {
            shadow.translate_bone_global(for_bone, translation.as_vec3());
        }

        let constraint = shadow.bone(for_bone).and_then(|b| b.constraint().cloned());
        if let Some(constraint) = constraint {
            if constraint.hook.is_orientationally_constrained() {
                let Some(bone) = shadow.bone(for_bone) else {
                    return;
                };
                let mut global = bone.transform().global();
                constraint.hook.snap_to_orientation(
                    &mut global,
                    &constraint.frame,
                    dampening,
                    cos_half_dampen,
                );
                shadow.set_bone_global(for_bone, global);
            }
            if constraint.hook.is_axially_constrained() {
                let Some(bone) = shadow.bone(for_bone) else {
                    return;
                };
                let mut global = bone.transform().global();
                constraint.hook.snap_to_twist(
                    &mut global,
                    &constraint.frame,
                    dampening,
                    cos_half_dampen,
                );
                shadow.set_bone_global(for_bone, global);
            }
        }

        shadow.refresh_subtree(for_bone);
    }
}

/// Weighted mean squared deviation between two heading clouds.
#[must_use]
pub(crate) fn weighted_msd(tip: &[DVec3], target: &[DVec3], weights: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut w_sum = 0.0;
    for ((tip, target), weight) in tip.iter().zip(target).zip(weights) {
        sum += weight * (*target - *tip).length_squared();
        w_sum += weight;
    }
    if w_sum > 0.0 {
        sum / w_sum
    } else {
        0.0
    }
}

/// Clamp a rotation to a maximum angle, preserving its axis.
pub(crate) fn clamp_to_angle(rotation: DQuat, angle: f64) -> DQuat {
    clamp_to_quadrance_angle(rotation, (0.5 * angle).cos())
}

/// Clamp a rotation so its half-angle cosine does not drop below
/// `cos_half_angle`. The scalar part inherits the rotation's sign, keeping
/// the shorter arc.
pub(crate) fn clamp_to_quadrance_angle(rotation: DQuat, cos_half_angle: f64) -> DQuat {
    let new_coeff = 1.0 - cos_half_angle * cos_half_angle;
    let current_coeff =
        rotation.x * rotation.x + rotation.y * rotation.y + rotation.z * rotation.z;
    if current_coeff <= f64::EPSILON || new_coeff > current_coeff {
        return rotation;
    }
    let w = if rotation.w < 0.0 {
        -cos_half_angle
    } else {
        cos_half_angle
    };
    let composite = (new_coeff / current_coeff).sqrt();
    DQuat::from_xyzw(
        rotation.x * composite,
        rotation.y * composite,
        rotation.z * composite,
        w,
    )
}

/// Partition the shadow skeleton into pin-terminated segments.
///
/// Returns the arena and the root segment index; empty when no pin is
/// reachable from the root. Chains whose subtree contains no pin are
/// pruned.
pub fn build_segments(
    shadow: &ShadowSkeleton,
    root: BoneId,
) -> (Vec<BoneSegment>, Option<usize>) {
    let mut pinned_subtrees = HashSet::new();
    if shadow.contains(root) {
        mark_pinned_subtrees(shadow, root, &mut pinned_subtrees);
    }

    let mut arena = Vec::new();
    let root_index = if pinned_subtrees.contains(&root) {
        build_segment(shadow, &pinned_subtrees, &mut arena, root, None)
    } else {
        None
    };
    compute_effector_direct_descendants(shadow, &mut arena);
    update_effector_lists(shadow, &mut arena, root_index);
    (arena, root_index)
}

/// Mark every bone whose subtree (itself included) contains a pin.
fn mark_pinned_subtrees(
    shadow: &ShadowSkeleton,
    bone: BoneId,
    marked: &mut HashSet<BoneId>,
) -> bool {
    let Some(node) = shadow.bone(bone) else {
        return false;
    };
    let mut pinned = node.is_pinned();
    for &child in node.children() {
        if mark_pinned_subtrees(shadow, child, marked) {
            pinned = true;
        }
    }
    if pinned {
        marked.insert(bone);
    }
    pinned
}

fn build_segment(
    shadow: &ShadowSkeleton,
    pinned_subtrees: &HashSet<BoneId>,
    arena: &mut Vec<BoneSegment>,
    start: BoneId,
    parent: Option<usize>,
) -> Option<usize> {
    let mut chain = vec![start];
    let mut current = start;
    let branch_children;
    loop {
        let node = shadow.bone(current)?;
        if node.is_pinned() {
            branch_children = pinned_children(node, pinned_subtrees);
            break;
        }
        let candidates = pinned_children(node, pinned_subtrees);
        if candidates.len() == 1 {
            current = candidates[0];
            chain.push(current);
        } else {
            branch_children = candidates;
            break;
        }
    }

    chain.reverse(); // tip first, root last
    let index = arena.len();
    arena.push(BoneSegment::new(start, current, parent, chain));

    let mut pinned = shadow.bone(current).is_some_and(IkBone::is_pinned);
    for child in branch_children {
        if let Some(child_index) =
            build_segment(shadow, pinned_subtrees, arena, child, Some(index))
        {
            arena[index].children.push(child_index);
            if arena[child_index].pinned_descendants {
                pinned = true;
            }
        }
    }
    arena[index].pinned_descendants = pinned;
    pinned.then_some(index)
}

fn pinned_children(node: &IkBone, pinned_subtrees: &HashSet<BoneId>) -> Vec<BoneId> {
    node.children()
        .iter()
        .copied()
        .filter(|child| pinned_subtrees.contains(child))
        .collect()
}

/// A pinned tip makes the segment its own effector direct descendant;
/// otherwise the lists of the children are concatenated. Children carry
/// higher arena indices than their parents, so a reverse sweep sees every
/// child before its parent.
fn compute_effector_direct_descendants(shadow: &ShadowSkeleton, arena: &mut Vec<BoneSegment>) {
    for index in (0..arena.len()).rev() {
        let descendants = if arena[index].is_pinned(shadow) {
            vec![index]
        } else {
            let mut collected = Vec::new();
            for i in 0..arena[index].children.len() {
                let child = arena[index].children[i];
                collected.extend_from_slice(&arena[child].effector_direct_descendants);
            }
            collected
        };
        arena[index].effector_direct_descendants = descendants;
    }
}

/// Assemble each segment's effector list bottom-up, scale descendant
/// weights by the tip pin's depth falloff, and size the heading buffers.
fn update_effector_lists(
    shadow: &ShadowSkeleton,
    arena: &mut Vec<BoneSegment>,
    root_index: Option<usize>,
) {
    let Some(root_index) = root_index else {
        return;
    };
    update_effector_list(shadow, arena, root_index);
}

fn update_effector_list(shadow: &ShadowSkeleton, arena: &mut Vec<BoneSegment>, index: usize) {
    for i in 0..arena[index].children.len() {
        let child = arena[index].children[i];
        update_effector_list(shadow, arena, child);
    }

    let tip = arena[index].tip;
    let falloff = shadow
        .bone(tip)
        .and_then(IkBone::effector)
        .map_or(1.0, |effector| f64::from(effector.depth_falloff()));

    let mut entries = Vec::new();
    if falloff > f64::EPSILON {
        for i in 0..arena[index].children.len() {
            let child = arena[index].children[i];
            for j in 0..arena[child].effectors.len() {
                let entry = arena[child].effectors[j];
                entries.push(SegmentEffector {
                    bone: entry.bone,
                    falloff: entry.falloff * falloff,
                });
            }
        }
    }
    if arena[index].is_pinned(shadow) {
        entries.push(SegmentEffector {
            bone: tip,
            falloff: 1.0,
        });
    }

    let mut weights = Vec::new();
    for entry in &entries {
        if let Some(effector) = shadow.bone(entry.bone).and_then(IkBone::effector) {
            effector.push_heading_weights(entry.falloff, &mut weights);
        }
    }

    let segment = &mut arena[index];
    segment.effectors = entries;
    segment.target_headings = vec![DVec3::ZERO; weights.len()];
    segment.tip_headings = vec![DVec3::ZERO; weights.len()];
    segment.heading_weights = weights;
}

/// Solve the segment tree rooted at `index`, then let each pinned node's
/// downstream branches resettle: for every effector direct descendant,
/// recurse into its child segments.
pub fn grouped_segment_solver(
    arena: &mut [BoneSegment],
    shadow: &mut ShadowSkeleton,
    index: usize,
    stabilization_passes: u32,
) {
    segment_solver(arena, shadow, index, None, stabilization_passes);
    for i in 0..arena[index].effector_direct_descendants.len() {
        let descendant = arena[index].effector_direct_descendants[i];
        for j in 0..arena[descendant].children.len() {
            let child = arena[descendant].children[j];
            grouped_segment_solver(arena, shadow, child, stabilization_passes);
        }
    }
}

/// Post-order solve: child segments settle first, then this chain runs its
/// per-bone QCP pass tip to root. A pinned tip is a grouped-traversal
/// boundary, so recursion stops there. The root segment solves unclamped
/// and with translation enabled at its root bone.
fn segment_solver(
    arena: &mut [BoneSegment],
    shadow: &mut ShadowSkeleton,
    index: usize,
    damp: Option<f32>,
    stabilization_passes: u32,
) {
    let tip_pinned = arena[index].is_pinned(shadow);
    if !tip_pinned {
        for i in 0..arena[index].children.len() {
            let child = arena[index].children[i];
            segment_solver(arena, shadow, child, damp, stabilization_passes);
        }
    }

    let is_root_segment = arena[index].parent.is_none();
    let (damp, translate) = if is_root_segment {
        (Some(PI), true)
    } else {
        (damp, false)
    };
    qcp_solver(arena, shadow, index, damp, translate, stabilization_passes);
}

fn qcp_solver(
    arena: &mut [BoneSegment],
    shadow: &mut ShadowSkeleton,
    index: usize,
    damp: Option<f32>,
    translate: bool,
    stabilization_passes: u32,
) {
    if arena[index].effectors.is_empty() {
        return;
    }
    for i in 0..arena[index].bones.len() {
        let bone_id = arena[index].bones[i];
        let locked = shadow
            .bone(bone_id)
            .is_some_and(IkBone::is_orientation_locked);
        if locked {
            continue;
        }
        let translate_this = translate && bone_id == arena[index].root;
        arena[index].update_optimal_rotation(
            shadow,
            bone_id,
            damp,
            translate_this,
            stabilization_passes,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureSkeleton;
    use crate::transform::Pose;
    use glam::Vec3;

    fn quat_angle(q: DQuat) -> f64 {
        let (_, angle) = q.to_axis_angle();
        angle
    }

    #[test]
    fn clamp_leaves_small_rotations_alone() {
        let small = DQuat::from_rotation_z(0.1);
        let clamped = clamp_to_angle(small, 0.5);
        assert!(small.dot(clamped).abs() > 1.0 - 1e-9);
    }

    #[test]
    fn clamp_caps_large_rotations() {
        let large = DQuat::from_rotation_z(2.0);
        let clamped = clamp_to_angle(large, 0.5);
        assert!((quat_angle(clamped) - 0.5).abs() < 1e-6);
        // Axis preserved.
        assert!(clamped.z > 0.0);
        assert!((clamped.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clamp_keeps_shorter_arc_for_negative_w() {
        let rotation = -DQuat::from_rotation_z(2.0);
        let clamped = clamp_to_quadrance_angle(rotation, (0.25f64).cos());
        assert!(clamped.w < 0.0);
        assert!((clamped.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clamp_identity_is_noop() {
        let identity = DQuat::IDENTITY;
        assert_eq!(clamp_to_angle(identity, 0.0), identity);
    }

    #[test]
    fn msd_weights_the_deviation() {
        let tip = [DVec3::ZERO, DVec3::ZERO];
        let target = [DVec3::X, DVec3::new(0.0, 2.0, 0.0)];
        let weights = [1.0, 3.0];
        let msd = weighted_msd(&tip, &target, &weights);
        assert!((msd - (1.0 + 3.0 * 4.0) / 4.0).abs() < 1e-9);
    }

    fn pinned_shadow(host: &FixtureSkeleton, root: BoneId, pins: &[BoneId]) -> ShadowSkeleton {
        let mut shadow =
            ShadowSkeleton::build(host, root, crate::bone::DEFAULT_DAMPENING).unwrap();
        for &pin in pins {
            shadow.bone_mut(pin).unwrap().create_effector();
        }
        shadow.sync_from_host(host);
        shadow
    }

    #[test]
    fn single_chain_is_one_segment() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b"], Vec3::X);
        let shadow = pinned_shadow(&host, ids[0], &[ids[2]]);

        let (arena, root_index) = build_segments(&shadow, ids[0]);
        assert_eq!(arena.len(), 1);
        let segment = &arena[root_index.unwrap()];
        assert_eq!(segment.root(), ids[0]);
        assert_eq!(segment.tip(), ids[2]);
        assert_eq!(segment.bones(), &[ids[2], ids[1], ids[0]]);
        assert!(segment.has_pinned_descendants());
    }

    #[test]
    fn mid_chain_pin_splits_segments() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b", "c"], Vec3::X);
        let shadow = pinned_shadow(&host, ids[0], &[ids[1], ids[3]]);

        let (arena, root_index) = build_segments(&shadow, ids[0]);
        assert_eq!(arena.len(), 2);
        let root_segment = &arena[root_index.unwrap()];
        assert_eq!(root_segment.tip(), ids[1]);
        let child = &arena[root_segment.children()[0]];
        assert_eq!(child.root(), ids[2]);
        assert_eq!(child.tip(), ids[3]);
    }

    #[test]
    fn branch_without_pin_is_pruned() {
        let mut host = FixtureSkeleton::new();
        let root = host.add_bone("root", None, Pose::IDENTITY);
        let spine = host.add_bone("spine", Some(root), Pose::from_origin(Vec3::Y));
        let arm = host.add_bone("arm", Some(spine), Pose::from_origin(Vec3::X));
        let hand = host.add_bone("hand", Some(arm), Pose::from_origin(Vec3::X));
        let leg = host.add_bone("leg", Some(spine), Pose::from_origin(-Vec3::Y));
        let _foot = host.add_bone("foot", Some(leg), Pose::from_origin(-Vec3::Y));

        let shadow = pinned_shadow(&host, root, &[hand]);
        let (arena, root_index) = build_segments(&shadow, root);

        // The leg branch holds no pin: a single segment runs root..hand.
        assert_eq!(arena.len(), 1);
        let segment = &arena[root_index.unwrap()];
        assert_eq!(segment.tip(), hand);
        assert_eq!(segment.bones(), &[hand, arm, spine, root]);
    }

    #[test]
    fn branching_creates_sibling_segments() {
        let mut host = FixtureSkeleton::new();
        let root = host.add_bone("root", None, Pose::IDENTITY);
        let spine = host.add_bone("spine", Some(root), Pose::from_origin(Vec3::Y));
        let left = host.add_bone("left", Some(spine), Pose::from_origin(Vec3::X));
        let right = host.add_bone("right", Some(spine), Pose::from_origin(-Vec3::X));

        let shadow = pinned_shadow(&host, root, &[left, right]);
        let (arena, root_index) = build_segments(&shadow, root);

        assert_eq!(arena.len(), 3);
        let root_segment = &arena[root_index.unwrap()];
        assert_eq!(root_segment.tip(), spine);
        assert_eq!(root_segment.children().len(), 2);
        // Both pins are visible from the trunk.
        assert_eq!(root_segment.effectors.len(), 2);
        // Origin + two default axis pairs per effector.
        assert_eq!(root_segment.heading_weights.len(), 10);
    }

    #[test]
    fn depth_falloff_attenuates_descendant_weights() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b", "c"], Vec3::X);
        let mut shadow =
            ShadowSkeleton::build(&host, ids[0], crate::bone::DEFAULT_DAMPENING).unwrap();
        {
            let effector = shadow.bone_mut(ids[1]).unwrap().create_effector();
            effector.set_depth_falloff(0.5);
        }
        shadow.bone_mut(ids[3]).unwrap().create_effector();
        shadow.sync_from_host(&host);

        let (arena, root_index) = build_segments(&shadow, ids[0]);
        let root_segment = &arena[root_index.unwrap()];

        // Descendant pin first (attenuated), own pin last (full weight).
        assert_eq!(root_segment.effectors.len(), 2);
        assert!((root_segment.effectors[0].falloff - 0.5).abs() < 1e-9);
        assert!((root_segment.effectors[1].falloff - 1.0).abs() < 1e-9);
        assert!((root_segment.heading_weights[0] - 0.5).abs() < 1e-9);
    }
}

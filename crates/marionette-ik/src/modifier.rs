//! The IK modifier facade
//!
//! Owns the configuration (root bone, iteration counts, targets, per-pin
//! tuning), the shadow skeleton, and the segment arena. `execute` runs once
//! per host animation tick: rebuild when dirty, short-circuit steady-state
//! ticks, otherwise sync the shadow skeleton, iterate the grouped segment
//! solver, and blend the result back into the host.

use crate::bone::{IkBone, DEFAULT_DAMPENING};
use crate::constraint::BoneConstraint;
use crate::effector::{IkEffector, DEFAULT_PRIORITY};
use crate::host::SkeletonHost;
use crate::segment::{build_segments, grouped_segment_solver, BoneSegment};
use crate::skeleton::ShadowSkeleton;
use crate::transform::Pose;
use glam::Vec3;
use marionette_core::{BoneId, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::f32::consts::PI;
use tracing::{debug, warn};

/// Configuration of one IK target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IkTargetConfig {
    /// Name of the pinned bone in the host skeleton
    pub bone_name: String,
    /// Host index of the pinned bone; resolved from the name when absent
    pub bone_index: Option<BoneId>,
    /// Scene path of the node sourcing the target transform
    pub target_node: Option<String>,
    /// Whether the target node's rotation is followed
    pub use_node_rotation: bool,
    /// Local transform composed onto the resolved target
    pub target_transform: Pose,
    /// Per-axis priority; zero components are not followed
    pub priority: Vec3,
    /// Overall pin weight
    pub weight: f32,
    /// Attenuation of descendant pins seen from this pin's segment
    pub depth_falloff: f32,
}

impl Default for IkTargetConfig {
    fn default() -> Self {
        Self {
            bone_name: String::new(),
            bone_index: None,
            target_node: None,
            use_node_rotation: false,
            target_transform: Pose::IDENTITY,
            priority: DEFAULT_PRIORITY,
            weight: 1.0,
            depth_falloff: 1.0,
        }
    }
}

/// Skeleton IK modifier driving one solve per host tick.
pub struct IkModifier {
    root_bone: String,
    root_bone_index: Option<BoneId>,
    ik_iterations: u32,
    stabilization_passes: u32,
    strength: f32,
    default_dampening: f32,
    enabled: bool,
    targets: Vec<IkTargetConfig>,
    constraints: HashMap<String, BoneConstraint>,
    orientation_locks: HashSet<String>,
    dirty: bool,
    calc_done: bool,
    warned: bool,
    host_bone_count: usize,
    shadow: Option<ShadowSkeleton>,
    segments: Vec<BoneSegment>,
    root_segment: Option<usize>,
    bone_list: Vec<BoneId>,
    pins: Vec<BoneId>,
}

impl Default for IkModifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IkModifier {
    /// Create a modifier with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            root_bone: String::new(),
            root_bone_index: None,
            ik_iterations: 10,
            stabilization_passes: 0,
            strength: 1.0,
            default_dampening: DEFAULT_DAMPENING,
            enabled: true,
            targets: Vec::new(),
            constraints: HashMap::new(),
            orientation_locks: HashSet::new(),
            dirty: true,
            calc_done: false,
            warned: false,
            host_bone_count: 0,
            shadow: None,
            segments: Vec::new(),
            root_segment: None,
            bone_list: Vec::new(),
            pins: Vec::new(),
        }
    }

    /// Name of the configured root bone; empty selects the host's first
    /// parentless bone at rebuild
    #[must_use]
    pub fn root_bone(&self) -> &str {
        &self.root_bone
    }

    /// Configure the root bone by name
    pub fn set_root_bone(&mut self, name: &str) {
        self.root_bone = name.to_string();
        self.root_bone_index = None;
        self.mark_dirty();
    }

    /// Resolved root bone index, if any
    #[must_use]
    pub const fn root_bone_index(&self) -> Option<BoneId> {
        self.root_bone_index
    }

    /// Configure the root bone by host index
    pub fn set_root_bone_index(&mut self, index: BoneId) {
        self.root_bone_index = Some(index);
        self.mark_dirty();
    }

    /// Solver iterations per tick
    #[must_use]
    pub const fn ik_iterations(&self) -> u32 {
        self.ik_iterations
    }

    /// Set the solver iteration count (at least 1)
    ///
    /// # Errors
    ///
    /// Rejects a zero count; disable the modifier instead of starving it.
    pub fn set_ik_iterations(&mut self, iterations: u32) -> Result<()> {
        if iterations == 0 {
            return Err(Error::Config(
                "ik_iterations must be at least 1; set enabled to false to disable solving"
                    .to_string(),
            ));
        }
        self.ik_iterations = iterations;
        self.calc_done = false;
        Ok(())
    }

    /// Extra re-fit rounds per bone and iteration
    #[must_use]
    pub const fn stabilization_passes(&self) -> u32 {
        self.stabilization_passes
    }

    /// Set the stabilization pass count
    pub fn set_stabilization_passes(&mut self, passes: u32) {
        self.stabilization_passes = passes;
        self.calc_done = false;
    }

    /// Back-write blend factor
    #[must_use]
    pub const fn strength(&self) -> f32 {
        self.strength
    }

    /// Set the back-write blend factor in `[0, 1]`
    ///
    /// # Errors
    ///
    /// Rejects values outside the unit interval.
    pub fn set_strength(&mut self, strength: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(Error::Config(format!(
                "strength must lie in [0, 1], got {strength}"
            )));
        }
        self.strength = strength;
        self.calc_done = false;
        Ok(())
    }

    /// Default per-bone dampening angle, radians
    #[must_use]
    pub const fn default_dampening(&self) -> f32 {
        self.default_dampening
    }

    /// Set the default per-bone dampening angle in `(0, PI]`
    ///
    /// # Errors
    ///
    /// Rejects non-positive angles and angles beyond a half turn.
    pub fn set_default_dampening(&mut self, dampening: f32) -> Result<()> {
        if !(dampening > 0.0 && dampening <= PI) {
            return Err(Error::Config(format!(
                "dampening must lie in (0, PI], got {dampening}"
            )));
        }
        self.default_dampening = dampening;
        self.mark_dirty();
        Ok(())
    }

    /// Whether `execute` does anything at all
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the modifier
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the previous solve is still valid for the current inputs
    #[must_use]
    pub const fn is_calc_done(&self) -> bool {
        self.calc_done
    }

    /// Number of configured targets
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Resize the target list, filling new slots with defaults
    pub fn set_target_count(&mut self, count: usize) {
        self.targets.resize_with(count, IkTargetConfig::default);
        self.mark_dirty();
    }

    /// Append a target pinned to a named bone
    ///
    /// # Errors
    ///
    /// Rejects an empty bone name.
    pub fn add_target(
        &mut self,
        bone_name: &str,
        target_node: Option<&str>,
        use_node_rotation: bool,
        target_transform: Pose,
    ) -> Result<usize> {
        if bone_name.is_empty() {
            return Err(Error::Config("target bone name must not be empty".to_string()));
        }
        self.targets.push(IkTargetConfig {
            bone_name: bone_name.to_string(),
            target_node: target_node.map(str::to_string),
            use_node_rotation,
            target_transform,
            ..IkTargetConfig::default()
        });
        self.mark_dirty();
        Ok(self.targets.len() - 1)
    }

    /// Remove a target by index
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range index.
    pub fn remove_target(&mut self, index: usize) -> Result<()> {
        if index >= self.targets.len() {
            return Err(Error::Config(format!("no target at index {index}")));
        }
        self.targets.remove(index);
        self.mark_dirty();
        Ok(())
    }

    /// Index of the target bound to a named bone
    #[must_use]
    pub fn find_target(&self, bone_name: &str) -> Option<usize> {
        self.targets
            .iter()
            .position(|target| target.bone_name == bone_name)
    }

    /// Inspect a target's configuration
    #[must_use]
    pub fn target(&self, index: usize) -> Option<&IkTargetConfig> {
        self.targets.get(index)
    }

    /// Bind a target to a bone by name
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range index or empty name.
    pub fn set_target_bone(&mut self, index: usize, bone_name: &str) -> Result<()> {
        if bone_name.is_empty() {
            return Err(Error::Config("target bone name must not be empty".to_string()));
        }
        let target = self.target_mut(index)?;
        target.bone_name = bone_name.to_string();
        target.bone_index = None;
        self.mark_dirty();
        Ok(())
    }

    /// Bind a target to a bone by host index
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range target index.
    pub fn set_target_bone_index(&mut self, index: usize, bone: BoneId) -> Result<()> {
        self.target_mut(index)?.bone_index = Some(bone);
        self.mark_dirty();
        Ok(())
    }

    /// Point a target at a scene node (or back at its local transform)
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range index.
    pub fn set_target_node(&mut self, index: usize, path: Option<&str>) -> Result<()> {
        self.target_mut(index)?.target_node = path.map(str::to_string);
        self.calc_done = false;
        Ok(())
    }

    /// Follow or ignore the target node's rotation
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range index.
    pub fn set_target_use_node_rotation(&mut self, index: usize, use_rotation: bool) -> Result<()> {
        self.target_mut(index)?.use_node_rotation = use_rotation;
        self.calc_done = false;
        Ok(())
    }

    /// Set a target's local transform
    ///
    /// # Errors
    ///
    /// Rejects an out-of-range index.
    pub fn set_target_transform(&mut self, index: usize, transform: Pose) -> Result<()> {
        self.target_mut(index)?.target_transform = transform;
        self.calc_done = false;
        Ok(())
    }

    /// Set a target's per-axis priority (components non-negative)
    ///
    /// # Errors
    ///
    /// Rejects negative components; changing the followed-axis set resizes
    /// heading buffers, so this marks the skeleton dirty.
    pub fn set_target_priority(&mut self, index: usize, priority: Vec3) -> Result<()> {
        if priority.min_element() < 0.0 {
            return Err(Error::Config(format!(
                "priority components must be non-negative, got {priority}"
            )));
        }
        self.target_mut(index)?.priority = priority;
        self.mark_dirty();
        Ok(())
    }

    /// Set a target's weight (strictly positive)
    ///
    /// # Errors
    ///
    /// Rejects non-positive weights.
    pub fn set_target_weight(&mut self, index: usize, weight: f32) -> Result<()> {
        if weight <= 0.0 {
            return Err(Error::Config(format!(
                "weight must be positive, got {weight}"
            )));
        }
        self.target_mut(index)?.weight = weight;
        self.mark_dirty();
        Ok(())
    }

    /// Set a target's depth falloff in `(0, 1]`
    ///
    /// # Errors
    ///
    /// Rejects values outside the half-open interval.
    pub fn set_target_depth_falloff(&mut self, index: usize, falloff: f32) -> Result<()> {
        if !(falloff > 0.0 && falloff <= 1.0) {
            return Err(Error::Config(format!(
                "depth_falloff must lie in (0, 1], got {falloff}"
            )));
        }
        self.target_mut(index)?.depth_falloff = falloff;
        self.mark_dirty();
        Ok(())
    }

    fn target_mut(&mut self, index: usize) -> Result<&mut IkTargetConfig> {
        let len = self.targets.len();
        self.targets
            .get_mut(index)
            .ok_or_else(|| Error::Config(format!("no target at index {index} (of {len})")))
    }

    /// Attach a joint constraint to a named bone, applied at rebuild
    pub fn set_constraint(&mut self, bone_name: &str, constraint: BoneConstraint) {
        self.constraints.insert(bone_name.to_string(), constraint);
        self.mark_dirty();
    }

    /// Remove a named bone's constraint
    pub fn clear_constraint(&mut self, bone_name: &str) {
        self.constraints.remove(bone_name);
        self.mark_dirty();
    }

    /// Lock or unlock a named bone against solver rotation
    pub fn set_orientation_lock(&mut self, bone_name: &str, locked: bool) {
        if locked {
            self.orientation_locks.insert(bone_name.to_string());
        } else {
            self.orientation_locks.remove(bone_name);
        }
        self.mark_dirty();
    }

    /// The shadow skeleton of the last rebuild, for diagnostics
    #[must_use]
    pub const fn shadow(&self) -> Option<&ShadowSkeleton> {
        self.shadow.as_ref()
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.calc_done = false;
    }

    /// Run one tick of the solver against the host.
    ///
    /// Idempotent per frame: steady-state ticks (solve done, no target node
    /// moved) return without touching the host. Failures to rebuild are
    /// reported once through the diagnostic channel and skip the tick.
    pub fn execute<H: SkeletonHost>(&mut self, host: &mut H, _delta: f32) {
        if !self.enabled {
            return;
        }
        if self.host_bone_count != host.bone_count() {
            self.dirty = true;
        }
        if self.dirty {
            match self.rebuild(host) {
                Ok(()) => self.warned = false,
                Err(error) => {
                    if !self.warned {
                        warn!("IK modifier cannot rebuild: {error}");
                        self.warned = true;
                    }
                    return;
                }
            }
        }
        if self.shadow.is_none() || self.root_segment.is_none() {
            return;
        }
        if self.calc_done && !self.any_target_node_changed(host) {
            return;
        }
        if self.strength <= 0.01 {
            return;
        }
        self.solve(host);
        self.calc_done = true;
    }

    fn any_target_node_changed<H: SkeletonHost>(&self, host: &H) -> bool {
        let Some(shadow) = self.shadow.as_ref() else {
            return false;
        };
        self.pins.iter().any(|&pin| {
            shadow
                .bone(pin)
                .and_then(IkBone::effector)
                .is_some_and(|effector| effector.is_node_xform_changed(host))
        })
    }

    fn rebuild<H: SkeletonHost>(&mut self, host: &H) -> Result<()> {
        self.host_bone_count = host.bone_count();

        let root = self.resolve_root(host)?;
        self.root_bone_index = Some(root);
        if let Some(name) = host.bone_name(root) {
            self.root_bone = name;
        }

        let mut shadow = ShadowSkeleton::build(host, root, self.default_dampening)?;

        self.pins.clear();
        for target in &self.targets {
            let Some(bone) = Self::resolve_target_bone(host, target) else {
                if target.bone_name.is_empty() && target.bone_index.is_none() {
                    // Placeholder slot from set_target_count; configured later.
                    debug!("skipping unbound target slot");
                    continue;
                }
                return Err(Error::MissingBone(target.bone_name.clone()));
            };
            if !shadow.contains(bone) {
                return Err(Error::Config(format!(
                    "target bone {} is not reachable from root bone {}",
                    target.bone_name, self.root_bone
                )));
            }
            let node = shadow
                .bone_mut(bone)
                .ok_or_else(|| Error::Internal(format!("shadow bone {bone} vanished")))?;
            node.set_effector(Some(Self::build_effector(target)));
            self.pins.push(bone);
        }

        for (name, constraint) in &self.constraints {
            if let Some(bone) = host.find_bone(name) {
                if let Some(node) = shadow.bone_mut(bone) {
                    node.set_constraint(Some(constraint.clone()));
                }
            }
        }
        for name in &self.orientation_locks {
            if let Some(bone) = host.find_bone(name) {
                if let Some(node) = shadow.bone_mut(bone) {
                    node.set_orientation_lock(true);
                }
            }
        }

        let (segments, root_segment) = build_segments(&shadow, root);
        self.bone_list = collect_bone_list(&segments, root_segment);

        debug!(
            bones = shadow.len(),
            segments = segments.len(),
            pins = self.pins.len(),
            "IK modifier rebuilt"
        );

        self.shadow = Some(shadow);
        self.segments = segments;
        self.root_segment = root_segment;
        self.dirty = false;
        self.calc_done = false;
        Ok(())
    }

    fn resolve_root<H: SkeletonHost>(&self, host: &H) -> Result<BoneId> {
        if let Some(index) = self.root_bone_index {
            if host.bone_name(index).is_some() {
                return Ok(index);
            }
            return Err(Error::MissingBone(format!("{index}")));
        }
        if self.root_bone.is_empty() {
            // Auto-pick the first parentless bone.
            for raw in 0..host.bone_count() {
                let bone = BoneId::from_raw(raw as u32);
                if host.bone_parent(bone).is_none() && host.bone_name(bone).is_some() {
                    return Ok(bone);
                }
            }
            return Err(Error::Config("host skeleton has no root bone".to_string()));
        }
        host.find_bone(&self.root_bone)
            .ok_or_else(|| Error::MissingBone(self.root_bone.clone()))
    }

    fn resolve_target_bone<H: SkeletonHost>(host: &H, target: &IkTargetConfig) -> Option<BoneId> {
        if let Some(index) = target.bone_index {
            if host.bone_name(index).is_some() {
                return Some(index);
            }
        }
        if target.bone_name.is_empty() {
            return None;
        }
        host.find_bone(&target.bone_name)
    }

    fn build_effector(target: &IkTargetConfig) -> IkEffector {
        let mut effector = IkEffector::new();
        effector.set_target_node(target.target_node.clone());
        effector.set_use_target_node_rotation(target.use_node_rotation);
        effector.set_target_transform(target.target_transform);
        effector.set_priority(target.priority);
        effector.set_weight(target.weight);
        effector.set_depth_falloff(target.depth_falloff);
        effector
    }

    fn solve<H: SkeletonHost>(&mut self, host: &mut H) {
        let Some(shadow) = self.shadow.as_mut() else {
            return;
        };
        let Some(root_segment) = self.root_segment else {
            return;
        };

        // The host's pose buffer is read here and written at the end; in
        // between the shadow skeleton is the sole source of truth.
        for &bone in &self.bone_list {
            host.clear_bone_pose_override(bone);
        }
        shadow.sync_from_host(host);

        for &pin in &self.pins {
            let Some(tip_global) = shadow.bone(pin).map(|b| b.transform().global()) else {
                continue;
            };
            if let Some(effector) = shadow.bone_mut(pin).and_then(IkBone::effector_mut) {
                effector.update_goal_transform(host, tip_global);
            }
        }

        for _ in 0..self.ik_iterations {
            grouped_segment_solver(
                &mut self.segments,
                shadow,
                root_segment,
                self.stabilization_passes,
            );
        }

        shadow.write_to_host(host, &self.bone_list, self.strength);
    }
}

/// Flatten the segment tree into a root-first bone list: child segments are
/// collected before their parents, each tip to root, and the whole list is
/// reversed.
fn collect_bone_list(segments: &[BoneSegment], root_segment: Option<usize>) -> Vec<BoneId> {
    let mut list = Vec::new();
    if let Some(root) = root_segment {
        collect_segment_bones(segments, root, &mut list);
    }
    list.reverse();
    list
}

fn collect_segment_bones(segments: &[BoneSegment], index: usize, out: &mut Vec<BoneId>) {
    for &child in segments[index].children() {
        collect_segment_bones(segments, child, out);
    }
    out.extend_from_slice(segments[index].bones());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureSkeleton;

    #[test]
    fn setters_validate_and_preserve_state() {
        let mut modifier = IkModifier::new();

        assert!(modifier.set_ik_iterations(0).is_err());
        assert_eq!(modifier.ik_iterations(), 10);
        modifier.set_ik_iterations(25).unwrap();
        assert_eq!(modifier.ik_iterations(), 25);

        assert!(modifier.set_strength(1.5).is_err());
        assert!((modifier.strength() - 1.0).abs() < f32::EPSILON);

        assert!(modifier.set_default_dampening(0.0).is_err());
        assert!(modifier.set_default_dampening(7.0).is_err());
        modifier.set_default_dampening(0.5).unwrap();

        assert!(modifier.add_target("", None, false, Pose::IDENTITY).is_err());
    }

    #[test]
    fn target_list_management() {
        let mut modifier = IkModifier::new();
        let index = modifier
            .add_target("hand", None, false, Pose::IDENTITY)
            .unwrap();
        assert_eq!(modifier.target_count(), 1);
        assert_eq!(modifier.find_target("hand"), Some(index));

        assert!(modifier.set_target_weight(index, -1.0).is_err());
        assert!(modifier.set_target_depth_falloff(index, 0.0).is_err());
        assert!(modifier
            .set_target_priority(index, Vec3::new(-1.0, 0.0, 0.0))
            .is_err());
        modifier.set_target_weight(index, 2.0).unwrap();
        assert!((modifier.target(index).unwrap().weight - 2.0).abs() < f32::EPSILON);

        modifier.set_target_count(3);
        assert_eq!(modifier.target_count(), 3);
        modifier.remove_target(2).unwrap();
        assert!(modifier.remove_target(5).is_err());
        assert_eq!(modifier.target_count(), 2);
    }

    #[test]
    fn missing_target_bone_warns_and_skips() {
        let mut host = FixtureSkeleton::new();
        host.add_chain(&["root", "a"], Vec3::X);

        let mut modifier = IkModifier::new();
        modifier
            .add_target("nonexistent", None, false, Pose::IDENTITY)
            .unwrap();
        modifier.execute(&mut host, 0.0);

        // The tick was skipped and nothing was written back.
        assert_eq!(host.override_writes(), 0);
        assert!(!modifier.is_calc_done());
    }

    #[test]
    fn auto_picks_rootless_bone() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["pelvis", "spine", "head"], Vec3::Y);

        let mut modifier = IkModifier::new();
        modifier
            .add_target("head", None, false, Pose::IDENTITY)
            .unwrap();
        modifier.execute(&mut host, 0.0);

        assert_eq!(modifier.root_bone_index(), Some(ids[0]));
        assert_eq!(modifier.root_bone(), "pelvis");
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = IkTargetConfig {
            bone_name: "hand".to_string(),
            target_node: Some("grip".to_string()),
            weight: 2.5,
            ..IkTargetConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: IkTargetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}

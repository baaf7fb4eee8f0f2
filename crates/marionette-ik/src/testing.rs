//! Test fixtures
//!
//! An in-memory [`SkeletonHost`] with a chain builder and a named-node map,
//! used by the crate's own tests and available to downstream hosts writing
//! theirs.

use crate::host::SkeletonHost;
use crate::transform::Pose;
use glam::Vec3;
use marionette_core::BoneId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct FixtureBone {
    name: String,
    parent: Option<BoneId>,
    local: Pose,
    override_pose: Option<(Pose, f32)>,
}

/// A minimal host skeleton backed by plain vectors.
///
/// Pose overrides blend over the base pose by their amount, the way a host
/// runtime applies a modifier's transient output on top of animation.
#[derive(Debug, Clone, Default)]
pub struct FixtureSkeleton {
    bones: Vec<FixtureBone>,
    nodes: HashMap<String, Pose>,
    transform: Pose,
    override_writes: usize,
}

impl FixtureSkeleton {
    /// An empty skeleton at the world origin
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bone; returns its identifier
    pub fn add_bone(&mut self, name: &str, parent: Option<BoneId>, local: Pose) -> BoneId {
        let id = BoneId::from_raw(self.bones.len() as u32);
        self.bones.push(FixtureBone {
            name: name.to_string(),
            parent,
            local,
            override_pose: None,
        });
        id
    }

    /// Add a chain of bones, the first at the origin and each subsequent
    /// bone offset by `offset` in its parent's frame
    pub fn add_chain(&mut self, names: &[&str], offset: Vec3) -> Vec<BoneId> {
        let mut ids = Vec::with_capacity(names.len());
        let mut parent = None;
        for (i, name) in names.iter().enumerate() {
            let local = if i == 0 {
                Pose::IDENTITY
            } else {
                Pose::from_origin(offset)
            };
            let id = self.add_bone(name, parent, local);
            parent = Some(id);
            ids.push(id);
        }
        ids
    }

    /// Place or move a named scene node
    pub fn set_node(&mut self, path: &str, pose: Pose) {
        self.nodes.insert(path.to_string(), pose);
    }

    /// Set the skeleton's own world transform
    pub fn set_transform(&mut self, transform: Pose) {
        self.transform = transform;
    }

    /// The bone's local pose with any override blended in
    #[must_use]
    pub fn effective_local(&self, bone: BoneId) -> Option<Pose> {
        let entry = self.bones.get(bone.index())?;
        Some(match entry.override_pose {
            Some((pose, amount)) => Pose::new(
                entry.local.rotation.slerp(pose.rotation, amount),
                entry.local.origin.lerp(pose.origin, amount),
            ),
            None => entry.local,
        })
    }

    /// The bone's pose in skeleton space, overrides included
    #[must_use]
    pub fn pose_in_skeleton(&self, bone: BoneId) -> Option<Pose> {
        let entry = self.bones.get(bone.index())?;
        let local = self.effective_local(bone)?;
        Some(match entry.parent {
            Some(parent) => self.pose_in_skeleton(parent)? * local,
            None => local,
        })
    }

    /// The bone's world pose, overrides included
    #[must_use]
    pub fn world_pose(&self, bone: BoneId) -> Option<Pose> {
        Some(self.transform * self.pose_in_skeleton(bone)?)
    }

    /// How many override writes the solver has issued
    #[must_use]
    pub const fn override_writes(&self) -> usize {
        self.override_writes
    }
}

impl SkeletonHost for FixtureSkeleton {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn find_bone(&self, name: &str) -> Option<BoneId> {
        self.bones
            .iter()
            .position(|bone| bone.name == name)
            .map(|index| BoneId::from_raw(index as u32))
    }

    fn bone_name(&self, bone: BoneId) -> Option<String> {
        self.bones.get(bone.index()).map(|entry| entry.name.clone())
    }

    fn bone_parent(&self, bone: BoneId) -> Option<BoneId> {
        self.bones.get(bone.index())?.parent
    }

    fn bone_children(&self, bone: BoneId) -> Vec<BoneId> {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.parent == Some(bone))
            .map(|(index, _)| BoneId::from_raw(index as u32))
            .collect()
    }

    fn bone_local_pose(&self, bone: BoneId) -> Option<Pose> {
        self.bones.get(bone.index()).map(|entry| entry.local)
    }

    fn set_bone_local_pose(&mut self, bone: BoneId, pose: Pose) {
        if let Some(entry) = self.bones.get_mut(bone.index()) {
            entry.local = pose;
        }
    }

    fn set_bone_pose_override(&mut self, bone: BoneId, pose: Pose, amount: f32) {
        if let Some(entry) = self.bones.get_mut(bone.index()) {
            entry.override_pose = Some((pose, amount));
            self.override_writes += 1;
        }
    }

    fn clear_bone_pose_override(&mut self, bone: BoneId) {
        if let Some(entry) = self.bones.get_mut(bone.index()) {
            entry.override_pose = None;
        }
    }

    fn global_transform(&self) -> Pose {
        self.transform
    }

    fn node_world_transform(&self, path: &str) -> Option<Pose> {
        self.nodes.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn chain_builder_wires_parents() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b"], Vec3::X);
        assert_eq!(host.bone_parent(ids[0]), None);
        assert_eq!(host.bone_parent(ids[2]), Some(ids[1]));
        assert_eq!(host.bone_children(ids[0]), vec![ids[1]]);
        assert_eq!(host.find_bone("b"), Some(ids[2]));
    }

    #[test]
    fn world_pose_composes_chain() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b"], Vec3::X);
        let world = host.world_pose(ids[2]).unwrap();
        assert!((world.origin - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn overrides_blend_by_amount() {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a"], Vec3::X);
        let rotated = Pose::new(Quat::from_rotation_z(FRAC_PI_2), Vec3::X);

        host.set_bone_pose_override(ids[1], rotated, 1.0);
        let full = host.effective_local(ids[1]).unwrap();
        assert!(full.rotation.abs_diff_eq(rotated.rotation, 1e-6));

        host.set_bone_pose_override(ids[1], rotated, 0.0);
        let none = host.effective_local(ids[1]).unwrap();
        assert!(none.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));

        host.clear_bone_pose_override(ids[1]);
        assert_eq!(host.effective_local(ids[1]), host.bone_local_pose(ids[1]));
    }
}

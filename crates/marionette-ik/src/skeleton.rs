//! The shadow skeleton
//!
//! An ephemeral mirror of the host skeleton, rebuilt whenever the root bone,
//! the pin set, or the host bone count changes. Bones live in a map keyed by
//! [`BoneId`]; parent/child links are plain identifiers, so ownership stays
//! acyclic. Between the per-solve sync and the final back-write, the shadow
//! skeleton is the sole source of truth for bone poses.

use crate::bone::IkBone;
use crate::host::SkeletonHost;
use crate::transform::Pose;
use glam::{Quat, Vec3};
use marionette_core::{BoneId, Error, Result};
use std::collections::HashMap;

/// Arena of shadow bones for one solve domain.
#[derive(Debug, Default)]
pub struct ShadowSkeleton {
    bones: HashMap<BoneId, IkBone>,
    root: Option<BoneId>,
}

impl ShadowSkeleton {
    /// Mirror the host topology reachable from `root`.
    pub fn build<H: SkeletonHost>(host: &H, root: BoneId, default_dampening: f32) -> Result<Self> {
        if host.bone_name(root).is_none() {
            return Err(Error::MissingBone(format!("{root}")));
        }
        let mut skeleton = Self {
            bones: HashMap::new(),
            root: Some(root),
        };
        skeleton.add_subtree(host, root, None, default_dampening);
        Ok(skeleton)
    }

    fn add_subtree<H: SkeletonHost>(
        &mut self,
        host: &H,
        bone: BoneId,
        parent: Option<BoneId>,
        default_dampening: f32,
    ) {
        self.bones
            .insert(bone, IkBone::new(bone, parent, default_dampening));
        if let Some(parent_id) = parent {
            if let Some(parent_bone) = self.bones.get_mut(&parent_id) {
                parent_bone.add_child(bone);
            }
        }
        for child in host.bone_children(bone) {
            self.add_subtree(host, child, Some(bone), default_dampening);
        }
    }

    /// The configured root bone
    #[must_use]
    pub const fn root(&self) -> Option<BoneId> {
        self.root
    }

    /// Number of shadow bones
    #[must_use]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    /// Whether the skeleton holds no bones
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Whether a bone is mirrored
    #[must_use]
    pub fn contains(&self, bone: BoneId) -> bool {
        self.bones.contains_key(&bone)
    }

    /// Look up a shadow bone
    #[must_use]
    pub fn bone(&self, bone: BoneId) -> Option<&IkBone> {
        self.bones.get(&bone)
    }

    /// Look up a shadow bone mutably
    pub fn bone_mut(&mut self, bone: BoneId) -> Option<&mut IkBone> {
        self.bones.get_mut(&bone)
    }

    /// Iterate over all shadow bones
    pub fn iter(&self) -> impl Iterator<Item = &IkBone> {
        self.bones.values()
    }

    /// Global pose of a bone's parent, if it has one
    #[must_use]
    pub fn parent_global(&self, bone: BoneId) -> Option<Pose> {
        let parent = self.bones.get(&bone)?.parent()?;
        Some(self.bones.get(&parent)?.transform().global())
    }

    /// Recompute every global pose, parents before children.
    pub fn update_all_globals(&mut self) {
        if let Some(root) = self.root {
            self.refresh_subtree(root);
        }
    }

    /// Recompute the global poses of `bone` and its whole subtree.
    pub fn refresh_subtree(&mut self, bone: BoneId) {
        let parent_global = self.parent_global(bone);
        self.refresh_subtree_inner(bone, parent_global);
    }

    fn refresh_subtree_inner(&mut self, bone: BoneId, parent_global: Option<Pose>) {
        let Some(node) = self.bones.get_mut(&bone) else {
            return;
        };
        node.transform_mut().update_global(parent_global.as_ref());
        let global = node.transform().global();
        for i in 0..self.bones[&bone].children().len() {
            let child = self.bones[&bone].children()[i];
            self.refresh_subtree_inner(child, Some(global));
        }
    }

    /// Apply a global-space rotation to a bone's local pose and refresh its
    /// own global. The caller refreshes the subtree when it is done
    /// mutating the bone.
    pub fn rotate_bone_local_with_global(&mut self, bone: BoneId, rotation: Quat) {
        let parent_global = self.parent_global(bone);
        if let Some(node) = self.bones.get_mut(&bone) {
            node.transform_mut()
                .rotate_local_with_global(rotation, parent_global.as_ref());
            node.transform_mut().update_global(parent_global.as_ref());
        }
    }

    /// Move a bone's global origin by `delta`, re-deriving its local pose.
    pub fn translate_bone_global(&mut self, bone: BoneId, delta: Vec3) {
        let parent_global = self.parent_global(bone);
        if let Some(node) = self.bones.get_mut(&bone) {
            node.transform_mut()
                .translate_global(delta, parent_global.as_ref());
        }
    }

    /// Overwrite a bone's global pose, re-deriving its local pose.
    pub fn set_bone_global(&mut self, bone: BoneId, global: Pose) {
        let parent_global = self.parent_global(bone);
        if let Some(node) = self.bones.get_mut(&bone) {
            node.transform_mut()
                .set_global(global, parent_global.as_ref());
        }
    }

    /// Copy the host's current base local poses into every shadow bone and
    /// rebuild the global caches. Reopens every monotonicity gate.
    pub fn sync_from_host<H: SkeletonHost>(&mut self, host: &H) {
        for (id, bone) in &mut self.bones {
            if let Some(pose) = host.bone_local_pose(*id) {
                bone.set_initial_pose(pose);
            }
        }
        self.update_all_globals();
    }

    /// Write the solved local poses back to the host through its transient
    /// override channel, blended by `strength`.
    pub fn write_to_host<H: SkeletonHost>(&self, host: &mut H, bones: &[BoneId], strength: f32) {
        for &id in bones {
            if let Some(bone) = self.bones.get(&id) {
                bone.set_skeleton_bone_pose(host, strength);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureSkeleton;
    use std::f32::consts::FRAC_PI_2;

    fn three_bone_host() -> (FixtureSkeleton, Vec<BoneId>) {
        let mut host = FixtureSkeleton::new();
        let ids = host.add_chain(&["root", "a", "b"], Vec3::X);
        (host, ids)
    }

    #[test]
    fn mirrors_host_topology() {
        let (host, ids) = three_bone_host();
        let shadow = ShadowSkeleton::build(&host, ids[0], crate::bone::DEFAULT_DAMPENING).unwrap();
        assert_eq!(shadow.len(), 3);
        assert_eq!(shadow.bone(ids[1]).unwrap().parent(), Some(ids[0]));
        assert_eq!(shadow.bone(ids[1]).unwrap().children(), &[ids[2]]);
    }

    #[test]
    fn build_rejects_unknown_root() {
        let (host, _) = three_bone_host();
        let result =
            ShadowSkeleton::build(&host, BoneId::from_raw(99), crate::bone::DEFAULT_DAMPENING);
        assert!(result.is_err());
    }

    #[test]
    fn globals_compose_down_the_chain() {
        let (host, ids) = three_bone_host();
        let mut shadow =
            ShadowSkeleton::build(&host, ids[0], crate::bone::DEFAULT_DAMPENING).unwrap();
        shadow.sync_from_host(&host);

        let b = shadow.bone(ids[2]).unwrap().transform().global();
        assert!((b.origin - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn global_rotation_moves_descendants() {
        let (host, ids) = three_bone_host();
        let mut shadow =
            ShadowSkeleton::build(&host, ids[0], crate::bone::DEFAULT_DAMPENING).unwrap();
        shadow.sync_from_host(&host);

        shadow.rotate_bone_local_with_global(ids[1], Quat::from_rotation_z(FRAC_PI_2));
        shadow.refresh_subtree(ids[1]);

        // Bone a pivots in place; bone b swings from (2,0,0) to (1,1,0).
        let a = shadow.bone(ids[1]).unwrap().transform().global();
        let b = shadow.bone(ids[2]).unwrap().transform().global();
        assert!((a.origin - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        assert!((b.origin - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn parent_child_invariant_holds_after_edits() {
        let (host, ids) = three_bone_host();
        let mut shadow =
            ShadowSkeleton::build(&host, ids[0], crate::bone::DEFAULT_DAMPENING).unwrap();
        shadow.sync_from_host(&host);
        shadow.rotate_bone_local_with_global(ids[0], Quat::from_rotation_y(0.4));
        shadow.translate_bone_global(ids[0], Vec3::new(0.0, 0.5, 0.0));
        shadow.refresh_subtree(ids[0]);

        for bone in [ids[1], ids[2]] {
            let node = shadow.bone(bone).unwrap();
            let parent_global = shadow.parent_global(bone).unwrap();
            let expected = parent_global * node.transform().local();
            assert!(node.transform().global().approx_eq(&expected, 1e-5));
        }
    }
}

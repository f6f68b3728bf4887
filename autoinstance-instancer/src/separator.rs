//! Splitting combined meshes into one node per connected shell

use crate::snapshot::FragmentCache;
use autoinstance_core::{NodeId, Result, SceneGraph, Transform3D};

/// Separates multi-shell meshes
///
/// Every new shell node is re-centred on its own vertex centroid. Rotation is
/// left as it was: the shells must keep their world-aligned bounding boxes for
/// contact detection during reassembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblySeparator;

impl AssemblySeparator {
    pub fn new() -> Self {
        Self
    }

    /// Shell nodes of `node`; a single-shell mesh comes back unchanged
    ///
    /// Only a failed split is an error. Once the scene has split the mesh the
    /// original node is gone, so a shell that cannot be re-centred is kept
    /// with the pivot it was given.
    pub fn separate<S: SceneGraph + ?Sized>(&self, scene: &mut S, node: NodeId) -> Result<Vec<NodeId>> {
        let shells = scene.split_shells(node)?;
        if shells.len() > 1 {
            for &shell in &shells {
                if let Err(e) = center_on_geometry(scene, shell) {
                    log::warn!("could not re-centre shell {shell} of {node}: {e}");
                }
            }
        }
        Ok(shells)
    }

    /// Separate every multi-shell mesh among `nodes`
    ///
    /// Nodes without geometry and single-shell meshes pass through. A node the
    /// scene refuses to split is kept whole.
    pub fn separate_all<S: SceneGraph + ?Sized>(
        &self,
        scene: &mut S,
        nodes: &[NodeId],
        cache: &mut FragmentCache,
    ) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let shell_count = match cache.fragment(scene, node) {
                Ok(fragment) => fragment.map_or(0, |f| f.shell_count),
                Err(e) => {
                    log::warn!("skipping {node} during separation: {e}");
                    continue;
                }
            };
            if shell_count <= 1 {
                result.push(node);
                continue;
            }
            match self.separate(scene, node) {
                Ok(shells) => {
                    log::debug!("separated {node} into {} shell(s)", shells.len());
                    result.extend(shells);
                }
                Err(e) => {
                    log::warn!("failed to separate {node}: {e}");
                    result.push(node);
                }
            }
        }
        cache.invalidate();
        result
    }
}

/// Move a mesh node's pivot to its vertex centroid without moving geometry
pub fn center_on_geometry<S: SceneGraph + ?Sized>(scene: &mut S, node: NodeId) -> Result<()> {
    let Some(fragment) = scene.mesh_data(node)? else {
        return Ok(());
    };
    let Some(center) = fragment.world_centroid() else {
        return Ok(());
    };
    let placement = Transform3D::from_linear_translation(fragment.world_matrix.linear(), center.coords);
    scene.set_placement_preserving_geometry(node, placement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryScene, MeshData};
    use approx::assert_relative_eq;
    use autoinstance_core::{Point3d, Vector3d};
    use nalgebra::{Matrix4, UnitQuaternion, Vector4};

    #[test]
    fn test_separate_recenters_shells() {
        let mut scene = MemoryScene::new();
        let merged = MeshData::merge(&[
            MeshData::cuboid(1.0, 2.0, 3.0),
            MeshData::wedge(1.0, 1.0, 1.0).transformed(&Transform3D::translation(Vector3d::new(0.0, 0.0, 2.0))),
        ]);
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        let placement = Transform3D::from_translation_rotation(Vector3d::new(10.0, 0.0, 0.0), rotation);
        let node = scene.add_mesh("canister", merged, placement, None).unwrap();
        let before = scene.mesh_data(node).unwrap().unwrap().world_points();

        let mut cache = FragmentCache::new();
        let shells = AssemblySeparator::new().separate_all(&mut scene, &[node], &mut cache);
        assert_eq!(shells.len(), 2);
        assert!(cache.is_empty());

        let mut after = Vec::new();
        for &shell in &shells {
            let fragment = scene.mesh_data(shell).unwrap().unwrap();
            let centroid = fragment.world_centroid().unwrap();
            assert_relative_eq!(Point3d::from(fragment.world_matrix.translation_part()), centroid, epsilon = 1e-9);
            assert!(fragment.world_matrix.rotation_part().angle_to(&rotation) < 1e-6);
            after.extend(fragment.world_points());
        }
        for (p, q) in before.iter().zip(&after) {
            assert_relative_eq!(*p, *q, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_single_shells_and_groups_pass_through() {
        let mut scene = MemoryScene::new();
        let group = scene.add_group("group", Transform3D::identity(), None).unwrap();
        let cube = scene
            .add_mesh("cube", MeshData::cuboid(1.0, 1.0, 1.0), Transform3D::identity(), None)
            .unwrap();
        let mut cache = FragmentCache::new();
        let result = AssemblySeparator::new().separate_all(&mut scene, &[group, cube], &mut cache);
        assert_eq!(result, vec![group, cube]);
    }

    #[test]
    fn test_shells_survive_failed_recentring() {
        let mut scene = MemoryScene::new();
        let merged = MeshData::merge(&[
            MeshData::cuboid(1.0, 1.0, 1.0),
            MeshData::cuboid(1.0, 1.0, 1.0).transformed(&Transform3D::translation(Vector3d::new(5.0, 0.0, 0.0))),
        ]);
        // Flattened placement: the shells cannot be re-centred without moving geometry
        let flat = Transform3D {
            matrix: Matrix4::from_diagonal(&Vector4::new(1.0, 1.0, 0.0, 1.0)),
        };
        let node = scene.add_mesh("flat", merged, flat, None).unwrap();

        let mut cache = FragmentCache::new();
        let shells = AssemblySeparator::new().separate_all(&mut scene, &[node], &mut cache);
        assert!(!scene.contains(node));
        assert_eq!(shells.len(), 2);
        assert_eq!(scene.len(), 2);
        for &shell in &shells {
            assert!(scene.contains(shell));
            assert_eq!(scene.mesh_data(shell).unwrap().unwrap().vertex_count, 8);
        }
    }
}

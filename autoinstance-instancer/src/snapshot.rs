//! Read-only snapshots of scene nodes

use autoinstance_core::{MeshFragment, NodeId, NodeSnapshot, Result, SceneGraph};
use std::collections::HashMap;

/// Mesh snapshots memoized for the duration of one analysis phase
///
/// Node identities and placements change whenever the scene is mutated, so
/// the cache must be invalidated after every mutating phase.
#[derive(Debug, Default)]
pub struct FragmentCache {
    fragments: HashMap<NodeId, Option<MeshFragment>>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node's mesh snapshot, `None` for nodes without geometry
    pub fn fragment<S: SceneGraph + ?Sized>(&mut self, scene: &S, node: NodeId) -> Result<Option<MeshFragment>> {
        if let Some(cached) = self.fragments.get(&node) {
            return Ok(cached.clone());
        }
        let fragment = scene.mesh_data(node)?;
        self.fragments.insert(node, fragment.clone());
        Ok(fragment)
    }

    pub fn invalidate(&mut self) {
        self.fragments.clear();
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Number of ancestors of a node
pub fn depth<S: SceneGraph + ?Sized>(scene: &S, node: NodeId) -> Result<usize> {
    let mut depth = 0;
    let mut current = node;
    while let Some(parent) = scene.parent(current)? {
        depth += 1;
        current = parent;
    }
    Ok(depth)
}

/// Snapshot of a mesh node on its own, `None` when it has no geometry
pub fn snapshot_leaf<S: SceneGraph + ?Sized>(
    scene: &S,
    node: NodeId,
    cache: &mut FragmentCache,
) -> Result<Option<NodeSnapshot>> {
    let Some(mesh) = cache.fragment(scene, node)? else {
        return Ok(None);
    };
    Ok(Some(NodeSnapshot::leaf(mesh, depth(scene, node)?)))
}

/// Snapshot of a node and its whole subtree
pub fn snapshot_tree<S: SceneGraph + ?Sized>(
    scene: &S,
    node: NodeId,
    cache: &mut FragmentCache,
) -> Result<NodeSnapshot> {
    let depth = depth(scene, node)?;
    snapshot_at(scene, node, depth, cache)
}

fn snapshot_at<S: SceneGraph + ?Sized>(
    scene: &S,
    node: NodeId,
    depth: usize,
    cache: &mut FragmentCache,
) -> Result<NodeSnapshot> {
    let children = scene
        .children(node)?
        .into_iter()
        .map(|child| snapshot_at(scene, child, depth + 1, cache))
        .collect::<Result<Vec<_>>>()?;

    Ok(NodeSnapshot {
        node,
        name: scene.node_name(node)?,
        local_matrix: scene.local_matrix(node)?,
        world_matrix: scene.world_matrix(node)?,
        depth,
        mesh: cache.fragment(scene, node)?,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryScene, MeshData};
    use autoinstance_core::{Transform3D, Vector3d};

    #[test]
    fn test_tree_snapshot() {
        let mut scene = MemoryScene::new();
        let root = scene.add_group("root", Transform3D::identity(), None).unwrap();
        let arm = scene
            .add_group("arm", Transform3D::translation(Vector3d::new(1.0, 0.0, 0.0)), Some(root))
            .unwrap();
        let hand = scene
            .add_mesh("hand", MeshData::cuboid(0.2, 0.2, 0.2), Transform3D::identity(), Some(arm))
            .unwrap();

        let mut cache = FragmentCache::new();
        let tree = snapshot_tree(&scene, root, &mut cache).unwrap();
        assert_eq!(tree.depth, 0);
        assert!(tree.mesh.is_none());
        assert_eq!(tree.children[0].children[0].node, hand);
        assert_eq!(tree.children[0].children[0].depth, 2);
        assert_eq!(tree.triangle_count(), 12);

        let leaf = snapshot_leaf(&scene, hand, &mut cache).unwrap().unwrap();
        assert_eq!(leaf.depth, 2);
        assert!(snapshot_leaf(&scene, arm, &mut cache).unwrap().is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cache_serves_until_invalidated() {
        let mut scene = MemoryScene::new();
        let cube = scene
            .add_mesh("cube", MeshData::cuboid(1.0, 1.0, 1.0), Transform3D::identity(), None)
            .unwrap();
        let mut cache = FragmentCache::new();
        assert!(cache.fragment(&scene, cube).unwrap().is_some());

        scene.delete(cube).unwrap();
        assert!(cache.fragment(&scene, cube).unwrap().is_some());
        cache.invalidate();
        assert!(cache.fragment(&scene, cube).is_err());
    }
}

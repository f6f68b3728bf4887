//! Scene node handles and hierarchy snapshots

use crate::mesh::MeshFragment;
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a node owned by the host scene graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to the geometry a node draws.
///
/// Two nodes reporting the same key share one underlying geometry (instances).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeometryKey(pub u64);

/// Opaque, comparable material identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialToken(pub String);

impl MaterialToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for MaterialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named UV set with one coordinate per UV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvSet {
    pub name: String,
    pub coords: Vec<[f64; 2]>,
}

/// Immutable snapshot of a node subtree taken at analysis time
///
/// Used for hierarchy-aware comparison, where whole subtrees (not only leaf
/// meshes) are matched against each other.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node: NodeId,
    pub name: String,
    /// Placement relative to the parent node
    pub local_matrix: Transform3D,
    /// Placement in world space
    pub world_matrix: Transform3D,
    /// Number of ancestors
    pub depth: usize,
    pub mesh: Option<MeshFragment>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Snapshot of a single mesh node without children
    pub fn leaf(mesh: MeshFragment, depth: usize) -> Self {
        Self {
            node: mesh.node,
            name: mesh.name.clone(),
            local_matrix: mesh.local_matrix,
            world_matrix: mesh.world_matrix,
            depth,
            mesh: Some(mesh),
            children: Vec::new(),
        }
    }

    /// Whether the node or any descendant already draws shared geometry
    pub fn is_instanced(&self) -> bool {
        self.mesh.as_ref().is_some_and(|m| m.is_instanced)
            || self.children.iter().any(NodeSnapshot::is_instanced)
    }

    /// Total triangle count of the subtree
    pub fn triangle_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |m| m.triangle_count)
            + self
                .children
                .iter()
                .map(NodeSnapshot::triangle_count)
                .sum::<usize>()
    }

    /// Geometry keys of every mesh in the subtree, in depth-first order
    pub fn geometry_keys(&self) -> Vec<GeometryKey> {
        let mut keys = Vec::new();
        self.collect_geometry_keys(&mut keys);
        keys
    }

    fn collect_geometry_keys(&self, keys: &mut Vec<GeometryKey>) {
        if let Some(mesh) = &self.mesh {
            keys.push(mesh.geometry);
        }
        for child in &self.children {
            child.collect_geometry_keys(keys);
        }
    }

    /// Distance from the parent's origin to this node's origin
    pub fn distance_to_parent(&self) -> f64 {
        self.local_matrix.translation_part().norm()
    }
}

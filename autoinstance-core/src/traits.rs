//! Core traits for autoinstance

use crate::{
    mesh::MeshFragment,
    node::NodeId,
    point::Point3d,
    transform::Transform3D,
    Result,
};
use nalgebra::UnitQuaternion;

/// Trait for nearest neighbor search functionality
pub trait NearestNeighborSearch {
    /// Find the nearest neighbor to a query point
    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)>;

    /// Find the k nearest neighbors to a query point, closest first
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)>;

    /// Find all neighbors within a given radius
    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)>;
}

/// In-process interface to the host scene graph
///
/// The instancing core never owns scene state; every read and write goes
/// through this trait. All operations are synchronous and fallible: a failed
/// call affects only the node it was issued for.
pub trait SceneGraph {
    /// The given selection, or every node of the scene when `None`
    fn enumerate(&self, selection: Option<&[NodeId]>) -> Vec<NodeId>;

    /// Snapshot of the node's mesh, `Ok(None)` for nodes without geometry
    fn mesh_data(&self, node: NodeId) -> Result<Option<MeshFragment>>;

    fn children(&self, node: NodeId) -> Result<Vec<NodeId>>;

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>>;

    fn node_name(&self, node: NodeId) -> Result<String>;

    fn rename(&mut self, node: NodeId, name: &str) -> Result<()>;

    /// Placement relative to the parent
    fn local_matrix(&self, node: NodeId) -> Result<Transform3D>;

    /// Placement in world space
    fn world_matrix(&self, node: NodeId) -> Result<Transform3D>;

    /// Move the node (and everything it draws) to a new world placement
    fn set_world_matrix(&mut self, node: NodeId, matrix: Transform3D) -> Result<()>;

    /// Change the node's world placement while leaving its geometry and its
    /// children where they are in world space (a pivot change)
    fn set_placement_preserving_geometry(&mut self, node: NodeId, matrix: Transform3D) -> Result<()>;

    /// Separate a multi-shell mesh into one node per shell; the input node is consumed
    fn split_shells(&mut self, node: NodeId) -> Result<Vec<NodeId>>;

    /// Merge several meshes into one new node; the inputs are consumed
    fn combine_shells(&mut self, nodes: &[NodeId], name: &str) -> Result<NodeId>;

    /// Create an empty transform node at a world position and rotation
    fn create_group(&mut self, name: &str, center: Point3d, rotation: UnitQuaternion<f64>) -> Result<NodeId>;

    /// Move a node under a new parent (or to the scene root), keeping its world placement
    fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<()>;

    /// Delete a node and its subtree
    fn delete(&mut self, node: NodeId) -> Result<()>;

    /// Copy a node's placement and parent, without geometry or children
    fn duplicate_placement_only(&mut self, node: NodeId) -> Result<NodeId>;

    /// Make `onto` draw the same underlying geometry as `from` (the instancing
    /// primitive); children of either node are left alone
    fn share_geometry(&mut self, from: NodeId, onto: NodeId) -> Result<()>;
}

//! Mesh fragment data structures and functionality

use crate::node::{GeometryKey, MaterialToken, NodeId, UvSet};
use crate::point::*;
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3d,
    pub max: Point3d,
}

impl BoundingBox {
    pub fn new(min: Point3d, max: Point3d) -> Self {
        Self { min, max }
    }

    /// Bounding box of a point set, `None` when empty
    pub fn from_points(points: &[Point3d]) -> Option<Self> {
        let first = *points.first()?;
        let mut min = first;
        let mut max = first;

        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);

            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some(Self { min, max })
    }

    pub fn size(&self) -> Vector3d {
        self.max - self.min
    }

    pub fn center(&self) -> Point3d {
        nalgebra::center(&self.min, &self.max)
    }

    /// Box volume (zero for flat boxes)
    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f64 {
        self.size().norm()
    }

    /// Largest edge length
    pub fn max_extent(&self) -> f64 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    /// Whether two boxes overlap or are separated by at most `tolerance` on every axis
    pub fn touches(&self, other: &Self, tolerance: f64) -> bool {
        !(self.max.x + tolerance < other.min.x
            || other.max.x + tolerance < self.min.x
            || self.max.y + tolerance < other.min.y
            || other.max.y + tolerance < self.min.y
            || self.max.z + tolerance < other.min.z
            || other.max.z + tolerance < self.min.z)
    }
}

/// Immutable snapshot of one mesh node, taken at analysis time
///
/// The points are stored in object space; world space is derived through
/// `world_matrix`. Fragments are cheap to rebuild and must be re-taken after
/// any scene mutation, since node identities and placements change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshFragment {
    /// Owning scene node
    pub node: NodeId,
    pub name: String,
    /// Vertex positions in object space
    pub local_points: Vec<Point3d>,
    /// Node placement relative to its parent
    pub local_matrix: Transform3D,
    /// Node placement in world space
    pub world_matrix: Transform3D,
    pub vertex_count: usize,
    pub edge_count: usize,
    pub face_count: usize,
    pub triangle_count: usize,
    /// Number of topologically connected shells
    pub shell_count: usize,
    /// World-space bounding box
    pub bounding_box: BoundingBox,
    /// Sorted, de-duplicated material tokens
    pub materials: Vec<MaterialToken>,
    pub uv_sets: Vec<UvSet>,
    /// Geometry reference, shared between instances
    pub geometry: GeometryKey,
    /// Whether the geometry is referenced by more than one node
    pub is_instanced: bool,
}

impl MeshFragment {
    /// Vertex positions in world space
    pub fn world_points(&self) -> Vec<Point3d> {
        self.world_matrix.transform_points(&self.local_points)
    }

    /// Vertex positions in the parent node's space
    pub fn parent_points(&self) -> Vec<Point3d> {
        self.local_matrix.transform_points(&self.local_points)
    }

    /// Vertex count and face count, the key used to group shells by topology
    pub fn topology(&self) -> (usize, usize) {
        (self.vertex_count, self.face_count)
    }

    /// First material token, if any
    pub fn primary_material(&self) -> Option<&MaterialToken> {
        self.materials.first()
    }

    /// World-space centroid of the vertices
    pub fn world_centroid(&self) -> Option<Point3d> {
        centroid(&self.world_points())
    }

    pub fn is_empty(&self) -> bool {
        self.local_points.is_empty()
    }
}

//! Cheap, order-independent fingerprints used to bucket candidates

use crate::pca::PrincipalAxes;
use autoinstance_core::{quantize, MaterialToken, MeshFragment, NodeSnapshot};
use serde::{Deserialize, Serialize};

/// Decimal digits kept for normalized eigenvalues
pub const PCA_PRECISION: u32 = 3;
/// Decimal digits kept for child distances in hierarchy signatures
pub const DISTANCE_PRECISION: u32 = 2;

/// Which optional components a signature carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOptions {
    /// Drop pose-dependent but scale-sensitive terms (eigenvalues, child distances)
    pub scale_invariant: bool,
    pub materials: bool,
    pub uvs: bool,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            scale_invariant: false,
            materials: true,
            uvs: false,
        }
    }
}

/// Fingerprint of a single mesh fragment
///
/// Equal signatures are necessary but not sufficient for two fragments to be
/// identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeSignature {
    pub vertex_count: usize,
    pub edge_count: usize,
    pub face_count: usize,
    /// Normalized eigenvalues, ascending, as fixed-point integers. Empty when
    /// scale invariance is requested or the fragment has fewer than three points.
    pub pca: Vec<i64>,
    pub materials: Vec<MaterialToken>,
    /// UV set names with their coordinate counts
    pub uv_sets: Vec<(String, usize)>,
}

impl ShapeSignature {
    pub fn compute(fragment: &MeshFragment, options: &SignatureOptions) -> Self {
        let pca = if options.scale_invariant {
            Vec::new()
        } else {
            PrincipalAxes::compute(&fragment.local_points)
                .map(|axes| {
                    axes.normalized_eigenvalues()
                        .iter()
                        .map(|&e| quantize(e, PCA_PRECISION))
                        .collect()
                })
                .unwrap_or_default()
        };

        let materials = if options.materials {
            fragment.materials.clone()
        } else {
            Vec::new()
        };

        let uv_sets = if options.uvs {
            let mut sets: Vec<(String, usize)> = fragment
                .uv_sets
                .iter()
                .map(|set| (set.name.clone(), set.coords.len()))
                .collect();
            sets.sort();
            sets
        } else {
            Vec::new()
        };

        Self {
            vertex_count: fragment.vertex_count,
            edge_count: fragment.edge_count,
            face_count: fragment.face_count,
            pca,
            materials,
            uv_sets,
        }
    }

    /// Vertex, edge and face counts
    pub fn topology(&self) -> (usize, usize, usize) {
        (self.vertex_count, self.edge_count, self.face_count)
    }
}

/// Recursive fingerprint of a node subtree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HierarchySignature {
    pub shape: Option<ShapeSignature>,
    /// Child signatures with their quantized distance to this node, sorted
    pub children: Vec<(HierarchySignature, i64)>,
}

impl HierarchySignature {
    pub fn compute(node: &NodeSnapshot, options: &SignatureOptions) -> Self {
        let shape = node
            .mesh
            .as_ref()
            .map(|mesh| ShapeSignature::compute(mesh, options));

        let mut children: Vec<(HierarchySignature, i64)> = node
            .children
            .iter()
            .map(|child| {
                let distance = if options.scale_invariant {
                    0
                } else {
                    quantize(child.distance_to_parent(), DISTANCE_PRECISION)
                };
                (Self::compute(child, options), distance)
            })
            .collect();
        children.sort();

        Self { shape, children }
    }

    /// Number of mesh nodes in the subtree
    pub fn mesh_count(&self) -> usize {
        usize::from(self.shape.is_some())
            + self.children.iter().map(|(c, _)| c.mesh_count()).sum::<usize>()
    }
}

//! Tolerance-aware geometric identity tests
//!
//! [`GeometryMatcher`] decides whether two mesh fragments are the same shape up
//! to a rigid (and optionally scaled) transform and recovers that transform.
//! Every transform it returns maps the first fragment's object space onto the
//! second fragment's object space: `t * a.local_points ≈ b.local_points`,
//! compared as unordered point sets.
//!
//! Comparisons run in order of increasing cost:
//!
//! 1. ordered point-by-point compare (identity)
//! 2. unordered nearest-neighbor compare (identity)
//! 3. whitening with axis sign flips (only with a scale tolerance)
//! 4. centred compare, then PCA frame candidates, then a frame-correspondence
//!    search with ICP refinement
//!
//! Non-matches and degenerate inputs are `None`, never errors.

use crate::nearest_neighbor::{clouds_match_with_index, max_nearest_distance, KdTree};
use crate::pca::{whiten, PrincipalAxes};
use crate::registration::icp_with_index;
use crate::signature::{HierarchySignature, ShapeSignature, SignatureOptions};
use autoinstance_core::{centroid, MeshFragment, NodeSnapshot, Point3d, Transform3D, Vector3d};
use itertools::{iproduct, Itertools};
use nalgebra::{Isometry3, Matrix3, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Upper bound on frame-correspondence candidates tried per comparison
const MAX_FRAME_CANDIDATES: usize = 4096;
/// Upper bound on ICP refinements per comparison
const MAX_REFINEMENTS: usize = 8;
const REFINE_ITERATIONS: usize = 30;

/// Parameters of geometric comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum point distance for two points to be considered equal
    pub tolerance: f64,
    /// Any positive value enables matching under non-uniform scale
    pub scale_tolerance: f64,
    pub uv_tolerance: f64,
    pub require_same_material: bool,
    pub check_uvs: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.001,
            scale_tolerance: 0.0,
            uv_tolerance: 0.001,
            require_same_material: true,
            check_uvs: false,
        }
    }
}

/// Outcome of a hierarchy comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HierarchyMatch {
    Mismatch,
    /// Matched; the transform is `None` when nothing in the subtrees pins it
    /// down (e.g. empty groups)
    Matched(Option<Transform3D>),
}

impl HierarchyMatch {
    pub fn is_match(&self) -> bool {
        matches!(self, HierarchyMatch::Matched(_))
    }

    pub fn transform(&self) -> Option<Transform3D> {
        match self {
            HierarchyMatch::Matched(t) => *t,
            HierarchyMatch::Mismatch => None,
        }
    }
}

/// Geometric identity tests for mesh fragments and node subtrees
#[derive(Debug, Default)]
pub struct GeometryMatcher {
    config: MatcherConfig,
    comparisons: Cell<usize>,
}

impl GeometryMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            comparisons: Cell::new(0),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn scale_invariant(&self) -> bool {
        self.config.scale_tolerance > 0.0
    }

    pub fn signature_options(&self) -> SignatureOptions {
        SignatureOptions {
            scale_invariant: self.scale_invariant(),
            materials: self.config.require_same_material,
            uvs: self.config.check_uvs,
        }
    }

    pub fn signature(&self, fragment: &MeshFragment) -> ShapeSignature {
        ShapeSignature::compute(fragment, &self.signature_options())
    }

    pub fn hierarchy_signature(&self, node: &NodeSnapshot) -> HierarchySignature {
        HierarchySignature::compute(node, &self.signature_options())
    }

    /// Number of pairwise comparisons executed so far
    pub fn comparison_count(&self) -> usize {
        self.comparisons.get()
    }

    pub fn reset_comparison_count(&self) {
        self.comparisons.set(0);
    }

    /// Whether `a` and `b` are the same shape, and the transform mapping `a` onto `b`
    pub fn are_identical(&self, a: &MeshFragment, b: &MeshFragment) -> Option<Transform3D> {
        self.comparisons.set(self.comparisons.get() + 1);
        self.match_fragments(a, b)
    }

    fn match_fragments(&self, a: &MeshFragment, b: &MeshFragment) -> Option<Transform3D> {
        if a.vertex_count != b.vertex_count || a.face_count != b.face_count {
            return None;
        }
        if self.config.require_same_material && a.materials != b.materials {
            return None;
        }
        let pa = &a.local_points;
        let pb = &b.local_points;
        if pa.len() != pb.len() || pa.is_empty() {
            return None;
        }
        let tol = self.config.tolerance;

        // Ordered fast path
        if pa.iter().zip(pb.iter()).all(|(p, q)| (p - q).norm() <= tol) {
            return self.uvs_agree(a, b).then(Transform3D::identity);
        }

        // Same local space, reordered vertices
        let index_b = KdTree::new(pb);
        if clouds_match_with_index(pa, pb, &index_b, tol) {
            return self.uvs_agree(a, b).then(Transform3D::identity);
        }

        if self.scale_invariant() {
            return self.match_scaled(pa, pb);
        }
        self.match_rigid(pa, pb)
    }

    fn uvs_agree(&self, a: &MeshFragment, b: &MeshFragment) -> bool {
        if !self.config.check_uvs {
            return true;
        }
        let names = |m: &MeshFragment| m.uv_sets.iter().map(|s| s.name.clone()).sorted().collect::<Vec<_>>();
        if names(a) != names(b) {
            return false;
        }
        a.uv_sets.iter().all(|set_a| {
            b.uv_sets
                .iter()
                .find(|set_b| set_b.name == set_a.name)
                .is_some_and(|set_b| {
                    set_a.coords.len() == set_b.coords.len()
                        && set_a.coords.iter().zip(set_b.coords.iter()).all(|(u, v)| {
                            (u[0] - v[0]).abs() <= self.config.uv_tolerance
                                && (u[1] - v[1]).abs() <= self.config.uv_tolerance
                        })
                })
        })
    }

    /// Whitened comparison under the eight axis sign flips
    fn match_scaled(&self, pa: &[Point3d], pb: &[Point3d]) -> Option<Transform3D> {
        let wa = whiten(pa)?;
        let wb = whiten(pb)?;
        // Whitening amplifies noise
        let relaxed = (self.config.tolerance * 100.0).max(0.15);
        let index_wb = KdTree::new(&wb.points);

        for (sx, sy, sz) in iproduct!([1.0, -1.0], [1.0, -1.0], [1.0, -1.0]) {
            let flip = Matrix3::from_diagonal(&Vector3d::new(sx, sy, sz));
            let flipped: Vec<Point3d> = wa.points.iter().map(|p| Point3d::from(flip * p.coords)).collect();
            if clouds_match_with_index(&flipped, &wb.points, &index_wb, relaxed) {
                let linear = wb.backward() * flip * wa.forward();
                let translation = wb.centroid.coords - linear * wa.centroid.coords;
                return Some(Transform3D::from_linear_translation(linear, translation));
            }
        }
        None
    }

    fn match_rigid(&self, pa: &[Point3d], pb: &[Point3d]) -> Option<Transform3D> {
        let tol = self.config.tolerance;
        let ca = centroid(pa)?;
        let cb = centroid(pb)?;
        let centered_a: Vec<Point3d> = pa.iter().map(|p| Point3d::from(p - ca)).collect();
        let centered_b: Vec<Point3d> = pb.iter().map(|p| Point3d::from(p - cb)).collect();
        let index_b = KdTree::new(&centered_b);

        let to_world = |aligned: Transform3D| {
            Transform3D::translation(cb.coords) * aligned * Transform3D::translation(-ca.coords)
        };

        if clouds_match_with_index(&centered_a, &centered_b, &index_b, tol) {
            return Some(Transform3D::translation(cb - ca));
        }

        if let Some(rotation) = self.pca_alignment(&centered_a, &centered_b, &index_b) {
            return Some(to_world(Transform3D::from_linear_translation(rotation, Vector3d::zeros())));
        }

        self.frame_search(&centered_a, &centered_b, &index_b).map(to_world)
    }

    /// Rotations `Vb * Q * Vaᵀ` where `Q` is a signed permutation that only
    /// permutes axes with near-equal variance
    fn pca_alignment(&self, a: &[Point3d], b: &[Point3d], index_b: &KdTree) -> Option<Matrix3<f64>> {
        let tol = self.config.tolerance;
        let axes_a = PrincipalAxes::compute(a)?;
        let axes_b = PrincipalAxes::compute(b)?;
        if axes_a.is_degenerate() || axes_b.is_degenerate() {
            return None;
        }

        let largest = axes_a.eigenvalues[0].max(axes_b.eigenvalues[0]);
        let slack = 4.0 * tol * largest.sqrt() + 1e-9 * largest;
        let near = |x: f64, y: f64| (x - y).abs() <= slack;

        // Rigid motions preserve the variance spectrum
        if (0..3).any(|i| !near(axes_a.eigenvalues[i], axes_b.eigenvalues[i])) {
            return None;
        }

        for perm in (0..3usize).permutations(3) {
            if (0..3).any(|j| !near(axes_a.eigenvalues[j], axes_b.eigenvalues[perm[j]])) {
                continue;
            }
            for (sx, sy, sz) in iproduct!([1.0, -1.0], [1.0, -1.0], [1.0, -1.0]) {
                let signs = [sx, sy, sz];
                let mut q = Matrix3::zeros();
                for j in 0..3 {
                    q[(perm[j], j)] = signs[j];
                }
                if q.determinant() < 0.0 {
                    continue;
                }
                let rotation = axes_b.axes * q * axes_a.axes.transpose();
                let rotated: Vec<Point3d> = a.iter().map(|p| Point3d::from(rotation * p.coords)).collect();
                if clouds_match_with_index(&rotated, b, index_b, tol) {
                    return Some(rotation);
                }
            }
        }
        None
    }

    /// Align a reference pair of points of `a` with every compatible pair of
    /// `b`, refining near misses with ICP
    fn frame_search(&self, a: &[Point3d], b: &[Point3d], index_b: &KdTree) -> Option<Transform3D> {
        let tol = self.config.tolerance;

        let (i0, r0) = a
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.coords.norm()))
            .max_by(|x, y| x.1.total_cmp(&y.1))?;
        if r0 <= tol {
            return None;
        }
        let axis = a[i0].coords / r0;
        let (i1, off_axis) = a
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.coords.cross(&axis).norm()))
            .max_by(|x, y| x.1.total_cmp(&y.1))?;
        let collinear = off_axis <= tol;

        let a0 = a[i0].coords;
        let a1 = a[i1].coords;
        let r1 = a1.norm();
        let dot01 = a0.dot(&a1);
        let radial_slack = 2.0 * tol;
        let dot_slack = 2.0 * tol * (r0 + r1);
        let frame_a = frame(&a0, &a1, collinear);
        let refine_bound = 0.25 * r0;

        let first: Vec<usize> = (0..b.len())
            .filter(|&j| (b[j].coords.norm() - r0).abs() <= radial_slack)
            .collect();

        let mut tried = 0;
        let mut refinements = 0;
        for &j0 in &first {
            let b0 = b[j0].coords;
            let seconds: Vec<usize> = if collinear {
                vec![j0]
            } else {
                (0..b.len())
                    .filter(|&j| {
                        j != j0
                            && (b[j].coords.norm() - r1).abs() <= radial_slack
                            && (b[j].coords.dot(&b0) - dot01).abs() <= dot_slack
                    })
                    .collect()
            };

            for j1 in seconds {
                tried += 1;
                if tried > MAX_FRAME_CANDIDATES {
                    return None;
                }
                let rotation = frame(&b0, &b[j1].coords, collinear) * frame_a.transpose();
                let rotated: Vec<Point3d> = a.iter().map(|p| Point3d::from(rotation * p.coords)).collect();
                if clouds_match_with_index(&rotated, b, index_b, tol) {
                    return Some(Transform3D::from_linear_translation(rotation, Vector3d::zeros()));
                }

                if refinements >= MAX_REFINEMENTS
                    || max_nearest_distance(index_b, &rotated, refine_bound) > refine_bound
                {
                    continue;
                }
                refinements += 1;
                let init = Isometry3::from_parts(
                    nalgebra::Translation3::identity(),
                    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation)),
                );
                let Ok(refined) = icp_with_index(a, b, index_b, init, REFINE_ITERATIONS, None, 1e-14) else {
                    continue;
                };
                if refined.max_distance <= tol {
                    let moved: Vec<Point3d> = a.iter().map(|p| refined.transformation * p).collect();
                    if clouds_match_with_index(&moved, b, index_b, tol) {
                        return Some(Transform3D::from(refined.transformation));
                    }
                }
            }
        }
        None
    }

    /// Whether `transform` maps `a` onto `b`
    pub fn meshes_identical_with_transform(&self, a: &MeshFragment, b: &MeshFragment, transform: &Transform3D) -> bool {
        if a.local_points.len() != b.local_points.len() || a.face_count != b.face_count {
            return false;
        }
        let moved = transform.transform_points(&a.local_points);
        clouds_match_with_index(&moved, &b.local_points, &KdTree::new(&b.local_points), self.config.tolerance)
    }

    /// Compare two subtrees, optionally under an already established transform
    ///
    /// Transforms are expressed in node-local space and re-expressed in each
    /// child's local space as they propagate down. A child that disagrees with
    /// the propagated transform is matched independently; its transform then
    /// replaces the current one only if every previously accepted pair (and the
    /// node's own mesh) agrees with it.
    pub fn are_hierarchies_identical(
        &self,
        a: &NodeSnapshot,
        b: &NodeSnapshot,
        expected: Option<Transform3D>,
    ) -> HierarchyMatch {
        self.comparisons.set(self.comparisons.get() + 1);
        self.match_nodes(a, b, expected)
    }

    fn match_nodes(&self, a: &NodeSnapshot, b: &NodeSnapshot, expected: Option<Transform3D>) -> HierarchyMatch {
        let mut transform = expected;

        match (&a.mesh, &b.mesh) {
            (Some(ma), Some(mb)) => match transform {
                Some(t) => {
                    if !self.meshes_identical_with_transform(ma, mb, &t) {
                        return HierarchyMatch::Mismatch;
                    }
                }
                None => match self.match_fragments(ma, mb) {
                    Some(t) => transform = Some(t),
                    None => return HierarchyMatch::Mismatch,
                },
            },
            (None, None) => {}
            _ => return HierarchyMatch::Mismatch,
        }

        if a.children.len() != b.children.len() {
            return HierarchyMatch::Mismatch;
        }

        let children_a = self.sorted_children(a);
        let children_b = self.sorted_children(b);
        let mut used = vec![false; children_b.len()];
        let mut pairs: Vec<(&NodeSnapshot, &NodeSnapshot)> = Vec::with_capacity(children_a.len());

        for &ca in &children_a {
            let mut accepted = false;
            for (j, &cb) in children_b.iter().enumerate() {
                if used[j] || topology(ca) != topology(cb) || !self.distances_agree(ca, cb) {
                    continue;
                }
                if let Some(updated) = self.pair_children(a, b, ca, cb, transform, &pairs) {
                    transform = updated;
                    used[j] = true;
                    pairs.push((ca, cb));
                    accepted = true;
                    break;
                }
            }
            if !accepted {
                return HierarchyMatch::Mismatch;
            }
        }

        if !self.scale_invariant() && !self.internal_distances_agree(&pairs) {
            return HierarchyMatch::Mismatch;
        }

        HierarchyMatch::Matched(transform)
    }

    /// Match one child pair; the new parent-level transform on success
    fn pair_children(
        &self,
        parent_a: &NodeSnapshot,
        parent_b: &NodeSnapshot,
        ca: &NodeSnapshot,
        cb: &NodeSnapshot,
        transform: Option<Transform3D>,
        pairs: &[(&NodeSnapshot, &NodeSnapshot)],
    ) -> Option<Option<Transform3D>> {
        let expected_child = match transform {
            Some(t) => Some(child_space(&t, ca, cb)?),
            None => None,
        };

        match self.match_nodes(ca, cb, expected_child) {
            HierarchyMatch::Matched(child_transform) => {
                if transform.is_some() {
                    return Some(transform);
                }
                match child_transform {
                    None => Some(None),
                    Some(tc) => {
                        let lifted = parent_space(&tc, ca, cb)?;
                        self.is_compatible(parent_a, parent_b, &lifted, pairs)
                            .then_some(Some(lifted))
                    }
                }
            }
            HierarchyMatch::Mismatch => {
                if transform.is_none() {
                    return None;
                }
                // The propagated transform may be one of several symmetric
                // solutions picked earlier; retry this pair on its own
                let tc = self.match_nodes(ca, cb, None).transform()?;
                let lifted = parent_space(&tc, ca, cb)?;
                self.is_compatible(parent_a, parent_b, &lifted, pairs)
                    .then_some(Some(lifted))
            }
        }
    }

    /// Whether `transform` holds for the nodes' own meshes and all accepted child pairs
    fn is_compatible(
        &self,
        a: &NodeSnapshot,
        b: &NodeSnapshot,
        transform: &Transform3D,
        pairs: &[(&NodeSnapshot, &NodeSnapshot)],
    ) -> bool {
        if let (Some(ma), Some(mb)) = (&a.mesh, &b.mesh) {
            if !self.meshes_identical_with_transform(ma, mb, transform) {
                return false;
            }
        }
        pairs.iter().all(|(ca, cb)| {
            child_space(transform, ca, cb)
                .is_some_and(|expected| self.match_nodes(ca, cb, Some(expected)).is_match())
        })
    }

    fn sorted_children<'a>(&self, node: &'a NodeSnapshot) -> Vec<&'a NodeSnapshot> {
        let scale_invariant = self.scale_invariant();
        node.children
            .iter()
            .sorted_by_key(|child| {
                let distance = if scale_invariant {
                    0
                } else {
                    autoinstance_core::quantize(child.distance_to_parent(), 3)
                };
                (distance, topology(child))
            })
            .collect()
    }

    fn distances_agree(&self, a: &NodeSnapshot, b: &NodeSnapshot) -> bool {
        self.scale_invariant() || (a.distance_to_parent() - b.distance_to_parent()).abs() <= self.config.tolerance
    }

    fn internal_distances_agree(&self, pairs: &[(&NodeSnapshot, &NodeSnapshot)]) -> bool {
        pairs.iter().tuple_combinations().all(|((a1, b1), (a2, b2))| {
            let da = (a1.local_matrix.translation_part() - a2.local_matrix.translation_part()).norm();
            let db = (b1.local_matrix.translation_part() - b2.local_matrix.translation_part()).norm();
            (da - db).abs() <= self.config.tolerance
        })
    }
}

/// Orthonormal right-handed frame spanned by two directions
fn frame(u: &Vector3d, v: &Vector3d, collinear: bool) -> Matrix3<f64> {
    let e1 = u.normalize();
    let e2 = if collinear {
        // Any perpendicular works for a collinear cloud
        let helper = if e1.x.abs() < 0.9 { Vector3d::x() } else { Vector3d::y() };
        (helper - e1 * helper.dot(&e1)).normalize()
    } else {
        (v - e1 * v.dot(&e1)).normalize()
    };
    let e3 = e1.cross(&e2);
    Matrix3::from_columns(&[e1, e2, e3])
}

fn topology(node: &NodeSnapshot) -> (usize, usize, usize) {
    node.mesh
        .as_ref()
        .map_or((0, 0, 0), |m| (m.vertex_count, m.edge_count, m.face_count))
}

/// Re-express a parent-level transform in the children's local spaces: `Lb⁻¹ · t · La`
fn child_space(t: &Transform3D, ca: &NodeSnapshot, cb: &NodeSnapshot) -> Option<Transform3D> {
    Some(cb.local_matrix.inverse()? * *t * ca.local_matrix)
}

/// Lift a child-level transform to the parents' space: `Lb · tc · La⁻¹`
fn parent_space(tc: &Transform3D, ca: &NodeSnapshot, cb: &NodeSnapshot) -> Option<Transform3D> {
    Some(cb.local_matrix * *tc * ca.local_matrix.inverse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use autoinstance_core::{BoundingBox, GeometryKey, MaterialToken, NodeId, UvSet};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fragment(points: Vec<Point3d>, faces: usize) -> MeshFragment {
        let bounding_box = BoundingBox::from_points(&points).unwrap();
        MeshFragment {
            node: NodeId(1),
            name: "frag".to_string(),
            vertex_count: points.len(),
            edge_count: points.len() + faces - 2,
            face_count: faces,
            triangle_count: 2 * faces,
            shell_count: 1,
            local_points: points,
            local_matrix: Transform3D::identity(),
            world_matrix: Transform3D::identity(),
            bounding_box,
            materials: vec![MaterialToken::new("default")],
            uv_sets: Vec::new(),
            geometry: GeometryKey(1),
            is_instanced: false,
        }
    }

    fn cuboid(sx: f64, sy: f64, sz: f64) -> Vec<Point3d> {
        let mut points = Vec::new();
        for &x in &[-sx / 2.0, sx / 2.0] {
            for &y in &[-sy / 2.0, sy / 2.0] {
                for &z in &[-sz / 2.0, sz / 2.0] {
                    points.push(Point3d::new(x, y, z));
                }
            }
        }
        points
    }

    /// A lumpy, asymmetric cloud
    fn blob() -> Vec<Point3d> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..40)
            .map(|_| {
                Point3d::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-0.6..0.6),
                    rng.gen_range(-0.3..0.3),
                )
            })
            .collect()
    }

    fn random_rigid(rng: &mut StdRng) -> Transform3D {
        let rotation = UnitQuaternion::from_euler_angles(
            rng.gen_range(-3.1..3.1),
            rng.gen_range(-1.5..1.5),
            rng.gen_range(-3.1..3.1),
        );
        let translation = Vector3d::new(
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
        );
        Transform3D::from_translation_rotation(translation, rotation)
    }

    fn lands_on(t: &Transform3D, a: &MeshFragment, b: &MeshFragment, tol: f64) -> bool {
        crate::nearest_neighbor::clouds_match(&t.transform_points(&a.local_points), &b.local_points, tol)
    }

    #[test]
    fn test_ordered_fast_path_is_identity() {
        let matcher = GeometryMatcher::default();
        let a = fragment(cuboid(1.0, 2.0, 3.0), 6);
        let t = matcher.are_identical(&a, &a.clone()).unwrap();
        assert!(t.is_identity(1e-12));
        assert_eq!(matcher.comparison_count(), 1);
    }

    #[test]
    fn test_reordered_points_are_identity() {
        let matcher = GeometryMatcher::default();
        let a = fragment(cuboid(1.0, 2.0, 3.0), 6);
        let mut reversed = a.local_points.clone();
        reversed.reverse();
        let b = fragment(reversed, 6);
        assert!(matcher.are_identical(&a, &b).unwrap().is_identity(1e-12));
    }

    #[test]
    fn test_translation_only() {
        let matcher = GeometryMatcher::default();
        let a = fragment(cuboid(1.0, 1.0, 1.0), 6);
        let shifted = Transform3D::translation(Vector3d::new(10.0, 0.0, 0.0));
        let b = fragment(shifted.transform_points(&a.local_points), 6);

        let t = matcher.are_identical(&a, &b).unwrap();
        assert!(t.approx_eq(&shifted, 1e-9));
    }

    #[test]
    fn test_rigid_invariance_random_poses() {
        let matcher = GeometryMatcher::default();
        let mut rng = StdRng::seed_from_u64(42);
        let shapes = vec![
            fragment(cuboid(1.0, 2.0, 3.0), 6),
            fragment(cuboid(1.0, 1.0, 1.0), 6),
            fragment(cuboid(2.0, 2.0, 0.5), 6),
            fragment(blob(), 30),
        ];

        for a in &shapes {
            for _ in 0..5 {
                let pose = random_rigid(&mut rng);
                let b = fragment(pose.transform_points(&a.local_points), a.face_count);
                let t = matcher
                    .are_identical(a, &b)
                    .expect("rigidly moved copy must match");
                assert!(lands_on(&t, a, &b, matcher.config().tolerance));
                assert_relative_eq!(t.linear().determinant(), 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_noise_within_tolerance_still_matches() {
        let matcher = GeometryMatcher::default();
        let mut rng = StdRng::seed_from_u64(3);
        let a = fragment(blob(), 30);
        let pose = random_rigid(&mut rng);
        let noisy: Vec<Point3d> = pose
            .transform_points(&a.local_points)
            .into_iter()
            .map(|p| p + Vector3d::new(rng.gen_range(-1e-4..1e-4), rng.gen_range(-1e-4..1e-4), 0.0))
            .collect();
        let b = fragment(noisy, 30);
        let t = matcher.are_identical(&a, &b).unwrap();
        assert!(lands_on(&t, &a, &b, 0.001));
    }

    #[test]
    fn test_different_shapes_do_not_match() {
        let matcher = GeometryMatcher::default();
        let a = fragment(cuboid(1.0, 2.0, 3.0), 6);
        let b = fragment(cuboid(1.0, 2.0, 3.1), 6);
        assert!(matcher.are_identical(&a, &b).is_none());

        let c = fragment(cuboid(1.0, 2.0, 3.0)[..6].to_vec(), 5);
        assert!(matcher.are_identical(&a, &c).is_none());
    }

    #[test]
    fn test_mirror_image_is_not_a_rigid_match() {
        let matcher = GeometryMatcher::default();
        let a = fragment(blob(), 30);
        let mirrored: Vec<Point3d> = a.local_points.iter().map(|p| Point3d::new(-p.x, p.y, p.z)).collect();
        let b = fragment(mirrored, 30);
        assert!(matcher.are_identical(&a, &b).is_none());
    }

    #[test]
    fn test_material_mismatch() {
        let matcher = GeometryMatcher::default();
        let a = fragment(cuboid(1.0, 1.0, 1.0), 6);
        let mut b = a.clone();
        b.materials = vec![MaterialToken::new("other")];
        assert!(matcher.are_identical(&a, &b).is_none());

        let lenient = GeometryMatcher::new(MatcherConfig {
            require_same_material: false,
            ..MatcherConfig::default()
        });
        assert!(lenient.are_identical(&a, &b).is_some());
    }

    #[test]
    fn test_uv_mismatch_rejects_identity_match() {
        let matcher = GeometryMatcher::new(MatcherConfig {
            check_uvs: true,
            ..MatcherConfig::default()
        });
        let mut a = fragment(cuboid(1.0, 1.0, 1.0), 6);
        a.uv_sets.push(UvSet {
            name: "map1".to_string(),
            coords: vec![[0.0, 0.0], [1.0, 0.0]],
        });
        let mut b = a.clone();
        assert!(matcher.are_identical(&a, &b).is_some());
        b.uv_sets[0].coords[1] = [0.5, 0.0];
        assert!(matcher.are_identical(&a, &b).is_none());
    }

    #[test]
    fn test_scaled_cube_match() {
        let matcher = GeometryMatcher::new(MatcherConfig {
            scale_tolerance: 0.6,
            ..MatcherConfig::default()
        });
        let a = fragment(cuboid(1.0, 1.0, 1.0), 6);
        let b = fragment(cuboid(2.0, 2.0, 2.0), 6);

        let t = matcher.are_identical(&a, &b).unwrap();
        assert_relative_eq!(t.scale_factors(), Vector3d::new(2.0, 2.0, 2.0), epsilon = 1e-6);
        assert!(t.rotation_part().angle() < 1e-6);
        assert!(lands_on(&t, &a, &b, 1e-6));
    }

    #[test]
    fn test_anisotropic_scale_match() {
        let matcher = GeometryMatcher::new(MatcherConfig {
            scale_tolerance: 0.5,
            ..MatcherConfig::default()
        });
        let a = fragment(cuboid(1.0, 2.0, 3.0), 6);
        let stretch = Transform3D::translation(Vector3d::new(3.0, 0.0, 1.0))
            * Transform3D::scaling(Vector3d::new(3.0, 1.0, 0.5));
        let b = fragment(stretch.transform_points(&a.local_points), 6);

        let t = matcher.are_identical(&a, &b).unwrap();
        assert!(lands_on(&t, &a, &b, 1e-6));
    }

    #[test]
    fn test_degenerate_inputs() {
        let matcher = GeometryMatcher::default();
        let mut empty = fragment(cuboid(1.0, 1.0, 1.0), 6);
        empty.local_points.clear();
        empty.vertex_count = 0;
        let mut other = empty.clone();
        other.node = NodeId(2);
        assert!(matcher.are_identical(&empty, &other).is_none());
    }

    fn leaf(points: Vec<Point3d>, faces: usize, local: Transform3D) -> NodeSnapshot {
        let mut mesh = fragment(points, faces);
        mesh.local_matrix = local;
        NodeSnapshot::leaf(mesh, 1)
    }

    fn group(children: Vec<NodeSnapshot>) -> NodeSnapshot {
        NodeSnapshot {
            node: NodeId(100),
            name: "group".to_string(),
            local_matrix: Transform3D::identity(),
            world_matrix: Transform3D::identity(),
            depth: 0,
            mesh: None,
            children,
        }
    }

    /// Body and wedge-shaped lid, each child's points expressed relative to its
    /// own centroid and posed by `pose`
    fn canister(pose: &Transform3D) -> NodeSnapshot {
        let body = cuboid(1.0, 2.0, 3.0);
        let lid = vec![
            Point3d::new(-0.5, -1.0, 1.5),
            Point3d::new(0.5, -1.0, 1.5),
            Point3d::new(-0.5, 1.0, 1.5),
            Point3d::new(0.5, 1.0, 1.5),
            Point3d::new(-0.5, -1.0, 2.3),
            Point3d::new(0.5, -1.0, 2.3),
        ];
        let place = |points: &[Point3d], faces: usize| {
            let world = pose.transform_points(points);
            let c = centroid(&world).unwrap();
            let local: Vec<Point3d> = world.iter().map(|p| Point3d::from(p - c)).collect();
            (local, faces, c)
        };
        let parts = [place(&body, 6), place(&lid, 5)];
        let center = centroid(&[parts[0].2, parts[1].2]).unwrap();
        group(
            parts
                .into_iter()
                .map(|(local, faces, c)| leaf(local, faces, Transform3D::translation(c - center)))
                .collect(),
        )
    }

    #[test]
    fn test_hierarchies_match_under_rotation() {
        let matcher = GeometryMatcher::default();
        let mut rng = StdRng::seed_from_u64(11);
        let a = canister(&Transform3D::identity());
        for _ in 0..4 {
            let b = canister(&random_rigid(&mut rng));
            let result = matcher.are_hierarchies_identical(&a, &b, None);
            let t = result.transform().expect("rotated canister must match");

            // Every child of `a`, carried by `t`, lands on some child of `b`
            for ca in &a.children {
                let ma = ca.mesh.as_ref().unwrap();
                let moved = (t * ca.local_matrix).transform_points(&ma.local_points);
                assert!(b.children.iter().any(|cb| {
                    let mb = cb.mesh.as_ref().unwrap();
                    crate::nearest_neighbor::clouds_match(&moved, &cb.local_matrix.transform_points(&mb.local_points), 1e-3)
                }));
            }
        }
    }

    #[test]
    fn test_hierarchies_with_moved_child_mismatch() {
        let matcher = GeometryMatcher::default();
        let a = canister(&Transform3D::identity());
        let mut b = canister(&Transform3D::identity());
        // Shift the lid sideways while keeping its distance to the group origin
        let offset = b.children[1].local_matrix.translation_part();
        let turned = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0) * offset;
        b.children[1].local_matrix = Transform3D::translation(turned);
        assert!(!matcher.are_hierarchies_identical(&a, &b, None).is_match());
    }

    #[test]
    fn test_hierarchies_child_count_mismatch() {
        let matcher = GeometryMatcher::default();
        let a = canister(&Transform3D::identity());
        let mut b = a.clone();
        b.children.pop();
        assert_eq!(matcher.are_hierarchies_identical(&a, &b, None), HierarchyMatch::Mismatch);
    }

    #[test]
    fn test_empty_groups_match_without_transform() {
        let matcher = GeometryMatcher::default();
        let a = group(Vec::new());
        assert_eq!(matcher.are_hierarchies_identical(&a, &a, None), HierarchyMatch::Matched(None));
    }
}

//! Greedy extraction of instance groups from signature buckets

use crate::matcher::{GeometryMatcher, HierarchyMatch};
use crate::signature::{HierarchySignature, ShapeSignature};
use autoinstance_core::{NodeId, NodeSnapshot, Transform3D};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What is compared when grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingMode {
    /// Compare each candidate's own mesh only
    Leaf,
    /// Compare whole subtrees
    Hierarchy,
}

/// A member of an instance group with its placement relative to the prototype
#[derive(Debug, Clone)]
pub struct InstanceMember {
    pub snapshot: NodeSnapshot,
    /// Maps the prototype's node-local space onto this member's node-local space
    pub relative_transform: Transform3D,
}

/// One prototype plus every candidate found identical to it
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub prototype: NodeSnapshot,
    pub members: Vec<InstanceMember>,
}

impl InstanceGroup {
    /// Number of nodes in the group, prototype included
    pub fn size(&self) -> usize {
        1 + self.members.len()
    }

    /// Triangle count of one copy
    pub fn triangle_count(&self) -> usize {
        self.prototype.triangle_count()
    }

    /// Prototype first, then members in group order
    pub fn nodes(&self) -> Vec<NodeId> {
        std::iter::once(self.prototype.node)
            .chain(self.members.iter().map(|m| m.snapshot.node))
            .collect()
    }

    /// World placement an instance of the prototype needs to stand in for `member`
    pub fn instance_world_matrix(member: &InstanceMember) -> Transform3D {
        member.snapshot.world_matrix * member.relative_transform
    }

    /// Transform carrying the prototype, as placed in the world, onto `member`
    pub fn world_relative_transform(&self, member: &InstanceMember) -> Option<Transform3D> {
        Some(Self::instance_world_matrix(member) * self.prototype.world_matrix.inverse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum BucketKey {
    Shape(ShapeSignature),
    Tree(HierarchySignature),
    /// Candidates that cannot be compared in this mode
    Alone(NodeId),
}

/// Bucket candidates by signature and greedily split every bucket into groups
///
/// Every candidate ends up in exactly one group; candidates without a partner
/// form singleton groups. Inside a bucket, candidates already drawing shared
/// geometry are preferred as prototype, then the alphabetically first name.
/// Pairs from different buckets are never compared.
pub fn find_instance_groups(
    matcher: &GeometryMatcher,
    candidates: Vec<NodeSnapshot>,
    mode: GroupingMode,
) -> Vec<InstanceGroup> {
    let mut buckets: BTreeMap<BucketKey, Vec<NodeSnapshot>> = BTreeMap::new();
    for candidate in candidates {
        let key = match mode {
            GroupingMode::Leaf => match &candidate.mesh {
                Some(mesh) => BucketKey::Shape(matcher.signature(mesh)),
                None => BucketKey::Alone(candidate.node),
            },
            GroupingMode::Hierarchy => BucketKey::Tree(matcher.hierarchy_signature(&candidate)),
        };
        buckets.entry(key).or_default().push(candidate);
    }

    let mut groups = Vec::new();
    for (_, mut bucket) in buckets {
        bucket.sort_by(|a, b| {
            (!a.is_instanced(), &a.name, a.node).cmp(&(!b.is_instanced(), &b.name, b.node))
        });

        let mut remaining = bucket.into_iter();
        let mut pending: Vec<NodeSnapshot> = Vec::new();
        while let Some(prototype) = remaining.next() {
            let mut members = Vec::new();
            for candidate in remaining.by_ref() {
                match relate(matcher, &prototype, &candidate, mode) {
                    Some(relative_transform) => members.push(InstanceMember {
                        snapshot: candidate,
                        relative_transform,
                    }),
                    None => pending.push(candidate),
                }
            }
            log::debug!(
                "group '{}' ({}): {} member(s), {} left in bucket",
                prototype.name,
                prototype.node,
                members.len(),
                pending.len()
            );
            groups.push(InstanceGroup { prototype, members });
            remaining = std::mem::take(&mut pending).into_iter();
        }
    }
    groups
}

/// Transform relating `prototype` to `candidate`, if they are identical
fn relate(
    matcher: &GeometryMatcher,
    prototype: &NodeSnapshot,
    candidate: &NodeSnapshot,
    mode: GroupingMode,
) -> Option<Transform3D> {
    match mode {
        GroupingMode::Leaf => {
            let (a, b) = (prototype.mesh.as_ref()?, candidate.mesh.as_ref()?);
            // Nodes already sharing one geometry are identical by construction
            if a.geometry == b.geometry {
                return Some(Transform3D::identity());
            }
            matcher.are_identical(a, b)
        }
        GroupingMode::Hierarchy => match matcher.are_hierarchies_identical(prototype, candidate, None) {
            HierarchyMatch::Matched(t) => Some(t.unwrap_or_default()),
            HierarchyMatch::Mismatch => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherConfig;
    use autoinstance_core::{BoundingBox, GeometryKey, MaterialToken, MeshFragment, Point3d, Vector3d};
    use std::collections::HashSet;

    fn cuboid(sx: f64, sy: f64, sz: f64) -> Vec<Point3d> {
        let mut points = Vec::new();
        for &x in &[0.0, sx] {
            for &y in &[0.0, sy] {
                for &z in &[0.0, sz] {
                    points.push(Point3d::new(x, y, z));
                }
            }
        }
        points
    }

    fn pyramid() -> Vec<Point3d> {
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(1.0, 1.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.5, 0.5, 1.0),
        ]
    }

    fn prism() -> Vec<Point3d> {
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 2.0),
            Point3d::new(1.0, 0.0, 2.0),
            Point3d::new(0.0, 1.0, 2.0),
        ]
    }

    fn snapshot(id: u64, name: &str, points: Vec<Point3d>, faces: usize, world: Transform3D) -> NodeSnapshot {
        let bounding_box = BoundingBox::from_points(&world.transform_points(&points)).unwrap();
        NodeSnapshot::leaf(
            MeshFragment {
                node: NodeId(id),
                name: name.to_string(),
                vertex_count: points.len(),
                edge_count: points.len() + faces - 2,
                face_count: faces,
                triangle_count: 2 * faces,
                shell_count: 1,
                local_points: points,
                local_matrix: world,
                world_matrix: world,
                bounding_box,
                materials: vec![MaterialToken::new("default")],
                uv_sets: Vec::new(),
                geometry: GeometryKey(id),
                is_instanced: false,
            },
            0,
        )
    }

    fn at(x: f64) -> Transform3D {
        Transform3D::translation(Vector3d::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_simple_duplicate_forms_one_group() {
        let matcher = GeometryMatcher::default();
        let a = snapshot(1, "cube_a", cuboid(1.0, 1.0, 1.0), 6, Transform3D::identity());
        let b = snapshot(2, "cube_b", cuboid(1.0, 1.0, 1.0), 6, at(10.0));

        let groups = find_instance_groups(&matcher, vec![b, a], GroupingMode::Leaf);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.size(), 2);
        assert_eq!(group.prototype.name, "cube_a");

        let relative = group.world_relative_transform(&group.members[0]).unwrap();
        assert!(relative.approx_eq(&at(10.0), 1e-9));
    }

    #[test]
    fn test_partition_is_complete() {
        let matcher = GeometryMatcher::default();
        let candidates = vec![
            snapshot(1, "a", cuboid(1.0, 2.0, 3.0), 6, at(0.0)),
            snapshot(2, "b", cuboid(1.0, 2.0, 3.0), 6, at(5.0)),
            snapshot(3, "c", cuboid(1.0, 2.0, 3.5), 6, at(10.0)),
            snapshot(4, "d", pyramid(), 5, at(15.0)),
            snapshot(5, "e", prism(), 5, at(20.0)),
            snapshot(6, "f", pyramid(), 5, at(25.0)),
        ];
        let groups = find_instance_groups(&matcher, candidates, GroupingMode::Leaf);

        let mut seen = HashSet::new();
        for group in &groups {
            for node in group.nodes() {
                assert!(seen.insert(node), "{node} appears twice");
            }
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(groups.iter().filter(|g| g.size() == 2).count(), 2);
    }

    #[test]
    fn test_different_buckets_are_never_compared() {
        let matcher = GeometryMatcher::new(MatcherConfig {
            tolerance: 1000.0,
            ..MatcherConfig::default()
        });
        let candidates = vec![
            snapshot(1, "five", pyramid(), 5, at(0.0)),
            snapshot(2, "six", prism(), 5, at(0.0)),
        ];
        let groups = find_instance_groups(&matcher, candidates, GroupingMode::Leaf);
        assert_eq!(groups.len(), 2);
        assert_eq!(matcher.comparison_count(), 0);
    }

    #[test]
    fn test_instanced_candidates_are_preferred_as_prototype() {
        let matcher = GeometryMatcher::default();
        let a = snapshot(1, "a", cuboid(1.0, 1.0, 1.0), 6, at(0.0));
        let mut z = snapshot(2, "z", cuboid(1.0, 1.0, 1.0), 6, at(3.0));
        if let Some(mesh) = z.mesh.as_mut() {
            mesh.is_instanced = true;
        }
        let groups = find_instance_groups(&matcher, vec![a, z], GroupingMode::Leaf);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].prototype.name, "z");
    }

    #[test]
    fn test_shared_geometry_is_not_recompared() {
        let matcher = GeometryMatcher::default();
        let a = snapshot(1, "a", cuboid(1.0, 1.0, 1.0), 6, at(0.0));
        let mut b = snapshot(2, "b", cuboid(1.0, 1.0, 1.0), 6, at(3.0));
        if let Some(mesh) = b.mesh.as_mut() {
            mesh.geometry = GeometryKey(1);
        }
        let groups = find_instance_groups(&matcher, vec![a, b], GroupingMode::Leaf);
        assert_eq!(groups[0].size(), 2);
        assert!(groups[0].members[0].relative_transform.is_identity(1e-12));
        assert_eq!(matcher.comparison_count(), 0);
    }

    #[test]
    fn test_leftovers_form_their_own_groups() {
        // Mirror images share counts and eigenvalues but are not rigidly identical
        let matcher = GeometryMatcher::default();
        let chiral = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(3.0, 0.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
            Point3d::new(1.0, 1.5, 0.7),
            Point3d::new(2.2, 0.3, 0.9),
        ];
        let mirrored: Vec<Point3d> = chiral.iter().map(|p| Point3d::new(-p.x, p.y, p.z)).collect();
        let candidates = vec![
            snapshot(1, "a", chiral.clone(), 5, at(0.0)),
            snapshot(2, "b", mirrored.clone(), 5, at(4.0)),
            snapshot(3, "c", chiral, 5, at(8.0)),
            snapshot(4, "d", mirrored, 5, at(12.0)),
        ];
        let groups = find_instance_groups(&matcher, candidates, GroupingMode::Leaf);
        let mut sizes: Vec<usize> = groups.iter().map(InstanceGroup::size).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 2]);
    }
}

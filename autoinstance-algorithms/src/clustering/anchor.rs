//! Anchor-based clustering
//!
//! Topologies that repeat a distinctive number of times and are large enough
//! to be a "body" become anchors; every anchor instance seeds one cluster.
//! Other topologies are assigned a role from their repeat count and
//! distributed among the clusters of that role by proximity, under a
//! per-cluster budget.

use super::{ClusteringStrategy, ShellInfo, Topology};
use crate::nearest_neighbor::KdTree;
use autoinstance_core::{NearestNeighborSearch, Point3d};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tunables of anchor inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Repeat counts that identify an anchor topology, most significant first
    pub anchor_counts: Vec<usize>,
    /// Smallest vertex count an anchor topology may have
    pub min_anchor_vertices: usize,
    /// Repeat counts that are split between the two smallest roles
    pub shared_counts: Vec<usize>,
    /// Repeat counts that belong to the singleton role
    pub small_role_counts: Vec<usize>,
    /// Shells with fewer vertices than this whose count equals an anchor count
    /// belong to the singleton role
    pub small_vertex_threshold: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            anchor_counts: vec![5, 3, 1],
            min_anchor_vertices: 50,
            shared_counts: vec![4],
            small_role_counts: vec![1, 2],
            small_vertex_threshold: 6,
        }
    }
}

/// Structural role of a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Role {
    /// Belongs to the role whose anchor repeats this many times
    Typed(usize),
    /// Split between the smallest role and the next one
    Shared,
    Unknown,
}

struct Cluster {
    anchor: usize,
    role: usize,
    members: Vec<usize>,
    budget: HashMap<Topology, usize>,
}

pub struct AnchorStrategy {
    config: AnchorConfig,
}

impl AnchorStrategy {
    pub fn new(config: AnchorConfig) -> Self {
        Self { config }
    }

    fn infer_role(
        &self,
        topology: Topology,
        count: usize,
        anchors: &BTreeMap<Topology, usize>,
        role_counts: &[usize],
    ) -> Role {
        if let Some(&role) = anchors.get(&topology) {
            return Role::Typed(role);
        }
        let has_singleton_role = role_counts.contains(&1);

        if self.config.small_role_counts.contains(&count) {
            return if has_singleton_role { Role::Typed(1) } else { Role::Unknown };
        }
        // Checked before divisibility: every count is divisible by 1
        if self.config.shared_counts.contains(&count) {
            return Role::Shared;
        }
        for &anchor_count in role_counts {
            if count % anchor_count == 0 {
                if anchor_count == count
                    && topology.0 < self.config.small_vertex_threshold
                    && has_singleton_role
                {
                    return Role::Typed(1);
                }
                return Role::Typed(anchor_count);
            }
        }
        Role::Unknown
    }
}

impl ClusteringStrategy for AnchorStrategy {
    fn name(&self) -> &'static str {
        "anchor"
    }

    fn cluster(&self, shells: &[ShellInfo]) -> Option<Vec<Vec<usize>>> {
        let mut by_topology: BTreeMap<Topology, Vec<usize>> = BTreeMap::new();
        for (i, shell) in shells.iter().enumerate() {
            by_topology.entry(shell.topology).or_default().push(i);
        }

        // One anchor topology per distinctive count: the one with most vertices
        let mut anchors: BTreeMap<Topology, usize> = BTreeMap::new();
        for &count in &self.config.anchor_counts {
            let largest = by_topology
                .iter()
                .filter(|(_, members)| members.len() == count)
                .map(|(&topology, _)| topology)
                .max();
            if let Some(topology) = largest.filter(|t| t.0 >= self.config.min_anchor_vertices) {
                anchors.insert(topology, count);
            }
        }
        if anchors.len() < 2 {
            return None;
        }

        let mut role_counts: Vec<usize> = anchors.values().copied().collect();
        role_counts.sort_unstable_by(|a, b| b.cmp(a));

        let mut clusters: Vec<Cluster> = Vec::new();
        for &role in &role_counts {
            let mut seeds: Vec<usize> = anchors
                .iter()
                .filter(|&(_, &r)| r == role)
                .flat_map(|(topology, _)| by_topology[topology].iter().copied())
                .collect();
            seeds.sort_by(|&a, &b| lexical(&shells[a].center, &shells[b].center));
            clusters.extend(seeds.into_iter().map(|anchor| Cluster {
                anchor,
                role,
                members: vec![anchor],
                budget: HashMap::new(),
            }));
        }

        let clusters_of = |role: usize, clusters: &[Cluster]| -> Vec<usize> {
            (0..clusters.len()).filter(|&c| clusters[c].role == role).collect()
        };

        let roles: HashMap<Topology, Role> = by_topology
            .iter()
            .map(|(&topology, members)| {
                (topology, self.infer_role(topology, members.len(), &anchors, &role_counts))
            })
            .collect();

        let mut shared: Vec<Topology> = Vec::new();
        for (&topology, members) in &by_topology {
            match roles[&topology] {
                Role::Shared => shared.push(topology),
                Role::Typed(role) => {
                    let targets = clusters_of(role, &clusters);
                    if targets.is_empty() {
                        continue;
                    }
                    let per_cluster = members.len() / targets.len();
                    for c in targets {
                        clusters[c].budget.insert(topology, per_cluster);
                    }
                }
                Role::Unknown => {}
            }
        }

        // Budget-constrained assignment to the nearest cluster of the same role
        let mut unassigned: Vec<usize> = Vec::new();
        for (i, shell) in shells.iter().enumerate() {
            if anchors.contains_key(&shell.topology) {
                continue;
            }
            let Role::Typed(role) = roles[&shell.topology] else {
                unassigned.push(i);
                continue;
            };
            let targets = clusters_of(role, &clusters);
            let centers: Vec<Point3d> = targets.iter().map(|&c| shells[clusters[c].anchor].center).collect();
            let index = KdTree::new(&centers);
            let nearest = index
                .find_k_nearest(&shell.center, targets.len())
                .into_iter()
                .map(|(k, _)| targets[k])
                .find(|&c| clusters[c].budget.get(&shell.topology).copied().unwrap_or(0) > 0);
            match nearest {
                Some(c) => {
                    clusters[c].members.push(i);
                    if let Some(left) = clusters[c].budget.get_mut(&shell.topology) {
                        *left -= 1;
                    }
                }
                None => unassigned.push(i),
            }
        }

        // Shared topologies: the closest shell per cluster goes to the smallest
        // role, the rest to the nearest cluster of the next role
        let smallest_role = role_counts.last().copied();
        let next_role = role_counts.iter().rev().nth(1).copied();
        for topology in shared {
            let Some(smallest) = smallest_role else { break };
            let small_clusters = clusters_of(smallest, &clusters);
            let Some(&first) = small_clusters.first() else {
                continue;
            };
            let reference = shells[clusters[first].anchor].center;
            let mut members = by_topology[&topology].clone();
            members.sort_by(|&a, &b| {
                (shells[a].center - reference)
                    .norm()
                    .total_cmp(&(shells[b].center - reference).norm())
            });

            let next_clusters = next_role.map(|r| clusters_of(r, &clusters)).unwrap_or_default();
            let next_index = KdTree::new(
                &next_clusters
                    .iter()
                    .map(|&c| shells[clusters[c].anchor].center)
                    .collect::<Vec<_>>(),
            );
            for (rank, i) in members.into_iter().enumerate() {
                let target = if rank < small_clusters.len() {
                    Some(small_clusters[rank])
                } else {
                    next_index.find_nearest(&shells[i].center).map(|(k, _)| next_clusters[k])
                };
                // Without a target the shell stays unassigned for the proximity pass
                if let Some(c) = target {
                    clusters[c].members.push(i);
                    unassigned.retain(|&u| u != i);
                }
            }
        }

        // Whatever is left goes to the globally nearest anchor
        if !unassigned.is_empty() {
            let centers: Vec<Point3d> = clusters.iter().map(|c| shells[c.anchor].center).collect();
            let index = KdTree::new(&centers);
            for i in unassigned {
                if let Some((c, _)) = index.find_nearest(&shells[i].center) {
                    clusters[c].members.push(i);
                }
            }
        }

        Some(clusters.into_iter().map(|c| c.members).collect())
    }
}

fn lexical(a: &Point3d, b: &Point3d) -> std::cmp::Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    const BIG_BODY: Topology = (64, 62);
    const CASE_BODY: Topology = (120, 118);
    const BOLT: Topology = (8, 6);
    const KNOB: Topology = (12, 10);

    /// Three "cases" (body + two bolts each) and one "other" (body + two knobs)
    fn scene() -> Vec<ShellInfo> {
        let mut shells = Vec::new();
        let mut id = 0;
        let mut push = |topology: Topology, center: [f64; 3], size: f64| {
            id += 1;
            shells.push(shell(id, topology, center, size));
        };
        for k in 0..3 {
            let x = k as f64 * 20.0;
            push(CASE_BODY, [x, 0.0, 0.0], 4.0);
            push(BOLT, [x + 1.0, 0.0, 2.5], 0.5);
            push(BOLT, [x - 1.0, 0.0, 2.5], 0.5);
        }
        push(BIG_BODY, [0.0, 30.0, 0.0], 3.0);
        push(KNOB, [0.0, 31.0, 2.0], 0.4);
        push(KNOB, [0.0, 29.0, 2.0], 0.4);
        shells
    }

    fn cluster_of(clusters: &[Vec<usize>], shell: usize) -> usize {
        clusters.iter().position(|c| c.contains(&shell)).unwrap()
    }

    #[test]
    fn test_anchor_clustering_recovers_assemblies() {
        let shells = scene();
        let clusters = AnchorStrategy::new(AnchorConfig::default()).cluster(&shells).unwrap();
        assert_partition(&clusters, shells.len());
        assert_eq!(clusters.len(), 4);
        assert!(clusters.iter().all(|c| c.len() == 3));

        for k in 0..3 {
            let body = 3 * k;
            assert_eq!(cluster_of(&clusters, body), cluster_of(&clusters, body + 1));
            assert_eq!(cluster_of(&clusters, body), cluster_of(&clusters, body + 2));
        }
        assert_eq!(cluster_of(&clusters, 9), cluster_of(&clusters, 10));
        assert_eq!(cluster_of(&clusters, 9), cluster_of(&clusters, 11));
    }

    #[test]
    fn test_declines_with_a_single_role() {
        let shells: Vec<ShellInfo> = scene().into_iter().take(9).collect();
        assert!(AnchorStrategy::new(AnchorConfig::default()).cluster(&shells).is_none());
    }

    #[test]
    fn test_declines_when_bodies_are_too_small() {
        let config = AnchorConfig {
            min_anchor_vertices: 500,
            ..AnchorConfig::default()
        };
        assert!(AnchorStrategy::new(config).cluster(&scene()).is_none());
    }

    #[test]
    fn test_shared_topology_is_split() {
        // Four clips: one sits on the "other" body, three on the cases
        let mut shells = scene();
        let clip: Topology = (16, 14);
        let mut id = 100;
        for center in [[0.0, 0.0, -2.5], [20.0, 0.0, -2.5], [40.0, 0.0, -2.5], [0.0, 30.0, -2.0]] {
            id += 1;
            shells.push(shell(id, clip, center, 0.5));
        }
        let clusters = AnchorStrategy::new(AnchorConfig::default()).cluster(&shells).unwrap();
        assert_partition(&clusters, shells.len());

        assert_eq!(cluster_of(&clusters, 15), cluster_of(&clusters, 9));
        assert_eq!(cluster_of(&clusters, 12), cluster_of(&clusters, 0));
        assert_eq!(cluster_of(&clusters, 13), cluster_of(&clusters, 3));
        assert_eq!(cluster_of(&clusters, 14), cluster_of(&clusters, 6));
    }

    #[test]
    fn test_unknown_topologies_go_to_nearest_anchor() {
        // Three cases and five crates, no singleton role
        let mut shells: Vec<ShellInfo> = scene().into_iter().take(9).collect();
        let crate_body: Topology = (80, 78);
        for k in 0..5 {
            shells.push(shell(50 + k, crate_body, [k as f64 * 20.0, -40.0, 0.0], 4.0));
        }
        // Seven of a kind divides neither 5 nor 3
        let stray: Topology = (7, 5);
        for k in 0..7 {
            shells.push(shell(200 + k, stray, [40.0, 0.5 * k as f64, 3.0], 0.2));
        }
        let clusters = AnchorStrategy::new(AnchorConfig::default()).cluster(&shells).unwrap();
        assert_partition(&clusters, shells.len());
        assert_eq!(clusters.len(), 8);
        let third_case = cluster_of(&clusters, 6);
        for k in 0..7 {
            assert_eq!(cluster_of(&clusters, 14 + k), third_case);
        }
    }

    #[test]
    fn test_role_inference() {
        let strategy = AnchorStrategy::new(AnchorConfig::default());
        let anchors = BTreeMap::from([(CASE_BODY, 3), (BIG_BODY, 1)]);
        let roles = [3, 1];
        assert_eq!(strategy.infer_role(CASE_BODY, 3, &anchors, &roles), Role::Typed(3));
        assert_eq!(strategy.infer_role(BOLT, 6, &anchors, &roles), Role::Typed(3));
        assert_eq!(strategy.infer_role(KNOB, 2, &anchors, &roles), Role::Typed(1));
        assert_eq!(strategy.infer_role(KNOB, 4, &anchors, &roles), Role::Shared);
        // Tiny shells repeated once per case belong to the singleton role
        assert_eq!(strategy.infer_role((4, 4), 3, &anchors, &roles), Role::Typed(1));
        assert_eq!(strategy.infer_role((7, 5), 7, &anchors, &[5, 3]), Role::Unknown);
    }
}

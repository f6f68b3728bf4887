//! Regrouping of a flat pool of shells into multi-part assemblies
//!
//! Strategies implement [`ClusteringStrategy`] and are tried in order by
//! [`AssemblyClusterer`]; a strategy may decline with `None`. Whatever the
//! strategy, the clusterer guarantees every input shell lands in exactly one
//! assembly.

mod adjacency;
mod anchor;
mod spatial;

pub use adjacency::{AdjacencyConfig, AdjacencyStrategy};
pub use anchor::{AnchorConfig, AnchorStrategy};
pub use spatial::{SpatialRadiusConfig, SpatialRadiusStrategy};

use autoinstance_core::{centroid, BoundingBox, MaterialToken, MeshFragment, NodeId, Point3d};
use serde::{Deserialize, Serialize};

/// Topology key used to recognise repeated shells: (vertex count, face count)
pub type Topology = (usize, usize);

/// What the clusterer needs to know about one shell
#[derive(Debug, Clone)]
pub struct ShellInfo {
    pub node: NodeId,
    pub topology: Topology,
    /// World-space bounds
    pub bounding_box: BoundingBox,
    /// Centre of the world bounds, used for proximity
    pub center: Point3d,
    /// Mean of the world-space vertices
    pub centroid: Point3d,
    pub volume: f64,
    pub material: Option<MaterialToken>,
}

impl ShellInfo {
    pub fn new(
        node: NodeId,
        topology: Topology,
        bounding_box: BoundingBox,
        centroid: Point3d,
        material: Option<MaterialToken>,
    ) -> Self {
        Self {
            node,
            topology,
            center: bounding_box.center(),
            volume: bounding_box.volume(),
            bounding_box,
            centroid,
            material,
        }
    }

    pub fn from_fragment(fragment: &MeshFragment) -> Self {
        let world = fragment.world_points();
        let bounding_box = BoundingBox::from_points(&world).unwrap_or(fragment.bounding_box);
        let centroid = centroid(&world).unwrap_or_else(|| bounding_box.center());
        Self::new(
            fragment.node,
            fragment.topology(),
            bounding_box,
            centroid,
            fragment.primary_material().cloned(),
        )
    }
}

/// A way of partitioning shells into clusters of indices
pub trait ClusteringStrategy {
    fn name(&self) -> &'static str;

    /// Clusters of indices into `shells`, or `None` when the strategy does not apply
    fn cluster(&self, shells: &[ShellInfo]) -> Option<Vec<Vec<usize>>>;
}

/// One logical multi-part object
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    /// Largest member by bounding volume
    pub root: NodeId,
    pub children: Vec<NodeId>,
    /// Mean of the members' vertex centroids
    pub centroid: Point3d,
}

impl Assembly {
    /// Root first, then children
    pub fn members(&self) -> Vec<NodeId> {
        std::iter::once(self.root).chain(self.children.iter().copied()).collect()
    }

    pub fn len(&self) -> usize {
        1 + self.children.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.children.is_empty()
    }

    fn from_indices(shells: &[ShellInfo], indices: &[usize]) -> Option<Self> {
        let root_index = *indices
            .iter()
            .max_by(|&&a, &&b| shells[a].volume.total_cmp(&shells[b].volume))?;
        let centers: Vec<Point3d> = indices.iter().map(|&i| shells[i].centroid).collect();
        Some(Self {
            root: shells[root_index].node,
            children: indices
                .iter()
                .filter(|&&i| i != root_index)
                .map(|&i| shells[i].node)
                .collect(),
            centroid: centroid(&centers)?,
        })
    }
}

/// Which strategies the clusterer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusteringMode {
    /// Anchor-based, falling back to adjacency + BFS
    #[default]
    Auto,
    /// Anchor-based only; shells stay separate when no anchors are found
    Anchor,
    Adjacency,
    SpatialRadius,
}

/// Settings for every clustering strategy
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub mode: ClusteringMode,
    pub anchor: AnchorConfig,
    pub adjacency: AdjacencyConfig,
    pub spatial: SpatialRadiusConfig,
}

/// Runs clustering strategies in order until one applies
pub struct AssemblyClusterer {
    strategies: Vec<Box<dyn ClusteringStrategy>>,
}

impl AssemblyClusterer {
    pub fn new(config: &ClusteringConfig) -> Self {
        let strategies: Vec<Box<dyn ClusteringStrategy>> = match config.mode {
            ClusteringMode::Auto => vec![
                Box::new(AnchorStrategy::new(config.anchor.clone())),
                Box::new(AdjacencyStrategy::new(config.adjacency.clone())),
            ],
            ClusteringMode::Anchor => vec![Box::new(AnchorStrategy::new(config.anchor.clone()))],
            ClusteringMode::Adjacency => vec![Box::new(AdjacencyStrategy::new(config.adjacency.clone()))],
            ClusteringMode::SpatialRadius => {
                vec![Box::new(SpatialRadiusStrategy::new(config.spatial.clone()))]
            }
        };
        Self { strategies }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ClusteringStrategy>>) -> Self {
        Self { strategies }
    }

    /// Index clusters covering every shell exactly once
    pub fn partition(&self, shells: &[ShellInfo]) -> Vec<Vec<usize>> {
        if shells.is_empty() {
            return Vec::new();
        }

        let clusters = self
            .strategies
            .iter()
            .find_map(|strategy| {
                let clusters = strategy.cluster(shells)?;
                log::debug!("{} clustering produced {} cluster(s)", strategy.name(), clusters.len());
                Some(clusters)
            })
            .unwrap_or_default();

        // Drop duplicate and out-of-range indices, then give leftovers their own cluster
        let mut seen = vec![false; shells.len()];
        let mut result: Vec<Vec<usize>> = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let kept: Vec<usize> = cluster
                .into_iter()
                .filter(|&i| i < shells.len() && !std::mem::replace(&mut seen[i], true))
                .collect();
            if !kept.is_empty() {
                result.push(kept);
            }
        }
        for i in (0..shells.len()).filter(|&i| !seen[i]) {
            result.push(vec![i]);
        }
        result
    }

    /// Assemblies covering every shell exactly once
    pub fn cluster(&self, shells: &[ShellInfo]) -> Vec<Assembly> {
        self.partition(shells)
            .iter()
            .filter_map(|indices| Assembly::from_indices(shells, indices))
            .collect()
    }
}

impl Default for AssemblyClusterer {
    fn default() -> Self {
        Self::new(&ClusteringConfig::default())
    }
}

/// Largest bounding-box edge of a shell
fn extent(shell: &ShellInfo) -> f64 {
    shell.bounding_box.max_extent()
}

/// Connected components of an undirected graph given as adjacency lists, by BFS
fn connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut visited = vec![false; adjacency.len()];
    let mut components = Vec::new();
    for start in 0..adjacency.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut queue = std::collections::VecDeque::from([start]);
        let mut component = Vec::new();
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &neighbor in &adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }
        components.push(component);
    }
    components
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;

    struct Declines;

    impl ClusteringStrategy for Declines {
        fn name(&self) -> &'static str {
            "declines"
        }

        fn cluster(&self, _: &[ShellInfo]) -> Option<Vec<Vec<usize>>> {
            None
        }
    }

    struct Sloppy;

    impl ClusteringStrategy for Sloppy {
        fn name(&self) -> &'static str {
            "sloppy"
        }

        fn cluster(&self, _: &[ShellInfo]) -> Option<Vec<Vec<usize>>> {
            Some(vec![vec![0, 1], vec![1, 7]])
        }
    }

    #[test]
    fn test_partition_is_completed() {
        let shells: Vec<ShellInfo> = (0..4).map(|i| shell(i, (8, 6), [i as f64 * 10.0, 0.0, 0.0], 1.0)).collect();
        let clusterer = AssemblyClusterer::with_strategies(vec![Box::new(Declines), Box::new(Sloppy)]);
        let clusters = clusterer.partition(&shells);
        assert_partition(&clusters, 4);
        assert_eq!(clusters[0], vec![0, 1]);
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn test_no_strategy_applies_gives_singletons() {
        let shells: Vec<ShellInfo> = (0..3).map(|i| shell(i, (8, 6), [i as f64, 0.0, 0.0], 1.0)).collect();
        let clusterer = AssemblyClusterer::with_strategies(vec![Box::new(Declines)]);
        let assemblies = clusterer.cluster(&shells);
        assert_eq!(assemblies.len(), 3);
        assert!(assemblies.iter().all(Assembly::is_singleton));
    }

    #[test]
    fn test_assembly_root_and_centroid() {
        let shells = vec![
            shell(1, (8, 6), [0.0, 0.0, 0.0], 1.0),
            shell(2, (8, 6), [2.0, 0.0, 0.0], 3.0),
            shell(3, (6, 5), [4.0, 3.0, 0.0], 0.5),
        ];
        let assembly = Assembly::from_indices(&shells, &[0, 1, 2]).unwrap();
        assert_eq!(assembly.root, NodeId(2));
        assert_eq!(assembly.children, vec![NodeId(1), NodeId(3)]);
        assert_eq!(assembly.len(), 3);
        assert_relative_eq!(assembly.centroid, Point3d::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn test_connected_components() {
        let adjacency = vec![vec![1], vec![0, 2], vec![1], vec![], vec![5], vec![4]];
        let components = connected_components(&adjacency);
        assert_eq!(components, vec![vec![0, 1, 2], vec![3], vec![4, 5]]);
    }

    #[test]
    fn test_default_mode_falls_back_to_adjacency() {
        // Two touching pairs far apart, no anchor-sized shells
        let shells = vec![
            shell(1, (8, 6), [0.0, 0.0, 0.0], 1.0),
            shell(2, (6, 5), [0.0, 0.0, 1.0], 1.0),
            shell(3, (8, 6), [20.0, 0.0, 0.0], 1.0),
            shell(4, (6, 5), [20.0, 0.0, 1.0], 1.0),
        ];
        let assemblies = AssemblyClusterer::default().cluster(&shells);
        assert_eq!(assemblies.len(), 2);
        assert!(assemblies.iter().all(|a| a.len() == 2));
    }
}

//! Spatial-radius clustering
//!
//! Two shells are linked when their centres lie within a multiple of the
//! larger shell's bounding diagonal; every connected component becomes one
//! cluster.

use super::{connected_components, ClusteringStrategy, ShellInfo};
use crate::nearest_neighbor::KdTree;
use autoinstance_core::{NearestNeighborSearch, Point3d};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialRadiusConfig {
    /// Link distance as a multiple of the larger shell's bounding diagonal
    pub radius_multiple: f64,
}

impl Default for SpatialRadiusConfig {
    fn default() -> Self {
        Self { radius_multiple: 1.5 }
    }
}

/// Connected components of the "centres are close" graph, taken as-is
pub struct SpatialRadiusStrategy {
    config: SpatialRadiusConfig,
}

impl SpatialRadiusStrategy {
    pub fn new(config: SpatialRadiusConfig) -> Self {
        Self { config }
    }

    fn reach(&self, a: &ShellInfo, b: &ShellInfo) -> f64 {
        a.bounding_box.diagonal().max(b.bounding_box.diagonal()) * self.config.radius_multiple
    }
}

impl ClusteringStrategy for SpatialRadiusStrategy {
    fn name(&self) -> &'static str {
        "spatial-radius"
    }

    fn cluster(&self, shells: &[ShellInfo]) -> Option<Vec<Vec<usize>>> {
        let centers: Vec<Point3d> = shells.iter().map(|s| s.center).collect();
        let index = KdTree::new(&centers);
        // No pair can be linked further apart than the widest reach
        let widest = shells
            .iter()
            .map(|s| s.bounding_box.diagonal() * self.config.radius_multiple)
            .fold(0.0, f64::max);

        let mut adjacency = vec![Vec::new(); shells.len()];
        for (i, shell) in shells.iter().enumerate() {
            for (j, distance) in index.find_radius_neighbors(&shell.center, widest) {
                if j > i && distance <= self.reach(shell, &shells[j]) {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }
        Some(connected_components(&adjacency))
    }
}

//! Adjacency clustering: bounding-box contact graph, BFS components, then
//! material and repeat-count splitting of each component

use super::{connected_components, extent, ClusteringStrategy, ShellInfo, Topology};
use autoinstance_core::MaterialToken;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjacencyConfig {
    /// Gap up to which two bounding boxes still count as touching
    pub touch_tolerance: f64,
    /// Search radius as a multiple of the anchor's largest extent
    pub search_radius_mult: f64,
    /// Extra factor applied to the search radius for shells that found no home
    pub relaxed_multiplier: f64,
    /// The relaxed radius is only used when `search_radius_mult` reaches this;
    /// smaller multipliers ask for strict separation
    pub relaxed_threshold: f64,
}

impl Default for AdjacencyConfig {
    fn default() -> Self {
        Self {
            touch_tolerance: 0.01,
            search_radius_mult: 1.5,
            relaxed_multiplier: 2.0,
            relaxed_threshold: 1.25,
        }
    }
}

pub struct AdjacencyStrategy {
    config: AdjacencyConfig,
}

impl AdjacencyStrategy {
    pub fn new(config: AdjacencyConfig) -> Self {
        Self { config }
    }

    fn contact_graph(&self, shells: &[ShellInfo]) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); shells.len()];
        for i in 0..shells.len() {
            for j in (i + 1)..shells.len() {
                if shells[i]
                    .bounding_box
                    .touches(&shells[j].bounding_box, self.config.touch_tolerance)
                {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }
        adjacency
    }

    fn relaxed_mult(&self) -> f64 {
        if self.config.search_radius_mult >= self.config.relaxed_threshold {
            self.config.search_radius_mult * self.config.relaxed_multiplier
        } else {
            self.config.search_radius_mult
        }
    }

    /// Splits one component into `gcd` clusters of equal composition
    fn split_by_count(&self, shells: &[ShellInfo], indices: Vec<usize>) -> Vec<Vec<usize>> {
        if indices.len() <= 1 {
            return vec![indices];
        }

        let mut counts: BTreeMap<Topology, usize> = BTreeMap::new();
        for &i in &indices {
            *counts.entry(shells[i].topology).or_default() += 1;
        }
        let n_clusters = counts.values().copied().fold(0, gcd);
        if n_clusters < 2 {
            return vec![indices];
        }

        // The anchor set must hold exactly one shell per cluster
        let anchor_topology = counts
            .iter()
            .filter(|&(_, &count)| count == n_clusters)
            .map(|(&topology, _)| topology)
            .max_by(|&a, &b| {
                largest_volume(shells, &indices, a).total_cmp(&largest_volume(shells, &indices, b))
            });
        let Some(anchor_topology) = anchor_topology else {
            return vec![indices];
        };

        let anchors: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| shells[i].topology == anchor_topology)
            .collect();
        let expected: HashMap<Topology, usize> = counts
            .iter()
            .map(|(&topology, &count)| (topology, count / n_clusters))
            .collect();

        let mut clusters: Vec<Vec<usize>> = anchors.iter().map(|&a| vec![a]).collect();
        let mut filled: Vec<HashMap<Topology, usize>> = vec![HashMap::new(); anchors.len()];

        let distance = |i: usize, k: usize| (shells[i].center - shells[anchors[k]].center).norm();
        let has_budget = |filled: &[HashMap<Topology, usize>], k: usize, topology: &Topology| {
            filled[k].get(topology).copied().unwrap_or(0) < expected[topology]
        };

        let mut remaining: Vec<(usize, f64)> = indices
            .iter()
            .copied()
            .filter(|&i| shells[i].topology != anchor_topology)
            .map(|i| {
                let mut distances: Vec<f64> = (0..anchors.len()).map(|k| distance(i, k)).collect();
                distances.sort_by(f64::total_cmp);
                (i, distances[1] - distances[0])
            })
            .collect();
        // Most distinguishable first, stable on ties
        remaining.sort_by(|a, b| b.1.total_cmp(&a.1));

        let relaxed = self.relaxed_mult();
        for (i, _) in remaining {
            let topology = shells[i].topology;
            let nearest_with_budget = (0..anchors.len())
                .filter(|&k| has_budget(&filled, k, &topology))
                .min_by(|&a, &b| distance(i, a).total_cmp(&distance(i, b)));

            let within = |k: usize, mult: f64| distance(i, k) <= extent(&shells[anchors[k]]) * mult;
            let strict = (0..anchors.len())
                .filter(|&k| has_budget(&filled, k, &topology) && within(k, self.config.search_radius_mult))
                .min_by(|&a, &b| distance(i, a).total_cmp(&distance(i, b)));

            let target = strict
                .or_else(|| nearest_with_budget.filter(|&k| within(k, relaxed)))
                .or_else(|| (0..anchors.len()).min_by(|&a, &b| distance(i, a).total_cmp(&distance(i, b))));

            if let Some(k) = target {
                clusters[k].push(i);
                *filled[k].entry(topology).or_default() += 1;
            }
        }
        clusters
    }
}

impl ClusteringStrategy for AdjacencyStrategy {
    fn name(&self) -> &'static str {
        "adjacency"
    }

    fn cluster(&self, shells: &[ShellInfo]) -> Option<Vec<Vec<usize>>> {
        let graph = self.contact_graph(shells);
        let clusters = connected_components(&graph)
            .into_iter()
            .flat_map(|component| split_by_material(shells, component))
            .flat_map(|group| self.split_by_count(shells, group))
            .collect();
        Some(clusters)
    }
}

/// Shells of different materials never share an assembly instance
fn split_by_material(shells: &[ShellInfo], indices: Vec<usize>) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<Option<&MaterialToken>, Vec<usize>> = BTreeMap::new();
    for &i in &indices {
        groups.entry(shells[i].material.as_ref()).or_default().push(i);
    }
    let distinct = groups.keys().filter(|m| m.is_some()).count();
    if distinct > 1 {
        groups.into_values().collect()
    } else {
        vec![indices]
    }
}

fn largest_volume(shells: &[ShellInfo], indices: &[usize], topology: Topology) -> f64 {
    indices
        .iter()
        .filter(|&&i| shells[i].topology == topology)
        .map(|&i| shells[i].volume)
        .fold(0.0, f64::max)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

//! Orchestrator configuration

use autoinstance_algorithms::{ClusteringConfig, MatcherConfig, StrategyConfig};
use serde::{Deserialize, Serialize};

/// Every option of an [`AutoInstancer`](crate::AutoInstancer) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoInstancerConfig {
    /// Position match epsilon
    pub tolerance: f64,
    /// Enables non-uniformly scaled matching when positive
    pub scale_tolerance: f64,
    pub uv_tolerance: f64,
    pub require_same_material: bool,
    pub check_uvs: bool,
    /// Compare whole subtrees instead of single meshes
    pub check_hierarchy: bool,
    /// Split multi-shell meshes and regroup the shells into assemblies first
    pub separate_combined: bool,
    /// Merge the parts shared by most assemblies into one mesh per assembly
    pub combine_assemblies: bool,
    /// Adjacency clustering search radius, as a multiple of the anchor's size
    pub search_radius_mult: f64,
    pub is_static: bool,
    pub needs_individual: bool,
    pub will_be_lightmapped: bool,
    pub can_gpu_instance: bool,
    pub clustering: ClusteringConfig,
    /// Re-centre and PCA-align leaf meshes even without separation
    pub canonicalize_leaves: bool,
    /// Also instance groups the strategy would rather combine
    pub instance_combine_groups: bool,
}

impl Default for AutoInstancerConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.001,
            scale_tolerance: 0.0,
            uv_tolerance: 0.001,
            require_same_material: true,
            check_uvs: false,
            check_hierarchy: false,
            separate_combined: false,
            combine_assemblies: false,
            search_radius_mult: 1.5,
            is_static: true,
            needs_individual: false,
            will_be_lightmapped: false,
            can_gpu_instance: true,
            clustering: ClusteringConfig::default(),
            canonicalize_leaves: false,
            instance_combine_groups: true,
        }
    }
}

impl AutoInstancerConfig {
    pub fn matcher(&self) -> MatcherConfig {
        MatcherConfig {
            tolerance: self.tolerance,
            scale_tolerance: self.scale_tolerance,
            uv_tolerance: self.uv_tolerance,
            require_same_material: self.require_same_material,
            check_uvs: self.check_uvs,
        }
    }

    pub fn strategy(&self) -> StrategyConfig {
        StrategyConfig {
            is_static: self.is_static,
            needs_individual: self.needs_individual,
            will_be_lightmapped: self.will_be_lightmapped,
            can_gpu_instance: self.can_gpu_instance,
            ..StrategyConfig::default()
        }
    }

    /// Clustering settings with the top-level search radius applied
    pub fn clustering(&self) -> ClusteringConfig {
        let mut clustering = self.clustering.clone();
        clustering.adjacency.search_radius_mult = self.search_radius_mult;
        clustering
    }
}

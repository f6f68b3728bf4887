//! What to do with a group of identical meshes

use serde::{Deserialize, Serialize};

/// Action chosen for an instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    /// Share one geometry between all placements
    Instance,
    /// Merge into one static mesh
    Combine,
    /// Bake into a texture or impostor
    Bake,
    KeepSeparate,
}

/// Runtime and authoring constraints plus decision thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub is_static: bool,
    pub needs_individual: bool,
    pub will_be_lightmapped: bool,
    pub can_gpu_instance: bool,
    /// Micro groups that repeat a lot are baked rather than combined
    pub is_decorative: bool,
    /// Below this many triangles a mesh counts as micro-geometry
    pub micro_triangles: usize,
    pub min_repeat: usize,
    pub min_triangles: usize,
    pub min_triangles_lightmapped: usize,
    pub heavy_triangles: usize,
    pub heavy_min_repeat: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            is_static: true,
            needs_individual: false,
            will_be_lightmapped: false,
            can_gpu_instance: true,
            is_decorative: false,
            micro_triangles: 300,
            min_repeat: 10,
            min_triangles: 800,
            min_triangles_lightmapped: 1500,
            heavy_triangles: 5000,
            heavy_min_repeat: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstancingStrategy {
    config: StrategyConfig,
}

impl InstancingStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Decide for a group of `group_size` members (prototype included) whose
    /// prototype has `triangle_count` triangles
    pub fn evaluate(&self, group_size: usize, triangle_count: usize) -> StrategyType {
        let c = &self.config;
        if c.needs_individual {
            return StrategyType::KeepSeparate;
        }
        if !c.is_static {
            return if c.can_gpu_instance {
                StrategyType::Instance
            } else {
                StrategyType::KeepSeparate
            };
        }

        if triangle_count < c.micro_triangles {
            return if group_size >= c.min_repeat {
                if c.is_decorative {
                    StrategyType::Bake
                } else {
                    StrategyType::Combine
                }
            } else if group_size > 1 {
                StrategyType::Combine
            } else {
                StrategyType::KeepSeparate
            };
        }

        if !c.can_gpu_instance {
            return StrategyType::Combine;
        }

        let min_triangles = if c.will_be_lightmapped {
            c.min_triangles_lightmapped
        } else {
            c.min_triangles
        };
        if triangle_count >= min_triangles && group_size >= c.min_repeat {
            return StrategyType::Instance;
        }
        if triangle_count >= c.heavy_triangles && group_size >= c.heavy_min_repeat {
            return StrategyType::Instance;
        }
        StrategyType::Combine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(f: impl FnOnce(&mut StrategyConfig)) -> InstancingStrategy {
        let mut config = StrategyConfig::default();
        f(&mut config);
        InstancingStrategy::new(config)
    }

    #[test]
    fn test_hard_overrides() {
        let individual = strategy(|c| c.needs_individual = true);
        assert_eq!(individual.evaluate(100, 10_000), StrategyType::KeepSeparate);

        let dynamic = strategy(|c| c.is_static = false);
        assert_eq!(dynamic.evaluate(1, 12), StrategyType::Instance);

        let dynamic_no_gpu = strategy(|c| {
            c.is_static = false;
            c.can_gpu_instance = false;
        });
        assert_eq!(dynamic_no_gpu.evaluate(50, 12), StrategyType::KeepSeparate);
    }

    #[test]
    fn test_micro_geometry() {
        let s = InstancingStrategy::default();
        assert_eq!(s.evaluate(1, 12), StrategyType::KeepSeparate);
        assert_eq!(s.evaluate(2, 12), StrategyType::Combine);
        assert_eq!(s.evaluate(10, 299), StrategyType::Combine);

        let decorative = strategy(|c| c.is_decorative = true);
        assert_eq!(decorative.evaluate(10, 12), StrategyType::Bake);
        assert_eq!(decorative.evaluate(9, 12), StrategyType::Combine);
    }

    #[test]
    fn test_macro_geometry_thresholds() {
        let s = InstancingStrategy::default();
        assert_eq!(s.evaluate(10, 800), StrategyType::Instance);
        assert_eq!(s.evaluate(9, 800), StrategyType::Combine);
        assert_eq!(s.evaluate(10, 799), StrategyType::Combine);
        assert_eq!(s.evaluate(3, 5000), StrategyType::Instance);
        assert_eq!(s.evaluate(2, 5000), StrategyType::Combine);

        let lightmapped = strategy(|c| c.will_be_lightmapped = true);
        assert_eq!(lightmapped.evaluate(10, 800), StrategyType::Combine);
        assert_eq!(lightmapped.evaluate(10, 1500), StrategyType::Instance);

        let no_gpu = strategy(|c| c.can_gpu_instance = false);
        assert_eq!(no_gpu.evaluate(50, 10_000), StrategyType::Combine);
    }
}

//! The instancing orchestrator
//!
//! A run works in phases over a snapshot of the selected nodes:
//!
//! 1. optionally split combined meshes into shells and regroup the shells
//!    into assemblies, optionally merging each assembly's core parts;
//! 2. canonicalize leaf meshes so signatures do not depend on pose;
//! 3. bucket candidates by signature and extract instance groups;
//! 4. ask the [`InstancingStrategy`] about every group and replace the
//!    members of accepted groups with instances of the prototype.
//!
//! A failed scene call skips the node or group it was made for; the run
//! itself always completes.

use crate::config::AutoInstancerConfig;
use crate::reassembly::{canonicalize_leaf_meshes, combine_cores, reassemble};
use crate::separator::AssemblySeparator;
use crate::snapshot::{snapshot_leaf, snapshot_tree, FragmentCache};
use autoinstance_algorithms::{
    AssemblyClusterer, GeometryMatcher, GroupingMode, InstanceGroup, InstanceMember, InstancingStrategy,
    StrategyType,
};
use autoinstance_core::{NodeId, NodeSnapshot, Result, SceneGraph};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Which grouping pass produced a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Candidates are the run's top-level nodes, or every leaf mesh
    Primary,
    /// Leaf meshes left over after assembly-level instancing
    Leaf,
}

/// What happened to one instance group
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub prototype: NodeId,
    /// Prototype plus members
    pub size: usize,
    pub triangle_count: usize,
    pub strategy: StrategyType,
    pub pass: Pass,
    /// Nodes created to replace members; empty when the group was not instanced
    pub instances: Vec<NodeId>,
}

/// Summary of an [`AutoInstancer::run`]
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Top-level nodes after the run, with replaced members swapped for their instances
    pub nodes: Vec<NodeId>,
    /// Assemblies found while reassembling separated shells
    pub assemblies: usize,
    /// Every group with more than one node, in processing order
    pub groups: Vec<GroupOutcome>,
    pub instances_created: usize,
    /// Pairwise geometry comparisons executed
    pub comparisons: usize,
}

impl RunReport {
    /// Groups whose members were replaced by instances
    pub fn instanced_groups(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.groups.iter().filter(|g| !g.instances.is_empty())
    }
}

/// Finds repeated geometry in a scene and turns the repeats into instances
pub struct AutoInstancer {
    config: AutoInstancerConfig,
    matcher: GeometryMatcher,
    strategy: InstancingStrategy,
    clusterer: AssemblyClusterer,
    separator: AssemblySeparator,
}

impl AutoInstancer {
    pub fn new(config: AutoInstancerConfig) -> Self {
        Self {
            matcher: GeometryMatcher::new(config.matcher()),
            strategy: InstancingStrategy::new(config.strategy()),
            clusterer: AssemblyClusterer::new(&config.clustering()),
            separator: AssemblySeparator::new(),
            config,
        }
    }

    /// Replace the configured assembly clusterer
    pub fn with_clusterer(mut self, clusterer: AssemblyClusterer) -> Self {
        self.clusterer = clusterer;
        self
    }

    pub fn config(&self) -> &AutoInstancerConfig {
        &self.config
    }

    pub fn matcher(&self) -> &GeometryMatcher {
        &self.matcher
    }

    /// Process the selected nodes, or the whole scene when `selection` is `None`
    pub fn run<S: SceneGraph + ?Sized>(&self, scene: &mut S, selection: Option<&[NodeId]>) -> RunReport {
        self.matcher.reset_comparison_count();
        let mut cache = FragmentCache::new();
        let mut report = RunReport::default();

        let enumerated = scene.enumerate(selection);
        let mut roots = top_most(scene, &enumerated);
        log::info!("auto-instancing {} top-level node(s)", roots.len());

        let mut mode = if self.config.check_hierarchy {
            GroupingMode::Hierarchy
        } else {
            GroupingMode::Leaf
        };

        if self.config.separate_combined {
            roots = self.separator.separate_all(scene, &roots, &mut cache);
            let reassembly = reassemble(scene, &roots, &self.clusterer, &mut cache);
            report.assemblies = reassembly.assemblies.len();
            roots = reassembly.nodes;

            if self.config.combine_assemblies {
                let groups: HashSet<NodeId> = reassembly.groups.iter().copied().collect();
                let mut loose: Vec<NodeId> = roots.into_iter().filter(|n| !groups.contains(n)).collect();
                loose.extend(combine_cores(scene, &self.matcher, &reassembly.groups, &mut cache));
                roots = loose;
                mode = GroupingMode::Leaf;
            } else {
                mode = GroupingMode::Hierarchy;
            }
            canonicalize_leaf_meshes(scene, &roots, &mut cache);
        } else if self.config.canonicalize_leaves {
            canonicalize_leaf_meshes(scene, &roots, &mut cache);
        }

        let candidates = match mode {
            GroupingMode::Leaf => mesh_nodes_below(scene, &roots, &HashSet::new(), &mut cache),
            GroupingMode::Hierarchy => roots.clone(),
        };
        let groups = self.find_instance_groups(scene, &candidates, mode, &mut cache);
        let primary = self.process_groups(scene, groups, mode, Pass::Primary, &mut report);
        cache.invalidate();

        roots = roots
            .into_iter()
            .map(|n| primary.replacements.get(&n).copied().unwrap_or(n))
            .collect();

        if self.config.separate_combined && !self.config.combine_assemblies {
            log::info!("instancing leaf geometry left after assembly instancing");
            let leaves = mesh_nodes_below(scene, &roots, &primary.processed, &mut cache);
            let groups = self.find_instance_groups(scene, &leaves, GroupingMode::Leaf, &mut cache);
            self.process_groups(scene, groups, GroupingMode::Leaf, Pass::Leaf, &mut report);
            cache.invalidate();
        }

        report.nodes = roots;
        report.comparisons = self.matcher.comparison_count();
        log::info!(
            "auto-instancing finished: {} group(s), {} instance(s) created, {} comparison(s)",
            report.groups.len(),
            report.instances_created,
            report.comparisons
        );
        report
    }

    /// Snapshot `nodes` and split them into instance groups
    ///
    /// In leaf mode every node with geometry is a candidate; in hierarchy
    /// mode every node whose subtree holds geometry is. Nodes that cannot be
    /// read are logged and left out.
    pub fn find_instance_groups<S: SceneGraph + ?Sized>(
        &self,
        scene: &S,
        nodes: &[NodeId],
        mode: GroupingMode,
        cache: &mut FragmentCache,
    ) -> Vec<InstanceGroup> {
        let mut candidates: Vec<NodeSnapshot> = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let snapshot = match mode {
                GroupingMode::Leaf => snapshot_leaf(scene, node, cache),
                GroupingMode::Hierarchy => snapshot_tree(scene, node, cache)
                    .map(|tree| Some(tree).filter(|t| !t.geometry_keys().is_empty())),
            };
            match snapshot {
                Ok(Some(snapshot)) => candidates.push(snapshot),
                Ok(None) => log::debug!("{node} has no geometry to compare"),
                Err(e) => log::warn!("skipping candidate {node}: {e}"),
            }
        }
        let groups = autoinstance_algorithms::find_instance_groups(&self.matcher, candidates, mode);
        log::debug!("{} candidate(s) fell into {} group(s)", nodes.len(), groups.len());
        groups
    }

    fn accepts(&self, strategy: StrategyType, pass: Pass) -> bool {
        match strategy {
            StrategyType::Instance => true,
            StrategyType::Combine => pass == Pass::Leaf || self.config.instance_combine_groups,
            StrategyType::Bake | StrategyType::KeepSeparate => false,
        }
    }

    fn process_groups<S: SceneGraph + ?Sized>(
        &self,
        scene: &mut S,
        mut groups: Vec<InstanceGroup>,
        mode: GroupingMode,
        pass: Pass,
        report: &mut RunReport,
    ) -> Materialized {
        groups.sort_by_key(|g| g.prototype.depth);
        let mut materialized = Materialized::default();

        for group in groups.iter().filter(|g| !g.members.is_empty()) {
            let strategy = self.strategy.evaluate(group.size(), group.triangle_count());
            let mut outcome = GroupOutcome {
                prototype: group.prototype.node,
                size: group.size(),
                triangle_count: group.triangle_count(),
                strategy,
                pass,
                instances: Vec::new(),
            };
            if !self.accepts(strategy, pass) {
                log::info!(
                    "not instancing '{}' ({strategy:?}, {} copies)",
                    group.prototype.name,
                    group.size()
                );
                report.groups.push(outcome);
                continue;
            }

            materialized.processed.insert(group.prototype.node);
            let prototype_keys = group.prototype.geometry_keys().into_iter().sorted().collect_vec();
            for member in &group.members {
                let original = member.snapshot.node;
                if member.snapshot.geometry_keys().into_iter().sorted().collect_vec() == prototype_keys {
                    log::debug!("{original} already shares the geometry of {}", group.prototype.node);
                    materialized.processed.insert(original);
                    continue;
                }
                match instantiate(scene, group.prototype.node, member, mode) {
                    Ok(instance) => {
                        materialized.replacements.insert(original, instance);
                        materialized.processed.insert(instance);
                        outcome.instances.push(instance);
                    }
                    Err(e) => log::warn!(
                        "could not instance {} onto {original}: {e}",
                        group.prototype.node
                    ),
                }
            }
            log::info!(
                "'{}': {} instance(s) created ({strategy:?})",
                group.prototype.name,
                outcome.instances.len()
            );
            report.instances_created += outcome.instances.len();
            report.groups.push(outcome);
        }
        materialized
    }
}

impl Default for AutoInstancer {
    fn default() -> Self {
        Self::new(AutoInstancerConfig::default())
    }
}

/// Bookkeeping from one materialization pass
#[derive(Debug, Default)]
struct Materialized {
    /// Member node to the instance that replaced it
    replacements: HashMap<NodeId, NodeId>,
    /// Prototypes, instances and members that already shared geometry
    processed: HashSet<NodeId>,
}

/// Replace `member` with a new node drawing the prototype's geometry
///
/// The new node takes the member's name and parent. In leaf mode the member's
/// children move under it; in hierarchy mode the prototype's subtree is
/// mirrored beneath it instead.
fn instantiate<S: SceneGraph + ?Sized>(
    scene: &mut S,
    prototype: NodeId,
    member: &InstanceMember,
    mode: GroupingMode,
) -> Result<NodeId> {
    let original = member.snapshot.node;
    let instance = scene.duplicate_placement_only(original)?;
    let mut adopted = Vec::new();
    if let Err(e) = adopt(scene, prototype, member, instance, mode, &mut adopted) {
        for child in adopted {
            if let Err(cleanup) = scene.reparent(child, Some(original)) {
                log::warn!("could not return {child} to {original}: {cleanup}");
            }
        }
        if let Err(cleanup) = scene.delete(instance) {
            log::warn!("could not remove unfinished instance {instance}: {cleanup}");
        }
        return Err(e);
    }
    Ok(instance)
}

fn adopt<S: SceneGraph + ?Sized>(
    scene: &mut S,
    prototype: NodeId,
    member: &InstanceMember,
    instance: NodeId,
    mode: GroupingMode,
    adopted: &mut Vec<NodeId>,
) -> Result<()> {
    let original = member.snapshot.node;
    scene.set_world_matrix(instance, InstanceGroup::instance_world_matrix(member))?;
    match mode {
        GroupingMode::Leaf => {
            scene.share_geometry(prototype, instance)?;
            for child in scene.children(original)? {
                scene.reparent(child, Some(instance))?;
                adopted.push(child);
            }
        }
        GroupingMode::Hierarchy => mirror_subtree(scene, prototype, instance)?,
    }
    scene.delete(original)?;
    scene.rename(instance, &member.snapshot.name)
}

/// Share the geometry of `from` and of every node below it onto `onto`,
/// recreating the child placements
fn mirror_subtree<S: SceneGraph + ?Sized>(scene: &mut S, from: NodeId, onto: NodeId) -> Result<()> {
    scene.share_geometry(from, onto)?;
    let placement = scene.world_matrix(onto)?;
    for child in scene.children(from)? {
        let mirror = scene.duplicate_placement_only(child)?;
        scene.reparent(mirror, Some(onto))?;
        scene.set_world_matrix(mirror, placement * scene.local_matrix(child)?)?;
        mirror_subtree(scene, child, mirror)?;
    }
    Ok(())
}

/// Nodes none of whose ancestors are in `nodes`, in input order
fn top_most<S: SceneGraph + ?Sized>(scene: &S, nodes: &[NodeId]) -> Vec<NodeId> {
    let set: HashSet<NodeId> = nodes.iter().copied().collect();
    nodes
        .iter()
        .copied()
        .unique()
        .filter(|&node| {
            let mut current = node;
            while let Ok(Some(parent)) = scene.parent(current) {
                if set.contains(&parent) {
                    return false;
                }
                current = parent;
            }
            true
        })
        .collect()
}

/// Mesh nodes in the subtrees of `roots` (depth first), not descending into `skip`
fn mesh_nodes_below<S: SceneGraph + ?Sized>(
    scene: &S,
    roots: &[NodeId],
    skip: &HashSet<NodeId>,
    cache: &mut FragmentCache,
) -> Vec<NodeId> {
    let mut meshes = Vec::new();
    let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        if skip.contains(&node) {
            continue;
        }
        match cache.fragment(scene, node) {
            Ok(Some(_)) => meshes.push(node),
            Ok(None) => {}
            Err(e) => {
                log::warn!("skipping {node}: {e}");
                continue;
            }
        }
        match scene.children(node) {
            Ok(children) => stack.extend(children.into_iter().rev()),
            Err(e) => log::warn!("cannot list children of {node}: {e}"),
        }
    }
    meshes
}

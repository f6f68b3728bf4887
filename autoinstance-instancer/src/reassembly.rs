//! Rebuilding assemblies in the scene from clustered shells, and the
//! placement clean-up that prepares meshes for comparison

use crate::snapshot::FragmentCache;
use autoinstance_algorithms::{Assembly, AssemblyClusterer, GeometryMatcher, PrincipalAxes, ShellInfo};
use autoinstance_core::{centroid, NodeId, Result, SceneGraph, Transform3D};
use std::collections::{BTreeSet, HashMap};

/// Name prefix of the group nodes created for assemblies
pub const ASSEMBLY_PREFIX: &str = "Assembly_";

/// Outcome of [`reassemble`]
#[derive(Debug, Clone, Default)]
pub struct Reassembly {
    /// Assembly groups, loose singleton shells and untouched non-mesh nodes
    pub nodes: Vec<NodeId>,
    /// Every assembly found, singletons included
    pub assemblies: Vec<Assembly>,
    /// Group nodes created for multi-member assemblies
    pub groups: Vec<NodeId>,
}

/// Cluster the mesh nodes among `nodes` and parent every multi-member
/// assembly under a new group at its centroid, oriented like its root
pub fn reassemble<S: SceneGraph + ?Sized>(
    scene: &mut S,
    nodes: &[NodeId],
    clusterer: &AssemblyClusterer,
    cache: &mut FragmentCache,
) -> Reassembly {
    let mut result = Reassembly::default();
    let mut shells = Vec::new();
    for &node in nodes {
        match cache.fragment(scene, node) {
            Ok(Some(fragment)) => shells.push(ShellInfo::from_fragment(&fragment)),
            Ok(None) => result.nodes.push(node),
            Err(e) => log::warn!("skipping {node} during reassembly: {e}"),
        }
    }

    result.assemblies = clusterer.cluster(&shells);
    for assembly in &result.assemblies {
        if assembly.is_singleton() {
            result.nodes.push(assembly.root);
            continue;
        }
        let name = format!("{ASSEMBLY_PREFIX}{}", result.groups.len() + 1);
        match materialize(scene, assembly, &name) {
            Ok(group) => {
                result.nodes.push(group);
                result.groups.push(group);
            }
            Err(e) => {
                log::warn!("could not build assembly around {}: {e}", assembly.root);
                result.nodes.extend(assembly.members());
            }
        }
    }
    log::info!(
        "reassembled {} shell(s) into {} assembly group(s)",
        shells.len(),
        result.groups.len()
    );
    cache.invalidate();
    result
}

fn materialize<S: SceneGraph + ?Sized>(scene: &mut S, assembly: &Assembly, name: &str) -> Result<NodeId> {
    let rotation = scene.world_matrix(assembly.root)?.rotation_part();
    let group = scene.create_group(name, assembly.centroid, rotation)?;
    for member in assembly.members() {
        scene.reparent(member, Some(group))?;
    }
    Ok(group)
}

/// Merge the "core" of every assembly group into one mesh
///
/// A relaxed signature (vertex, edge and face counts) is core when it occurs
/// in more than half of the groups. Each group's core members are combined and
/// canonicalized; the other members are moved to the scene root, and groups
/// left empty are deleted. Returns the resulting loose nodes.
pub fn combine_cores<S: SceneGraph + ?Sized>(
    scene: &mut S,
    matcher: &GeometryMatcher,
    groups: &[NodeId],
    cache: &mut FragmentCache,
) -> Vec<NodeId> {
    type Relaxed = (usize, usize, usize);

    let mut members: Vec<(NodeId, Vec<(NodeId, Relaxed)>)> = Vec::with_capacity(groups.len());
    for &group in groups {
        let children = match scene.children(group) {
            Ok(children) => children,
            Err(e) => {
                log::warn!("skipping assembly {group}: {e}");
                continue;
            }
        };
        let meshes = children
            .into_iter()
            .filter_map(|child| match cache.fragment(scene, child) {
                Ok(fragment) => fragment.map(|f| (child, matcher.signature(&f).topology())),
                Err(e) => {
                    log::warn!("skipping {child} of assembly {group}: {e}");
                    None
                }
            })
            .collect();
        members.push((group, meshes));
    }

    let mut occurrences: HashMap<Relaxed, usize> = HashMap::new();
    for (_, meshes) in &members {
        let distinct: BTreeSet<Relaxed> = meshes.iter().map(|&(_, sig)| sig).collect();
        for sig in distinct {
            *occurrences.entry(sig).or_default() += 1;
        }
    }
    let threshold = members.len() / 2 + 1;

    let mut result = Vec::new();
    for (group, meshes) in members {
        let (core, rest): (Vec<_>, Vec<_>) = meshes
            .into_iter()
            .partition(|(_, sig)| occurrences.get(sig).copied().unwrap_or(0) >= threshold);
        let core: Vec<NodeId> = core.into_iter().map(|(n, _)| n).collect();
        let rest: Vec<NodeId> = rest.into_iter().map(|(n, _)| n).collect();

        match combine_group(scene, group, &core, &rest) {
            Ok(nodes) => result.extend(nodes),
            Err(e) => {
                log::warn!("could not combine assembly {group}: {e}");
                result.push(group);
            }
        }
    }
    cache.invalidate();
    result
}

fn combine_group<S: SceneGraph + ?Sized>(
    scene: &mut S,
    group: NodeId,
    core: &[NodeId],
    rest: &[NodeId],
) -> Result<Vec<NodeId>> {
    let mut nodes = Vec::with_capacity(1 + rest.len());
    if !core.is_empty() {
        let name = format!("{}_combined", scene.node_name(group)?);
        let combined = match core {
            [single] => {
                scene.reparent(*single, None)?;
                scene.rename(*single, &name)?;
                *single
            }
            _ => scene.combine_shells(core, &name)?,
        };
        if let Err(e) = canonicalize(scene, combined) {
            log::warn!("could not canonicalize {combined}: {e}");
        }
        nodes.push(combined);
    }
    for &node in rest {
        scene.reparent(node, None)?;
        nodes.push(node);
    }
    if scene.children(group)?.is_empty() {
        scene.delete(group)?;
    }
    Ok(nodes)
}

/// Re-place a mesh node at its vertex centroid, oriented along the principal
/// axes of its world-space geometry (x major, z = x × y); geometry stays put
pub fn canonicalize<S: SceneGraph + ?Sized>(scene: &mut S, node: NodeId) -> Result<()> {
    let Some(fragment) = scene.mesh_data(node)? else {
        return Ok(());
    };
    let world = fragment.world_points();
    let Some(center) = centroid(&world) else {
        return Ok(());
    };
    let rotation = PrincipalAxes::compute(&world)
        .map(|axes| axes.rotation())
        .unwrap_or_else(|| fragment.world_matrix.rotation_part());
    scene.set_placement_preserving_geometry(node, Transform3D::from_translation_rotation(center.coords, rotation))
}

/// Canonicalize every mesh node among `nodes`, and the mesh children of
/// the ones without geometry; meshes already sharing geometry are left as they are
pub fn canonicalize_leaf_meshes<S: SceneGraph + ?Sized>(scene: &mut S, nodes: &[NodeId], cache: &mut FragmentCache) {
    let mut targets = Vec::new();
    for &node in nodes {
        match cache.fragment(scene, node) {
            Ok(Some(fragment)) => {
                if !fragment.is_instanced {
                    targets.push(node);
                }
            }
            Ok(None) => match scene.children(node) {
                Ok(children) => targets.extend(children.into_iter().filter(|&c| {
                    matches!(cache.fragment(scene, c), Ok(Some(f)) if !f.is_instanced)
                })),
                Err(e) => log::warn!("cannot list children of {node}: {e}"),
            },
            Err(e) => log::warn!("skipping {node} during canonicalization: {e}"),
        }
    }
    for node in targets {
        if let Err(e) = canonicalize(scene, node) {
            log::warn!("could not canonicalize {node}: {e}");
        }
    }
    cache.invalidate();
}

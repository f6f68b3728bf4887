//! In-process reference implementation of [`SceneGraph`]
//!
//! Nodes form a forest of transforms. A node may reference one polygon mesh
//! from a geometry store; several nodes referencing the same entry are
//! instances of each other. Geometry nobody references is dropped.

use autoinstance_core::{
    BoundingBox, Error, GeometryKey, MaterialToken, MeshFragment, NodeId, Point3d, Result,
    SceneGraph, Transform3D, UvSet,
};
use itertools::Itertools;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Polygon mesh in object space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub points: Vec<Point3d>,
    /// Polygons as loops of vertex indices
    pub faces: Vec<Vec<usize>>,
    /// One material per face
    pub face_materials: Vec<MaterialToken>,
    /// Per-vertex texture coordinates
    pub uv_sets: Vec<UvSet>,
}

pub const DEFAULT_MATERIAL: &str = "default";

impl MeshData {
    pub fn new(points: Vec<Point3d>, faces: Vec<Vec<usize>>) -> Self {
        let face_materials = vec![MaterialToken::new(DEFAULT_MATERIAL); faces.len()];
        Self {
            points,
            faces,
            face_materials,
            uv_sets: Vec::new(),
        }
    }

    /// Axis-aligned box centred on the origin: 8 vertices, 6 quads
    pub fn cuboid(sx: f64, sy: f64, sz: f64) -> Self {
        let (hx, hy, hz) = (sx / 2.0, sy / 2.0, sz / 2.0);
        let points = vec![
            Point3d::new(-hx, -hy, -hz),
            Point3d::new(hx, -hy, -hz),
            Point3d::new(hx, hy, -hz),
            Point3d::new(-hx, hy, -hz),
            Point3d::new(-hx, -hy, hz),
            Point3d::new(hx, -hy, hz),
            Point3d::new(hx, hy, hz),
            Point3d::new(-hx, hy, hz),
        ];
        let faces = vec![
            vec![0, 3, 2, 1],
            vec![4, 5, 6, 7],
            vec![0, 1, 5, 4],
            vec![1, 2, 6, 5],
            vec![2, 3, 7, 6],
            vec![3, 0, 4, 7],
        ];
        Self::new(points, faces)
    }

    /// Right-angled wedge with its bounding box centred on the origin: the
    /// right-triangle cross-section (legs `sx` along x, `sz` along z) is
    /// extruded by `sy` along y. 6 vertices, 2 triangles and 3 quads.
    pub fn wedge(sx: f64, sy: f64, sz: f64) -> Self {
        let (hx, hy, hz) = (sx / 2.0, sy / 2.0, sz / 2.0);
        let points = vec![
            Point3d::new(-hx, -hy, -hz),
            Point3d::new(hx, -hy, -hz),
            Point3d::new(-hx, -hy, hz),
            Point3d::new(-hx, hy, -hz),
            Point3d::new(hx, hy, -hz),
            Point3d::new(-hx, hy, hz),
        ];
        let faces = vec![
            vec![0, 2, 1],
            vec![3, 4, 5],
            vec![0, 1, 4, 3],
            vec![1, 2, 5, 4],
            vec![2, 0, 3, 5],
        ];
        Self::new(points, faces)
    }

    /// Corner tetrahedron with legs of length `size` along the axes from the origin
    pub fn tetrahedron(size: f64) -> Self {
        let points = vec![
            Point3d::origin(),
            Point3d::new(size, 0.0, 0.0),
            Point3d::new(0.0, size, 0.0),
            Point3d::new(0.0, 0.0, size),
        ];
        let faces = vec![vec![0, 2, 1], vec![0, 1, 3], vec![0, 3, 2], vec![1, 2, 3]];
        Self::new(points, faces)
    }

    pub fn with_material(mut self, name: &str) -> Self {
        self.face_materials = vec![MaterialToken::new(name); self.faces.len()];
        self
    }

    pub fn with_uv_set(mut self, name: &str, coords: Vec<[f64; 2]>) -> Self {
        self.uv_sets.push(UvSet {
            name: name.to_string(),
            coords,
        });
        self
    }

    pub fn transformed(&self, transform: &Transform3D) -> Self {
        Self {
            points: transform.transform_points(&self.points),
            ..self.clone()
        }
    }

    /// Concatenate several meshes into one, keeping each part as its own shell
    pub fn merge(parts: &[MeshData]) -> Self {
        let mut merged = Self::new(Vec::new(), Vec::new());
        let mut uv_sets: BTreeMap<String, Vec<[f64; 2]>> = BTreeMap::new();
        for part in parts {
            let offset = merged.points.len();
            for set in &part.uv_sets {
                let coords = uv_sets.entry(set.name.clone()).or_default();
                coords.resize(offset, [0.0, 0.0]);
                coords.extend(set.coords.iter().take(part.points.len()));
            }
            merged.points.extend_from_slice(&part.points);
            merged
                .faces
                .extend(part.faces.iter().map(|f| f.iter().map(|&v| v + offset).collect()));
            merged.face_materials.extend_from_slice(&part.face_materials);
        }
        let total = merged.points.len();
        merged.uv_sets = uv_sets
            .into_iter()
            .map(|(name, mut coords)| {
                coords.resize(total, [0.0, 0.0]);
                UvSet { name, coords }
            })
            .collect();
        merged
    }

    /// Number of distinct undirected edges
    pub fn edge_count(&self) -> usize {
        self.faces
            .iter()
            .flat_map(|face| face.iter().circular_tuple_windows::<(_, _)>())
            .map(|(&a, &b)| (a.min(b), a.max(b)))
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn triangle_count(&self) -> usize {
        self.faces.iter().map(|f| f.len().saturating_sub(2)).sum()
    }

    /// Face indices of every connected shell, in order of first face
    pub fn shells(&self) -> Vec<Vec<usize>> {
        let mut sets = DisjointSets::new(self.points.len());
        for face in &self.faces {
            for (&a, &b) in face.iter().tuple_windows() {
                sets.union(a, b);
            }
        }
        let mut shells: Vec<Vec<usize>> = Vec::new();
        let mut shell_of_root: HashMap<usize, usize> = HashMap::new();
        for (f, face) in self.faces.iter().enumerate() {
            let Some(&first) = face.first() else { continue };
            let root = sets.find(first);
            let index = *shell_of_root.entry(root).or_insert_with(|| {
                shells.push(Vec::new());
                shells.len() - 1
            });
            shells[index].push(f);
        }
        shells
    }

    pub fn shell_count(&self) -> usize {
        self.shells().len()
    }

    /// A new mesh made of the given faces; used vertices keep their relative order
    pub fn extract(&self, faces: &[usize]) -> Self {
        let used: BTreeSet<usize> = faces.iter().flat_map(|&f| self.faces[f].iter().copied()).collect();
        let remap: HashMap<usize, usize> = used.iter().enumerate().map(|(new, &old)| (old, new)).collect();

        let points = used.iter().map(|&old| self.points[old]).collect();
        let uv_sets = self
            .uv_sets
            .iter()
            .filter(|set| set.coords.len() == self.points.len())
            .map(|set| UvSet {
                name: set.name.clone(),
                coords: used.iter().map(|&old| set.coords[old]).collect(),
            })
            .collect();
        Self {
            points,
            faces: faces
                .iter()
                .map(|&f| self.faces[f].iter().map(|v| remap[v]).collect())
                .collect(),
            face_materials: faces
                .iter()
                .filter_map(|&f| self.face_materials.get(f).cloned())
                .collect(),
            uv_sets,
        }
    }

    /// Sorted, de-duplicated materials
    pub fn materials(&self) -> Vec<MaterialToken> {
        self.face_materials.iter().cloned().sorted().dedup().collect()
    }
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Transform3D,
    geometry: Option<GeometryKey>,
}

/// A scene graph held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    nodes: BTreeMap<NodeId, SceneNode>,
    geometries: HashMap<GeometryKey, MeshData>,
    next_node: u64,
    next_geometry: u64,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node drawing `mesh`, placed at `local` under `parent`
    pub fn add_mesh(
        &mut self,
        name: &str,
        mesh: MeshData,
        local: Transform3D,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        if let Some(p) = parent {
            self.node(p)?;
        }
        let key = self.store_geometry(mesh);
        Ok(self.insert(name, parent, local, Some(key)))
    }

    /// Add an empty transform node
    pub fn add_group(&mut self, name: &str, local: Transform3D, parent: Option<NodeId>) -> Result<NodeId> {
        if let Some(p) = parent {
            self.node(p)?;
        }
        Ok(self.insert(name, parent, local, None))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(&id, _)| id)
            .collect()
    }

    /// First node with the given name, in creation order
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(&id, _)| id)
    }

    pub fn geometry(&self, node: NodeId) -> Option<&MeshData> {
        let key = self.nodes.get(&node)?.geometry?;
        self.geometries.get(&key)
    }

    pub fn geometry_key(&self, node: NodeId) -> Option<GeometryKey> {
        self.nodes.get(&node)?.geometry
    }

    /// Number of distinct meshes stored
    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    /// Every node drawing a mesh, depth first
    pub fn mesh_nodes(&self) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.geometry.is_some()))
            .collect()
    }

    /// Number of nodes drawing the given geometry
    pub fn users(&self, key: GeometryKey) -> usize {
        self.nodes.values().filter(|n| n.geometry == Some(key)).count()
    }

    fn node(&self, id: NodeId) -> Result<&SceneNode> {
        self.nodes.get(&id).ok_or(Error::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode> {
        self.nodes.get_mut(&id).ok_or(Error::StaleNode(id))
    }

    fn insert(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        local: Transform3D,
        geometry: Option<GeometryKey>,
    ) -> NodeId {
        self.next_node += 1;
        let id = NodeId(self.next_node);
        self.nodes.insert(
            id,
            SceneNode {
                name: name.to_string(),
                parent,
                children: Vec::new(),
                local,
                geometry,
            },
        );
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.push(id);
        }
        id
    }

    fn store_geometry(&mut self, mesh: MeshData) -> GeometryKey {
        self.next_geometry += 1;
        let key = GeometryKey(self.next_geometry);
        self.geometries.insert(key, mesh);
        key
    }

    fn mesh_of(&self, id: NodeId) -> Result<&MeshData> {
        let key = self.node(id)?.geometry.ok_or(Error::NotAMesh(id))?;
        self.geometries
            .get(&key)
            .ok_or_else(|| Error::Scene(format!("geometry of {id} is missing from the store")))
    }

    fn parent_world(&self, parent: Option<NodeId>) -> Result<Transform3D> {
        match parent {
            Some(p) => self.world(p),
            None => Ok(Transform3D::identity()),
        }
    }

    fn world(&self, id: NodeId) -> Result<Transform3D> {
        let node = self.node(id)?;
        Ok(self.parent_world(node.parent)? * node.local)
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        while let Some(parent) = self.nodes.get(&node).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            node = parent;
        }
        false
    }

    fn detach(&mut self, id: NodeId) -> Result<()> {
        if let Some(parent) = self.node(id)?.parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|&c| c != id);
            }
        }
        Ok(())
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            if let Some(node) = self.nodes.get(&out[i]) {
                out.extend_from_slice(&node.children);
            }
            i += 1;
        }
        out
    }

    /// Depth-first pre-order over the whole forest
    fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots().into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    fn collect_garbage(&mut self) {
        let used: BTreeSet<GeometryKey> = self.nodes.values().filter_map(|n| n.geometry).collect();
        self.geometries.retain(|key, _| used.contains(key));
    }
}

impl SceneGraph for MemoryScene {
    fn enumerate(&self, selection: Option<&[NodeId]>) -> Vec<NodeId> {
        match selection {
            Some(nodes) => nodes.iter().copied().filter(|&n| self.contains(n)).collect(),
            None => self.walk(),
        }
    }

    fn mesh_data(&self, node: NodeId) -> Result<Option<MeshFragment>> {
        let entry = self.node(node)?;
        let Some(key) = entry.geometry else {
            return Ok(None);
        };
        let mesh = self.mesh_of(node)?;
        let world_matrix = self.world(node)?;
        let bounding_box = BoundingBox::from_points(&world_matrix.transform_points(&mesh.points))
            .unwrap_or_else(|| {
                let origin = world_matrix.transform_point(&Point3d::origin());
                BoundingBox::new(origin, origin)
            });

        Ok(Some(MeshFragment {
            node,
            name: entry.name.clone(),
            local_points: mesh.points.clone(),
            local_matrix: entry.local,
            world_matrix,
            vertex_count: mesh.points.len(),
            edge_count: mesh.edge_count(),
            face_count: mesh.faces.len(),
            triangle_count: mesh.triangle_count(),
            shell_count: mesh.shell_count(),
            bounding_box,
            materials: mesh.materials(),
            uv_sets: mesh.uv_sets.clone(),
            geometry: key,
            is_instanced: self.users(key) > 1,
        }))
    }

    fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(node)?.children.clone())
    }

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(node)?.parent)
    }

    fn node_name(&self, node: NodeId) -> Result<String> {
        Ok(self.node(node)?.name.clone())
    }

    fn rename(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.node_mut(node)?.name = name.to_string();
        Ok(())
    }

    fn local_matrix(&self, node: NodeId) -> Result<Transform3D> {
        Ok(self.node(node)?.local)
    }

    fn world_matrix(&self, node: NodeId) -> Result<Transform3D> {
        self.world(node)
    }

    fn set_world_matrix(&mut self, node: NodeId, matrix: Transform3D) -> Result<()> {
        let parent = self.node(node)?.parent;
        let inverse = self
            .parent_world(parent)?
            .inverse()
            .ok_or_else(|| Error::Scene(format!("parent of {node} has a singular placement")))?;
        self.node_mut(node)?.local = inverse * matrix;
        Ok(())
    }

    fn set_placement_preserving_geometry(&mut self, node: NodeId, matrix: Transform3D) -> Result<()> {
        let entry = self.node(node)?.clone();
        let new_inverse = matrix
            .inverse()
            .ok_or_else(|| Error::InvalidData(format!("singular placement requested for {node}")))?;
        let correction = new_inverse * self.world(node)?;

        if let Some(key) = entry.geometry {
            if self.users(key) > 1 {
                return Err(Error::Unsupported(format!(
                    "{node} shares its geometry; moving its pivot would move every instance"
                )));
            }
            if let Some(mesh) = self.geometries.get_mut(&key) {
                mesh.points = correction.transform_points(&mesh.points);
            }
        }
        for child in entry.children {
            let child = self.node_mut(child)?;
            child.local = correction * child.local;
        }
        self.set_world_matrix(node, matrix)
    }

    fn split_shells(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        let entry = self.node(node)?.clone();
        let mesh = self.mesh_of(node)?.clone();
        let shells = mesh.shells();
        if shells.len() <= 1 {
            return Ok(vec![node]);
        }

        let created: Vec<NodeId> = shells
            .iter()
            .enumerate()
            .map(|(i, faces)| {
                let key = self.store_geometry(mesh.extract(faces));
                self.insert(&format!("{}_{}", entry.name, i + 1), entry.parent, entry.local, Some(key))
            })
            .collect();
        for child in entry.children {
            self.reparent(child, entry.parent)?;
        }
        self.delete(node)?;
        Ok(created)
    }

    fn combine_shells(&mut self, nodes: &[NodeId], name: &str) -> Result<NodeId> {
        let nodes: Vec<NodeId> = nodes.iter().copied().unique().collect();
        if nodes.is_empty() {
            return Err(Error::InvalidData("nothing to combine".to_string()));
        }
        let parts = nodes
            .iter()
            .map(|&n| Ok(self.mesh_of(n)?.transformed(&self.world(n)?)))
            .collect::<Result<Vec<_>>>()?;

        let key = self.store_geometry(MeshData::merge(&parts));
        let combined = self.insert(name, None, Transform3D::identity(), Some(key));
        for &n in &nodes {
            for child in self.children(n)? {
                if !nodes.contains(&child) {
                    self.reparent(child, None)?;
                }
            }
        }
        for &n in &nodes {
            if self.contains(n) {
                self.delete(n)?;
            }
        }
        Ok(combined)
    }

    fn create_group(&mut self, name: &str, center: Point3d, rotation: UnitQuaternion<f64>) -> Result<NodeId> {
        let local = Transform3D::from_translation_rotation(center.coords, rotation);
        Ok(self.insert(name, None, local, None))
    }

    fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        if let Some(p) = parent {
            self.node(p)?;
            if p == node || self.is_ancestor(node, p) {
                return Err(Error::Scene(format!("cannot parent {node} under its own descendant {p}")));
            }
        }
        let world = self.world(node)?;
        let inverse = self
            .parent_world(parent)?
            .inverse()
            .ok_or_else(|| Error::Scene(format!("new parent of {node} has a singular placement")))?;

        self.detach(node)?;
        let entry = self.node_mut(node)?;
        entry.parent = parent;
        entry.local = inverse * world;
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.push(node);
        }
        Ok(())
    }

    fn delete(&mut self, node: NodeId) -> Result<()> {
        self.detach(node)?;
        for id in self.subtree(node) {
            self.nodes.remove(&id);
        }
        self.collect_garbage();
        Ok(())
    }

    fn duplicate_placement_only(&mut self, node: NodeId) -> Result<NodeId> {
        let entry = self.node(node)?.clone();
        Ok(self.insert(&entry.name, entry.parent, entry.local, None))
    }

    fn share_geometry(&mut self, from: NodeId, onto: NodeId) -> Result<()> {
        let geometry = self.node(from)?.geometry;
        self.node_mut(onto)?.geometry = geometry;
        self.collect_garbage();
        Ok(())
    }
}

//! Minimal scene graph for stage content.
//!
//! Nodes form a forest. Imported models arrive as a synthetic root with mesh
//! children; the loader re-parents the real mesh to the scene root and disposes the
//! rest. Ids are never reused, so a stale id simply stops resolving after disposal.

use glam::{Mat4, Quat, Vec3};
use rapier3d::prelude::RigidBodyHandle;

use super::stage::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }
}

/// Axis-aligned bounds in some local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: max.max(min) }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    pub fn transformed(&self, m: &Mat4) -> Self {
        Self::from_points(self.corners().map(|c| m.transform_point3(c)))
            .unwrap_or(*self)
    }

    /// Slab test. Returns the ray parameter of the entry point (0 when the origin is inside).
    pub fn ray_hit(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let (o, d, lo, hi) = (origin[axis], dir[axis], self.min[axis], self.max[axis]);
            if d.abs() < 1e-8 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                (a.min(b), a.max(b))
            };
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// Triangle mesh data in node-local space
#[derive(Debug, Clone)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub color: [f32; 4],
    pub bounds: Aabb,
}

impl Geometry {
    pub fn new(positions: Vec<[f32; 3]>, normals: Vec<[f32; 3]>, indices: Vec<u32>, color: [f32; 4]) -> Self {
        let bounds = Aabb::from_points(positions.iter().map(|p| Vec3::from_array(*p)))
            .unwrap_or(Aabb { min: Vec3::ZERO, max: Vec3::ZERO });
        Self { positions, normals, indices, color, bounds }
    }

    /// Box spanning `min..max`, 24 vertices so every face gets a flat normal
    pub fn cuboid(min: Vec3, max: Vec3, color: [f32; 4]) -> Self {
        const FACES: [([f32; 3], [usize; 4]); 6] = [
            ([1.0, 0.0, 0.0], [1, 3, 7, 5]),
            ([-1.0, 0.0, 0.0], [4, 6, 2, 0]),
            ([0.0, 1.0, 0.0], [2, 6, 7, 3]),
            ([0.0, -1.0, 0.0], [0, 1, 5, 4]),
            ([0.0, 0.0, 1.0], [4, 5, 7, 6]),
            ([0.0, 0.0, -1.0], [0, 2, 3, 1]),
        ];
        let corners = Aabb::new(min, max).corners();
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, quad) in FACES {
            let base = positions.len() as u32;
            for i in quad {
                positions.push(corners[i].to_array());
                normals.push(normal);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(positions, normals, indices, color)
    }
}

/// Stage bookkeeping attached to the node a placement produced
#[derive(Debug, Clone, PartialEq)]
pub struct StageObject {
    pub model_key: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub transform: Transform,
    pub geometry: Option<Geometry>,
    pub body: Option<RigidBodyHandle>,
    pub stage_object: Option<StageObject>,
    pub visible: bool,
}

impl SceneNode {
    fn new(name: &str, parent: Option<NodeId>, transform: Transform) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            transform,
            geometry: None,
            body: None,
            stage_object: None,
            visible: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Option<SceneNode>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str, parent: Option<NodeId>, transform: Transform) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(SceneNode::new(name, parent, transform)));
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.push(id);
        }
        id
    }

    pub fn add_mesh(&mut self, name: &str, parent: Option<NodeId>, transform: Transform, geometry: Geometry) -> NodeId {
        let id = self.add_node(name, parent, transform);
        if let Some(node) = self.get_mut(id) {
            node.geometry = Some(geometry);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i as u32), n)))
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let Some(node) = self.get(id) else {
            return Mat4::IDENTITY;
        };
        let local = node.transform.matrix();
        match node.parent {
            Some(parent) => self.world_matrix(parent) * local,
            None => local,
        }
    }

    /// Depth-first list of every node below `id` (excluding `id`)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .get(id)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn first_mesh_descendant(&self, id: NodeId) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|d| self.get(*d).is_some_and(|n| n.geometry.is_some()))
    }

    /// Move `id` under `new_parent` (or to the scene root) keeping its world transform
    pub fn set_parent(&mut self, id: NodeId, new_parent: Option<NodeId>) {
        if !self.contains(id) {
            return;
        }
        let world = self.world_matrix(id);
        let parent_world = new_parent.map(|p| self.world_matrix(p)).unwrap_or(Mat4::IDENTITY);
        let old_parent = self.get(id).and_then(|n| n.parent);

        if let Some(old) = old_parent.and_then(|p| self.get_mut(p)) {
            old.children.retain(|c| *c != id);
        }
        if let Some(parent) = new_parent.and_then(|p| self.get_mut(p)) {
            parent.children.push(id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = new_parent;
            node.transform = Transform::from_matrix(parent_world.inverse() * world);
        }
    }

    /// Remove `id` and its whole subtree. Returns the removed ids.
    pub fn dispose(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut removed = vec![id];
        removed.extend(self.descendants(id));

        if let Some(parent) = self.get(id).and_then(|n| n.parent) {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|c| *c != id);
            }
        }
        for r in &removed {
            if let Some(slot) = self.nodes.get_mut(r.0 as usize) {
                *slot = None;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn world_bounds(&self, id: NodeId) -> Option<Aabb> {
        let geometry = self.get(id)?.geometry.as_ref()?;
        Some(geometry.bounds.transformed(&self.world_matrix(id)))
    }

    /// Closest visible mesh hit by a world-space ray
    pub fn pick(&self, origin: Vec3, dir: Vec3) -> Option<(NodeId, f32)> {
        self.iter()
            .filter(|(_, n)| n.visible)
            .filter_map(|(id, n)| {
                let geometry = n.geometry.as_ref()?;
                let inv = self.world_matrix(id).inverse();
                let local_origin = inv.transform_point3(origin);
                let local_dir = inv.transform_vector3(dir);
                geometry.bounds.ray_hit(local_origin, local_dir).map(|t| (id, t))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

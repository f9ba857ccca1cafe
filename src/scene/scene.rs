//! The scene graph, stored in a `hecs` world.

use std::sync::Arc;

use glam::{Mat4, Vec4};
use hecs::{Entity, World};

use crate::mesh::{Aabb, Material, MeshData, Transform};

use super::environment::Environment;
use super::node::{Children, DirectionalLight, Light, Name, Parent, SceneNode};
use super::visitor::SceneVisitor;

/// One mesh to draw this frame.
#[derive(Clone, Debug)]
pub struct DrawItem {
    pub entity: Entity,
    pub mesh: Arc<MeshData>,
    pub material: Material,
    pub world: Mat4,
}

/// A transform hierarchy rooted at an implicit group node.
///
/// Every entity carries a [`Name`], a [`Transform`] and a [`SceneNode`].
/// Parent/child links are kept in both directions so whole subtrees can be
/// detached in one call.
pub struct Scene {
    world: World,
    root: Entity,
    pub environment: Environment,
    pub clear_color: Vec4,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut world = World::new();
        let root = world.spawn((
            Name("root".to_string()),
            Transform::new(),
            SceneNode::Group,
            Children::default(),
        ));
        Self {
            world,
            root,
            environment: Environment::None,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn root(&self) -> Entity {
        self.root
    }

    /// Adds a node under `parent`. Falls back to the root if `parent` has
    /// been removed.
    pub fn add(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
        node: SceneNode,
        transform: Transform,
    ) -> Entity {
        let parent = if self.contains(parent) {
            parent
        } else {
            self.root
        };
        let entity = self.world.spawn((
            Name(name.into()),
            transform,
            node,
            Parent(parent),
            Children::default(),
        ));
        if let Ok(mut children) = self.world.get::<&mut Children>(parent) {
            children.0.push(entity);
        }
        entity
    }

    pub fn add_group(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
        transform: Transform,
    ) -> Entity {
        self.add(parent, name, SceneNode::Group, transform)
    }

    pub fn add_mesh(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
        mesh: Arc<MeshData>,
        material: Material,
        transform: Transform,
    ) -> Entity {
        self.add(parent, name, SceneNode::mesh(mesh, material), transform)
    }

    pub fn add_light(&mut self, name: impl Into<String>, light: Light) -> Entity {
        self.add(self.root, name, SceneNode::Light(light), Transform::new())
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.contains(entity)
    }

    /// Number of nodes, not counting the root.
    pub fn node_count(&self) -> usize {
        self.world.len() as usize - 1
    }

    /// Removes `entity` and all of its descendants. Returns how many nodes
    /// were despawned. The root itself is never removed.
    pub fn remove(&mut self, entity: Entity) -> usize {
        if entity == self.root || !self.contains(entity) {
            return 0;
        }

        if let Ok(parent) = self.world.get::<&Parent>(entity).map(|p| p.0)
            && let Ok(mut children) = self.world.get::<&mut Children>(parent)
        {
            children.0.retain(|&c| c != entity);
        }

        let doomed = self.subtree(entity);
        for &e in &doomed {
            // Entities come from our own traversal, so despawn cannot miss.
            let _ = self.world.despawn(e);
        }
        doomed.len()
    }

    /// `entity` followed by its descendants in depth-first pre-order.
    pub fn subtree(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![entity];
        while let Some(e) = stack.pop() {
            if !self.contains(e) {
                continue;
            }
            out.push(e);
            if let Ok(children) = self.world.get::<&Children>(e) {
                stack.extend(children.0.iter().rev());
            }
        }
        out
    }

    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.world
            .get::<&Children>(entity)
            .map(|c| c.0.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.world.get::<&Parent>(entity).ok().map(|p| p.0)
    }

    pub fn name(&self, entity: Entity) -> Option<String> {
        self.world.get::<&Name>(entity).ok().map(|n| n.0.clone())
    }

    /// First node with the given name, in traversal order.
    pub fn find(&self, name: &str) -> Option<Entity> {
        self.subtree(self.root)
            .into_iter()
            .find(|&e| self.world.get::<&Name>(e).is_ok_and(|n| n.0 == name))
    }

    pub fn transform(&self, entity: Entity) -> Option<Transform> {
        self.world.get::<&Transform>(entity).ok().map(|t| *t)
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform) {
        if let Ok(mut t) = self.world.get::<&mut Transform>(entity) {
            *t = transform;
        }
    }

    pub fn node(&self, entity: Entity) -> Option<SceneNode> {
        self.world.get::<&SceneNode>(entity).ok().map(|n| (*n).clone())
    }

    /// Local-to-world matrix of `entity`.
    pub fn world_matrix(&self, entity: Entity) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(entity);
        while let Some(e) = current {
            if let Some(t) = self.transform(e) {
                matrix = t.matrix() * matrix;
            }
            current = self.parent(e);
        }
        matrix
    }

    /// Runs `visitor` over the subtree rooted at `start`.
    pub fn visit(&mut self, start: Entity, visitor: &mut impl SceneVisitor) {
        for entity in self.subtree(start) {
            if let Ok((name, node)) = self.world.query_one_mut::<(&Name, &mut SceneNode)>(entity) {
                visitor.visit(entity, &name.0, node);
            }
        }
    }

    /// Meshes with their world matrices, in traversal order.
    pub fn collect_draws(&self) -> Vec<DrawItem> {
        let mut draws = Vec::new();
        let mut stack = vec![(self.root, Mat4::IDENTITY)];
        while let Some((entity, parent_world)) = stack.pop() {
            let local = self.transform(entity).unwrap_or_default().matrix();
            let world = parent_world * local;
            if let Ok(node) = self.world.get::<&SceneNode>(entity)
                && let SceneNode::Mesh(mesh) = &*node
            {
                draws.push(DrawItem {
                    entity,
                    mesh: mesh.mesh.clone(),
                    material: mesh.material,
                    world,
                });
            }
            if let Ok(children) = self.world.get::<&Children>(entity) {
                stack.extend(children.0.iter().rev().map(|&c| (c, world)));
            }
        }
        draws
    }

    /// Directional lights with direction and target moved into world space.
    pub fn directional_lights(&self) -> Vec<DirectionalLight> {
        let mut lights = Vec::new();
        for (entity, node) in self.world.query::<&SceneNode>().iter() {
            if let SceneNode::Light(Light::Directional(light)) = node {
                let world = self.world_matrix(entity);
                lights.push(DirectionalLight {
                    direction: world.transform_vector3(light.direction).normalize_or_zero(),
                    target: world.transform_point3(light.target),
                    ..*light
                });
            }
        }
        lights
    }

    /// Sum of ambient light contributions.
    pub fn ambient_light(&self) -> glam::Vec3 {
        self.world
            .query::<&SceneNode>()
            .iter()
            .filter_map(|(_, node)| match node {
                SceneNode::Light(Light::Ambient { color, intensity }) => Some(*color * *intensity),
                _ => None,
            })
            .sum()
    }

    /// World-space bounds of every mesh under `entity`.
    pub fn bounds(&self, entity: Entity) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for e in self.subtree(entity) {
            if let Ok(node) = self.world.get::<&SceneNode>(e)
                && let SceneNode::Mesh(mesh) = &*node
            {
                aabb = aabb.union(mesh.mesh.bounds_in(self.world_matrix(e)));
            }
        }
        aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn cube() -> Arc<MeshData> {
        Arc::new(MeshData::cube())
    }

    #[test]
    fn remove_despawns_whole_subtree() {
        let mut scene = Scene::new();
        let group = scene.add_group(scene.root(), "group", Transform::new());
        let a = scene.add_mesh(group, "a", cube(), Material::default(), Transform::new());
        scene.add_mesh(a, "b", cube(), Material::default(), Transform::new());
        assert_eq!(scene.node_count(), 3);

        assert_eq!(scene.remove(group), 3);
        assert_eq!(scene.node_count(), 0);
        assert!(scene.children(scene.root()).is_empty());
        assert_eq!(scene.remove(group), 0);
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut scene = Scene::new();
        assert_eq!(scene.remove(scene.root()), 0);
        assert!(scene.contains(scene.root()));
    }

    #[test]
    fn world_matrix_composes_parents() {
        let mut scene = Scene::new();
        let group = scene.add_group(
            scene.root(),
            "group",
            Transform::from_position(Vec3::new(1.0, 0.0, 0.0)),
        );
        let child = scene.add_mesh(
            group,
            "child",
            cube(),
            Material::default(),
            Transform::from_position(Vec3::new(0.0, 2.0, 0.0)),
        );
        let p = scene.world_matrix(child).transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, 0.0));

        let draws = scene.collect_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].world, scene.world_matrix(child));
    }

    #[test]
    fn visitor_sees_names_in_preorder() {
        let mut scene = Scene::new();
        let g = scene.add_group(scene.root(), "g", Transform::new());
        scene.add_mesh(g, "m1", cube(), Material::default(), Transform::new());
        scene.add_mesh(g, "m2", cube(), Material::default(), Transform::new());

        let mut names = Vec::new();
        scene.visit(g, &mut |_: Entity, name: &str, _: &mut SceneNode| {
            names.push(name.to_string())
        });
        assert_eq!(names, vec!["g", "m1", "m2"]);
    }

    #[test]
    fn bounds_cover_translated_meshes() {
        let mut scene = Scene::new();
        scene.add_mesh(
            scene.root(),
            "m",
            cube(),
            Material::default(),
            Transform::from_position(Vec3::new(0.0, 10.0, 0.0)),
        );
        let b = scene.bounds(scene.root());
        assert_eq!(b.center(), Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn bounds_stay_tight_under_rotation() {
        use crate::mesh::Vertex3d;
        use glam::Quat;

        // A sliver along the XZ diagonal, turned onto the X axis.
        let up = [0.0, 1.0, 0.0];
        let sliver = MeshData::new(
            vec![
                Vertex3d::new([-1.0, 0.0, -1.0], up, [0.0, 0.0]),
                Vertex3d::new([1.0, 0.0, 1.0], up, [1.0, 0.0]),
                Vertex3d::new([1.0, 0.0, 1.0], up, [1.0, 1.0]),
            ],
            vec![0, 1, 2],
        );
        let mut scene = Scene::new();
        let root = scene.root();
        scene.add_mesh(
            root,
            "sliver",
            Arc::new(sliver),
            Material::default(),
            Transform::new().rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4)),
        );
        let size = scene.bounds(root).size();
        assert!((size.x - 2.0 * std::f32::consts::SQRT_2).abs() < 1e-4, "{size:?}");
        assert!(size.z < 1e-4, "{size:?}");
    }
}

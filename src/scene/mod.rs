//! Scene graph: named nodes with local transforms in a `hecs` world.
//!
//! Nodes are tagged variants ([`SceneNode`]) rather than a type hierarchy.
//! Code that needs to touch specific nodes (material overrides, shadow flags)
//! implements [`SceneVisitor`] and matches on the node's name and payload.
//!
//! ```
//! use std::sync::Arc;
//! use uspace::mesh::{Material, MeshData, Transform};
//! use uspace::scene::Scene;
//!
//! let mut scene = Scene::new();
//! let group = scene.add_group(scene.root(), "robots", Transform::new());
//! let cube = Arc::new(MeshData::cube());
//! scene.add_mesh(group, "body", cube, Material::default(), Transform::new());
//! assert_eq!(scene.node_count(), 2);
//!
//! scene.remove(group);
//! assert_eq!(scene.node_count(), 0);
//! ```

mod environment;
mod node;
#[allow(clippy::module_inception)]
mod scene;
mod visitor;

pub use environment::{Environment, EnvironmentMap, Sky};
pub use node::{
    Children, DirectionalLight, Light, MeshNode, Name, Parent, SceneNode, ShadowSettings,
};
pub use scene::{DrawItem, Scene};
pub use visitor::SceneVisitor;

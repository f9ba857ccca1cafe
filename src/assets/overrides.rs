use hecs::Entity;

use crate::scene::{SceneNode, SceneVisitor};

/// Which meshes an override applies to.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshSelector {
    All,
    Named(String),
}

/// Material and shadow changes applied to loaded meshes. Unset fields are
/// left alone.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialOverride {
    pub selector: MeshSelector,
    pub metalness: Option<f32>,
    pub roughness: Option<f32>,
    pub cast_shadow: Option<bool>,
    pub receive_shadow: Option<bool>,
}

impl MaterialOverride {
    pub fn all() -> Self {
        Self::new(MeshSelector::All)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(MeshSelector::Named(name.into()))
    }

    fn new(selector: MeshSelector) -> Self {
        Self {
            selector,
            metalness: None,
            roughness: None,
            cast_shadow: None,
            receive_shadow: None,
        }
    }

    pub fn metal_rough(mut self, metalness: f32, roughness: f32) -> Self {
        self.metalness = Some(metalness);
        self.roughness = Some(roughness);
        self
    }

    pub fn shadows(mut self, cast: bool, receive: bool) -> Self {
        self.cast_shadow = Some(cast);
        self.receive_shadow = Some(receive);
        self
    }

    fn matches(&self, name: &str) -> bool {
        match &self.selector {
            MeshSelector::All => true,
            MeshSelector::Named(n) => n == name,
        }
    }
}

impl SceneVisitor for MaterialOverride {
    fn visit(&mut self, _entity: Entity, name: &str, node: &mut SceneNode) {
        if !self.matches(name) {
            return;
        }
        let Some(mesh) = node.as_mesh_mut() else {
            return;
        };
        let material = &mut mesh.material;
        if let Some(m) = self.metalness {
            material.metalness = m;
        }
        if let Some(r) = self.roughness {
            material.roughness = r;
        }
        if let Some(cast) = self.cast_shadow {
            material.cast_shadow = cast;
        }
        if let Some(receive) = self.receive_shadow {
            material.receive_shadow = receive;
        }
    }
}

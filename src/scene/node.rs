//! Components stored on scene entities.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use hecs::Entity;

use crate::mesh::{Material, MeshData};

/// Stable, human-readable node name. Material overrides match on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parent(pub Entity);

#[derive(Clone, Debug, Default)]
pub struct Children(pub Vec<Entity>);

/// Payload of a scene node.
#[derive(Clone, Debug)]
pub enum SceneNode {
    Group,
    Mesh(MeshNode),
    Light(Light),
}

impl SceneNode {
    pub fn mesh(mesh: Arc<MeshData>, material: Material) -> Self {
        SceneNode::Mesh(MeshNode { mesh, material })
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut MeshNode> {
        match self {
            SceneNode::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MeshNode {
    pub mesh: Arc<MeshData>,
    pub material: Material,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Directional(DirectionalLight),
    Ambient { color: Vec3, intensity: f32 },
}

/// A directional light placed `distance` units from its target along the
/// light direction. The node's world transform moves both.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Unit vector pointing from the scene toward the light.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub distance: f32,
    pub target: Vec3,
    pub shadow: Option<ShadowSettings>,
}

/// Orthographic shadow frustum around the light's target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowSettings {
    pub map_size: u32,
    pub near: f32,
    pub far: f32,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub normal_bias: f32,
}

impl DirectionalLight {
    pub fn position(&self) -> Vec3 {
        self.target + self.direction * self.distance
    }

    /// View-projection of the shadow camera, if shadows are enabled.
    pub fn shadow_view_proj(&self) -> Option<Mat4> {
        let shadow = self.shadow?;
        let up = if self.direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(self.position(), self.target, up);
        let proj = Mat4::orthographic_rh(
            shadow.left,
            shadow.right,
            shadow.bottom,
            shadow.top,
            shadow.near,
            shadow.far,
        );
        Some(proj * view)
    }
}

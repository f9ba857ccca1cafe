use hecs::Entity;

use super::node::SceneNode;

/// Visits nodes of a subtree in depth-first pre-order.
///
/// Visitors match on the node payload and its stable name rather than on
/// concrete types, so one visitor can cover groups, meshes and lights.
pub trait SceneVisitor {
    fn visit(&mut self, entity: Entity, name: &str, node: &mut SceneNode);
}

impl<F: FnMut(Entity, &str, &mut SceneNode)> SceneVisitor for F {
    fn visit(&mut self, entity: Entity, name: &str, node: &mut SceneNode) {
        self(entity, name, node)
    }
}

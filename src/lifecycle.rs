//! Scoped acquisition with exactly-once release.
//!
//! Everything a mounted scene adds to the viewer (asset loads, tile groups,
//! lights, hooks, an installed render graph) is registered with a
//! [`DisposeBag`] owned by the scene's [`Mounted`] scope. Tearing the scope
//! down runs each release once, newest first.

use crate::assets::LoadScope;
use crate::scene::Scene;

type Teardown = Box<dyn FnOnce(&mut Scene)>;

/// Release actions run in reverse registration order.
#[derive(Default)]
pub struct DisposeBag {
    actions: Vec<(String, Teardown)>,
    disposed: bool,
}

impl DisposeBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release. Adding to a disposed bag runs it immediately.
    pub fn defer(
        &mut self,
        scene: &mut Scene,
        label: impl Into<String>,
        action: impl FnOnce(&mut Scene) + 'static,
    ) {
        let label = label.into();
        if self.disposed {
            tracing::debug!(label = %label, "running release for already disposed scope");
            action(scene);
            return;
        }
        self.actions.push((label, Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Runs every pending release. Returns how many ran; zero on a second
    /// call.
    pub fn dispose(&mut self, scene: &mut Scene) -> usize {
        self.disposed = true;
        let mut count = 0;
        while let Some((label, action)) = self.actions.pop() {
            tracing::trace!(label = %label, "release");
            action(scene);
            count += 1;
        }
        count
    }
}

/// One mounted scene's resources: its asset scope, its release actions and
/// the hooks it registered on the viewer.
pub struct Mounted {
    pub name: String,
    pub scope: LoadScope,
    pub bag: DisposeBag,
    pub(crate) hooks: Vec<crate::viewer::HookId>,
}

impl Mounted {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            scope: LoadScope::new(name.clone()),
            name,
            bag: DisposeBag::new(),
            hooks: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.scope.is_live()
    }

    /// Cancels pending loads, removes loaded nodes and runs the bag.
    pub fn dispose(&mut self, scene: &mut Scene) {
        let nodes = self.scope.dispose(scene);
        let actions = self.bag.dispose(scene);
        if nodes + actions > 0 {
            tracing::debug!(scope = %self.name, nodes, actions, "scope disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::mesh::Transform;

    #[test]
    fn releases_run_once_in_reverse_order() {
        let mut scene = Scene::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut bag = DisposeBag::new();
        for i in 0..3 {
            let order = order.clone();
            bag.defer(&mut scene, format!("r{i}"), move |_| order.borrow_mut().push(i));
        }
        assert_eq!(bag.dispose(&mut scene), 3);
        assert_eq!(bag.dispose(&mut scene), 0);
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let mut scene = Scene::new();
        let mut bag = DisposeBag::new();
        bag.dispose(&mut scene);
        let group = scene.add_group(scene.root(), "late", Transform::new());
        bag.defer(&mut scene, "late", move |scene| {
            scene.remove(group);
        });
        assert!(!scene.contains(group));
        assert!(bag.is_empty());
    }

    #[test]
    fn mounted_dispose_clears_scope_and_bag() {
        let mut scene = Scene::new();
        let mut mounted = Mounted::new("test");
        let group = scene.add_group(scene.root(), "robots", Transform::new());
        mounted.scope.track(group);
        let light = scene.add_group(scene.root(), "light", Transform::new());
        mounted.bag.defer(&mut scene, "light", move |scene| {
            scene.remove(light);
        });

        mounted.dispose(&mut scene);
        assert!(!mounted.is_live());
        assert_eq!(scene.node_count(), 0);
        mounted.dispose(&mut scene);
        assert_eq!(scene.node_count(), 0);
    }
}

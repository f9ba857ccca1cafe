//! The viewer's built-in scenes.
//!
//! Every scene is a setup closure plus a [`PipelineConfig`]. One is picked
//! at startup and mounted with [`mount`]; at runtime `E` switches between
//! the full graph output and the raw geometry color.

mod atmosphere;
mod site;

use clap::ValueEnum;
use glam::Vec3;

use crate::error::ViewerError;
use crate::render_graph::{PipelineConfig, RenderBackend};
use crate::scene::{DirectionalLight, Light};
use crate::viewer::{MountContext, Viewer};

pub use atmosphere::AtmosphereScene;
pub use site::{BUILDING, ENVIRONMENT, ROBOTS, RobotModel, load_site};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SceneKind {
    /// Building and robots under an HDR sky with SSGI, SSR, bloom and TAA.
    #[default]
    Showcase,
    /// Building and robots, geometry output only.
    Model,
    /// Terrain tiles and a building lit by the sun at a fixed date.
    Atmosphere,
}

impl SceneKind {
    pub fn name(self) -> &'static str {
        match self {
            SceneKind::Showcase => "showcase",
            SceneKind::Model => "model",
            SceneKind::Atmosphere => "atmosphere",
        }
    }

    pub fn pipeline(self) -> PipelineConfig {
        match self {
            SceneKind::Showcase => PipelineConfig::screen_space_effects(),
            SceneKind::Model => PipelineConfig::plain(),
            SceneKind::Atmosphere => PipelineConfig::atmosphere(),
        }
    }
}

/// Mounts the scene `kind` on `viewer`.
pub fn mount<B: RenderBackend>(viewer: &mut Viewer<B>, kind: SceneKind) -> Result<(), ViewerError> {
    match kind {
        SceneKind::Showcase => viewer.mount(kind.name(), kind.pipeline(), setup_showcase),
        SceneKind::Model => viewer.mount(kind.name(), kind.pipeline(), setup_model),
        SceneKind::Atmosphere => {
            let scene = AtmosphereScene::default();
            viewer.mount(kind.name(), kind.pipeline(), move |ctx| scene.setup(ctx))
        }
    }
}

fn setup_showcase(ctx: &mut MountContext<'_>) -> Result<(), ViewerError> {
    load_site(ctx);
    let hdr = ctx.asset_path(ENVIRONMENT);
    ctx.load_environment(hdr);
    Ok(())
}

fn setup_model(ctx: &mut MountContext<'_>) -> Result<(), ViewerError> {
    load_site(ctx);

    // No environment here, so light the models directly.
    let ambient = ctx.scene.add_light(
        "ambient",
        Light::Ambient {
            color: Vec3::ONE,
            intensity: 0.6,
        },
    );
    let key = ctx.scene.add_light(
        "key",
        Light::Directional(DirectionalLight {
            direction: Vec3::new(0.4, 1.0, 0.3).normalize(),
            color: Vec3::ONE,
            intensity: 2.0,
            distance: 50.0,
            target: Vec3::ZERO,
            shadow: None,
        }),
    );
    ctx.track(ambient);
    ctx.track(key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::ViewerConfig;
    use crate::input::Input;
    use crate::render_graph::testing::RecordingBackend;

    fn viewer() -> Viewer<RecordingBackend> {
        let backend = RecordingBackend {
            size: (64, 48),
            ..Default::default()
        };
        Viewer::new(backend, ViewerConfig::default().assets_dir("/nonexistent/uspace-assets"))
    }

    #[test]
    fn scene_names_round_trip_through_clap() {
        for kind in SceneKind::value_variants() {
            assert_eq!(SceneKind::from_str(kind.name(), true), Ok(*kind));
        }
    }

    #[test]
    fn showcase_installs_the_effects_graph() {
        let mut viewer = viewer();
        mount(&mut viewer, SceneKind::Showcase).unwrap();
        let expected = crate::render_graph::build_pipeline(&PipelineConfig::screen_space_effects())
            .unwrap()
            .graph
            .len();
        assert_eq!(viewer.post_processing().unwrap().graph().len(), expected);
        // Building, environment and three robots.
        assert_eq!(viewer.pending_loads(), 5);
        assert!(viewer.scene().find("robotGroup").is_some());
    }

    #[test]
    fn model_scene_presents_geometry_only() {
        let mut viewer = viewer();
        mount(&mut viewer, SceneKind::Model).unwrap();
        assert_eq!(viewer.post_processing().unwrap().graph().len(), 1);
        assert!(viewer.scene().find("key").is_some());
    }

    #[test]
    fn missing_assets_do_not_break_the_scene() {
        let mut viewer = viewer();
        mount(&mut viewer, SceneKind::Showcase).unwrap();
        let stats = viewer.wait_for_assets(Duration::from_secs(10));
        assert_eq!(stats.failed, 5);
        assert!(viewer.frame(Instant::now(), &Input::new()).unwrap());
        assert_eq!(viewer.backend().frames.len(), 1);
    }

    #[test]
    fn unmount_removes_every_scene_node() {
        let mut viewer = viewer();
        mount(&mut viewer, SceneKind::Model).unwrap();
        assert!(viewer.scene().node_count() > 0);
        assert!(viewer.unmount(SceneKind::Model.name()));
        viewer.wait_for_assets(Duration::from_secs(10));
        assert_eq!(viewer.scene().node_count(), 0);
    }
}

use std::cell::RefCell;
use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;

use glam::Vec3;
use hecs::Entity;

use crate::assets::ModelRequest;
use crate::atmosphere::{AtmosphereContext, Geodetic, SceneDate, SunLight};
use crate::error::ViewerError;
use crate::scene::{Environment, Light, SceneNode};
use crate::tiles::{IonAuthPlugin, ProceduralTerrainStream, TileRequest, TilesRenderer};
use crate::viewer::{HookContext, MountContext};

const BUILDING: &str = "models/dingchuang-opt.glb";

const CAMERA_POSITION: Vec3 = Vec3::new(91.324_04, 84.807_17, 776.964_97);
const CAMERA_TARGET: Vec3 = Vec3::new(10.159_809, 84.807_17, 17.369_088);

/// Terrain tiles and a building lit by the sun over Hangzhou.
///
/// The tile set is re-projected so the site sits at the scene origin, with
/// X north, Y up and Z east. The sun light and the sky environment are
/// refreshed every frame from an [`AtmosphereContext`].
#[derive(Clone, Debug)]
pub struct AtmosphereScene {
    pub origin: Geodetic,
    pub date: SceneDate,
    /// Advance the date with the viewer clock instead of holding it.
    pub live_clock: bool,
    pub ion_token: String,
    pub ion_asset: String,
}

impl Default for AtmosphereScene {
    fn default() -> Self {
        Self {
            origin: Geodetic::from_degrees(30.284658, 120.002982, 8.4),
            date: SceneDate::from_local(2025, 6, 21, 15, 30, 8.0),
            live_clock: false,
            ion_token: std::env::var("CESIUM_ION_TOKEN").unwrap_or_default(),
            ion_asset: "2275207".to_string(),
        }
    }
}

impl AtmosphereScene {
    pub fn setup(self, ctx: &mut MountContext<'_>) -> Result<(), ViewerError> {
        ctx.camera.near = 1.0;
        ctx.camera.far = 1e10;
        ctx.controls.max_polar_angle = FRAC_PI_2;
        ctx.set_camera_pose(CAMERA_POSITION, CAMERA_TARGET);

        let building = ctx.asset_path(BUILDING);
        ctx.load_model(building, ModelRequest::new().shadows(true, true));

        let mut tiles = TilesRenderer::with_default_plugins(
            ProceduralTerrainStream::new(self.origin),
            TileRequest::default(),
            IonAuthPlugin::new(self.ion_token, self.ion_asset),
        )?;
        tiles.set_camera(ctx.camera);
        tiles.set_origin(ctx.scene, self.origin);
        let tiles = Rc::new(RefCell::new(tiles));

        let mut atmosphere = AtmosphereContext::new(self.origin, self.date);
        atmosphere.set_camera(ctx.camera);
        let mut sun = SunLight::new();
        sun.update(&atmosphere);
        let sun_node = ctx
            .scene
            .add_light("sun", Light::Directional(sun.light()));
        ctx.track(sun_node);
        ctx.scene.environment = Environment::Sky(atmosphere.sky());
        tracing::info!(
            sun = ?sun.direction(),
            up = sun.is_up(),
            "atmosphere initialised"
        );

        let frame_tiles = tiles.clone();
        let start = self.date;
        let live_clock = self.live_clock;
        ctx.on_before_render(move |frame: &mut HookContext<'_>| {
            {
                let mut tiles = frame_tiles.borrow_mut();
                tiles.set_camera(frame.camera);
                tiles.set_resolution(frame.size.0, frame.size.1);
                tiles.update(frame.scene, frame.delta);
            }

            if live_clock {
                let elapsed_ms = (f64::from(frame.elapsed) * 1000.0) as i64;
                atmosphere.set_date(SceneDate::from_unix_millis(start.unix_millis() + elapsed_ms));
            }
            atmosphere.set_camera(frame.camera);
            sun.update(&atmosphere);
            let light = sun.light();
            frame.scene.visit(sun_node, &mut |_: Entity, _: &str, node: &mut SceneNode| {
                if let SceneNode::Light(Light::Directional(current)) = node {
                    *current = light;
                }
            });
            frame.scene.environment = Environment::Sky(atmosphere.sky());
        });

        ctx.defer("tiles", move |scene| {
            tiles.borrow_mut().detach(scene);
            scene.environment = Environment::None;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::ViewerConfig;
    use crate::input::Input;
    use crate::render_graph::testing::RecordingBackend;
    use crate::render_graph::{PipelineConfig, build_pipeline};
    use crate::scenes::{SceneKind, mount};
    use crate::viewer::Viewer;

    fn mounted() -> Viewer<RecordingBackend> {
        let backend = RecordingBackend {
            size: (64, 48),
            ..Default::default()
        };
        let mut viewer = Viewer::new(
            backend,
            ViewerConfig::default().assets_dir("/nonexistent/uspace-assets"),
        );
        mount(&mut viewer, SceneKind::Atmosphere).unwrap();
        viewer
    }

    fn run_frames(viewer: &mut Viewer<RecordingBackend>, frames: u64) {
        let input = Input::new();
        let t0 = Instant::now();
        for i in 0..frames {
            viewer
                .frame(t0 + Duration::from_millis(16 * i), &input)
                .unwrap();
        }
    }

    #[test]
    fn camera_starts_at_the_fixed_pose() {
        let viewer = mounted();
        let camera = viewer.camera();
        assert_eq!((camera.near, camera.far), (1.0, 1e10));
        assert_eq!(camera.position, CAMERA_POSITION);
        assert_eq!(viewer.controls().max_polar_angle, FRAC_PI_2);
    }

    #[test]
    fn installs_the_atmosphere_graph() {
        let viewer = mounted();
        let expected = build_pipeline(&PipelineConfig::atmosphere())
            .unwrap()
            .graph
            .len();
        assert_eq!(viewer.post_processing().unwrap().graph().len(), expected);
    }

    #[test]
    fn afternoon_sun_casts_shadows_from_above() {
        let mut viewer = mounted();
        run_frames(&mut viewer, 2);
        let lights = viewer.scene().directional_lights();
        assert_eq!(lights.len(), 1);
        let sun = lights[0];
        assert!(sun.direction.y > 0.0);
        assert!(sun.intensity > 0.0);
        let shadow = sun.shadow.unwrap();
        assert_eq!(shadow.map_size, 4096);
        assert_eq!(sun.distance, 80.0);
        assert!(matches!(viewer.scene().environment, Environment::Sky(_)));
    }

    #[test]
    fn tiles_stream_in_and_leave_with_the_scene() {
        let mut viewer = mounted();
        run_frames(&mut viewer, 4);
        let nodes = viewer.scene().node_count();
        // Sun, tile group and at least one tile.
        assert!(nodes >= 3, "only {nodes} nodes");

        assert!(viewer.unmount(SceneKind::Atmosphere.name()));
        viewer.wait_for_assets(Duration::from_secs(10));
        assert_eq!(viewer.scene().node_count(), 0);
        assert!(matches!(viewer.scene().environment, Environment::None));
    }

    #[test]
    fn held_date_keeps_the_sun_still() {
        let mut viewer = mounted();
        run_frames(&mut viewer, 1);
        let first = viewer.scene().directional_lights()[0].direction;
        run_frames(&mut viewer, 3);
        assert_eq!(viewer.scene().directional_lights()[0].direction, first);
    }
}

//! The viewer: one backend, one scene, one installed render graph.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3, Vec4};
use hecs::Entity;
use winit::keyboard::KeyCode;

use crate::assets::{AssetLoader, ModelFormat, ModelRequest, PumpStats};
use crate::camera::{PerspectiveCamera, taa_jitter};
use crate::clock::Clock;
use crate::config::ViewerConfig;
use crate::controls::OrbitControls;
use crate::error::{RenderError, ViewerError};
use crate::input::Input;
use crate::lifecycle::Mounted;
use crate::render_graph::{FrameView, PipelineConfig, PostProcessing, RenderBackend, build_pipeline};
use crate::scene::Scene;

/// Handle for a registered before-render hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// What a before-render hook can see and change.
pub struct HookContext<'a> {
    pub scene: &'a mut Scene,
    pub camera: &'a PerspectiveCamera,
    pub delta: f32,
    pub elapsed: f32,
    pub size: (u32, u32),
}

pub type BeforeRender = Box<dyn FnMut(&mut HookContext<'_>)>;

#[derive(Default)]
struct Hooks {
    entries: Vec<(HookId, BeforeRender)>,
    next: u64,
}

impl Hooks {
    fn add(&mut self, hook: BeforeRender) -> HookId {
        let id = HookId(self.next);
        self.next += 1;
        self.entries.push((id, hook));
        id
    }

    fn remove(&mut self, id: HookId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(h, _)| *h != id);
        self.entries.len() != before
    }
}

/// Handed to a scene's setup closure by [`Viewer::mount`]. Everything
/// registered through it is released when the scene is unmounted.
pub struct MountContext<'a> {
    pub scene: &'a mut Scene,
    pub camera: &'a mut PerspectiveCamera,
    pub controls: &'a mut OrbitControls,
    pub config: &'a ViewerConfig,
    loader: &'a mut AssetLoader,
    mounted: &'a mut Mounted,
    hooks: &'a mut Hooks,
}

impl MountContext<'_> {
    pub fn asset_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.config.assets_dir.join(relative)
    }

    pub fn load_model(&mut self, path: impl AsRef<Path>, request: ModelRequest) -> u64 {
        self.loader.load_model(&self.mounted.scope, path, request)
    }

    pub fn load_model_bytes(
        &mut self,
        bytes: Vec<u8>,
        format: ModelFormat,
        name: impl Into<String>,
        request: ModelRequest,
    ) -> u64 {
        self.loader
            .load_model_bytes(&self.mounted.scope, bytes, format, name, request)
    }

    pub fn load_environment(&mut self, path: impl AsRef<Path>) -> u64 {
        self.loader.load_environment(&self.mounted.scope, path)
    }

    /// Removes `entity` (and its subtree) on unmount.
    pub fn track(&mut self, entity: Entity) {
        self.mounted.scope.track(entity);
    }

    pub fn defer(&mut self, label: impl Into<String>, action: impl FnOnce(&mut Scene) + 'static) {
        self.mounted.bag.defer(self.scene, label, action);
    }

    pub fn on_before_render(&mut self, hook: impl FnMut(&mut HookContext<'_>) + 'static) -> HookId {
        let id = self.hooks.add(Box::new(hook));
        self.mounted.hooks.push(id);
        id
    }

    /// Places the camera and makes this pose the one `R` returns to.
    pub fn set_camera_pose(&mut self, position: Vec3, target: Vec3) {
        self.camera.position = position;
        self.camera.target = target;
        self.controls.set_look_at(position, target, false);
        self.controls.save_state();
        self.camera.reset_history();
    }
}

/// Owns everything needed to draw frames into one surface.
///
/// Call [`frame`](Self::frame) once per redraw. [`dispose`](Self::dispose)
/// releases mounted scenes, the render graph and the surface; it runs on
/// drop if it was not called before.
pub struct Viewer<B: RenderBackend> {
    backend: B,
    config: ViewerConfig,
    scene: Scene,
    camera: PerspectiveCamera,
    controls: OrbitControls,
    clock: Clock,
    loader: AssetLoader,
    post: Option<PostProcessing>,
    hooks: Hooks,
    mounted: Vec<Mounted>,
    disposed: bool,
}

impl<B: RenderBackend> Viewer<B> {
    pub fn new(backend: B, config: ViewerConfig) -> Self {
        let (width, height) = backend.size();
        let mut camera = PerspectiveCamera::new();
        camera.set_viewport(width, height);
        let controls = OrbitControls::for_camera(&camera);

        let mut scene = Scene::new();
        scene.clear_color = Vec4::from_array(config.clear_color);
        tracing::info!(width, height, "viewer created");

        Self {
            backend,
            config,
            scene,
            camera,
            controls,
            clock: Clock::new(),
            loader: AssetLoader::new(),
            post: None,
            hooks: Hooks::default(),
            mounted: Vec::new(),
            disposed: false,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn controls(&self) -> &OrbitControls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut OrbitControls {
        &mut self.controls
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn post_processing(&self) -> Option<&PostProcessing> {
        self.post.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn pending_loads(&self) -> usize {
        self.loader.pending()
    }

    /// Blocks until every pending load is applied or `timeout` passes.
    /// Headless rendering uses this so the first frame shows the assets.
    pub fn wait_for_assets(&mut self, timeout: Duration) -> PumpStats {
        self.loader
            .pump_blocking(&mut self.scene, &mut self.controls, self.camera.fov, timeout)
    }

    pub fn mounted(&self) -> Vec<&str> {
        self.mounted.iter().map(|m| m.name.as_str()).collect()
    }

    /// Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || self.disposed {
            return;
        }
        self.camera.set_viewport(width, height);
        self.backend.resize(width, height);
        tracing::debug!(width, height, "viewer resized");
    }

    pub fn on_before_render(&mut self, hook: impl FnMut(&mut HookContext<'_>) + 'static) -> HookId {
        self.hooks.add(Box::new(hook))
    }

    pub fn off_before_render(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Queues an output switch for the next frame.
    pub fn set_effects_enabled(&mut self, enabled: bool) {
        if let Some(post) = &mut self.post {
            post.set_effects_enabled(enabled);
        }
    }

    pub fn toggle_effects(&mut self) {
        if let Some(post) = &mut self.post {
            let enabled = !post.requested_effects_enabled();
            post.set_effects_enabled(enabled);
            tracing::info!(enabled, "effects toggled");
        }
    }

    /// Mounts a scene: runs `setup`, builds `pipeline` (or the configured
    /// override) and installs it in place of the current graph.
    ///
    /// Any failure tears down what `setup` registered before returning.
    pub fn mount(
        &mut self,
        name: &str,
        pipeline: PipelineConfig,
        setup: impl FnOnce(&mut MountContext<'_>) -> Result<(), ViewerError>,
    ) -> Result<(), ViewerError> {
        if self.disposed {
            return Err(ViewerError::Disposed);
        }
        let _span = tracing::info_span!("mount", scene = name).entered();
        let mut mounted = Mounted::new(name);

        let result = {
            let mut ctx = MountContext {
                scene: &mut self.scene,
                camera: &mut self.camera,
                controls: &mut self.controls,
                config: &self.config,
                loader: &mut self.loader,
                mounted: &mut mounted,
                hooks: &mut self.hooks,
            };
            setup(&mut ctx)
        }
        .and_then(|()| {
            let config = self.config.pipeline.clone().unwrap_or(pipeline);
            Ok(build_pipeline(&config)?)
        })
        .and_then(|built| {
            if let Some(mut old) = self.post.take() {
                old.dispose(&mut self.backend);
            }
            Ok(PostProcessing::install(built, &mut self.backend)?)
        });

        match result {
            Ok(post) => {
                self.post = Some(post);
                self.mounted.push(mounted);
                self.camera.reset_history();
                tracing::info!("scene mounted");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "scene mount failed");
                self.teardown(&mut mounted);
                Err(err)
            }
        }
    }

    /// Tears down a mounted scene. The render graph stays installed.
    pub fn unmount(&mut self, name: &str) -> bool {
        let Some(index) = self.mounted.iter().rposition(|m| m.name == name) else {
            return false;
        };
        let mut mounted = self.mounted.remove(index);
        self.teardown(&mut mounted);
        true
    }

    fn teardown(&mut self, mounted: &mut Mounted) {
        for id in mounted.hooks.drain(..) {
            self.hooks.remove(id);
        }
        mounted.dispose(&mut self.scene);
    }

    /// Draws one frame. Returns `Ok(false)` once the viewer is disposed.
    pub fn frame(&mut self, now: Instant, input: &Input) -> Result<bool, ViewerError> {
        if self.disposed {
            return Ok(false);
        }
        let _span = tracing::trace_span!("frame", index = self.clock.frames()).entered();

        if let Some(post) = &mut self.post
            && post.begin_frame()
        {
            self.camera.reset_history();
        }
        if input.key_pressed(KeyCode::KeyE) {
            self.toggle_effects();
        }
        if input.key_pressed(KeyCode::KeyR) {
            self.controls.reset(true);
        }

        let delta = self.clock.tick(now);

        self.controls.update(input, delta);
        self.controls.apply(&mut self.camera);

        let loads = self
            .loader
            .pump(&mut self.scene, &mut self.controls, self.camera.fov);
        if loads.applied + loads.failed > 0 {
            tracing::debug!(applied = loads.applied, failed = loads.failed, "pumped asset loads");
        }

        let size = self.backend.size();
        let mut ctx = HookContext {
            scene: &mut self.scene,
            camera: &self.camera,
            delta,
            elapsed: self.clock.elapsed(),
            size,
        };
        for (_, hook) in &mut self.hooks.entries {
            hook(&mut ctx);
        }

        if let Some(post) = &self.post {
            let jitter = if post.wants_jitter() {
                taa_jitter(self.clock.frames(), size.0, size.1)
            } else {
                Vec2::ZERO
            };
            self.camera.set_jitter(jitter);

            let view = FrameView {
                graph: post.graph(),
                output: post.output(),
                display: post.display(self.config.display()),
                shadows: self.config.shadows,
                scene: &self.scene,
                camera: &self.camera,
                time: self.clock.elapsed(),
                delta,
                frame_index: self.clock.frames(),
            };
            match self.backend.render(&view) {
                Ok(()) => {}
                Err(RenderError::SurfaceTexture(err)) => {
                    tracing::warn!(error = %err, "surface unavailable, skipping frame");
                    return Ok(true);
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.camera.commit_frame();
        Ok(true)
    }

    /// Stops rendering, tears down mounted scenes newest first, releases
    /// the render graph and detaches the surface. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        while let Some(mut mounted) = self.mounted.pop() {
            self.teardown(&mut mounted);
        }
        if let Some(post) = &mut self.post {
            post.dispose(&mut self.backend);
        }
        self.backend.detach();
        tracing::info!("viewer disposed");
    }
}

impl<B: RenderBackend> Drop for Viewer<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::error::GraphError;
    use crate::mesh::{Material, MeshData, Transform};
    use crate::render_graph::testing::RecordingBackend;
    use crate::render_graph::{SoftwareBackend, TaaParams};
    use crate::scene::Light;

    fn recording() -> RecordingBackend {
        RecordingBackend {
            size: (64, 48),
            ..Default::default()
        }
    }

    fn mount_effects(viewer: &mut Viewer<RecordingBackend>) {
        viewer
            .mount("effects", PipelineConfig::screen_space_effects(), |ctx| {
                let cube = ctx.scene.add_mesh(
                    ctx.scene.root(),
                    "cube",
                    Arc::new(MeshData::cube()),
                    Material::default(),
                    Transform::new(),
                );
                ctx.track(cube);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn new_viewer_uses_default_camera_and_controls() {
        let viewer = Viewer::new(recording(), ViewerConfig::default());
        let camera = viewer.camera();
        assert_eq!(camera.position, Vec3::splat(5.0));
        assert_eq!((camera.fov, camera.near, camera.far), (50.0, 0.1, 1000.0));
        assert!((camera.aspect - 64.0 / 48.0).abs() < 1e-6);
        assert_eq!(viewer.controls().min_distance, 0.2);
        assert_eq!(viewer.controls().smooth_time, 0.2);
        assert_eq!(viewer.controls().dolly_speed, 0.2);
    }

    #[test]
    fn resize_ignores_zero_sizes() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        viewer.resize(0, 100);
        assert_eq!(viewer.backend().size, (64, 48));
        viewer.resize(200, 100);
        assert_eq!(viewer.backend().size, (200, 100));
        assert_eq!(viewer.camera().aspect, 2.0);
    }

    #[test]
    fn hooks_run_in_subscription_order() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let log = log.clone();
                viewer.on_before_render(move |_| log.borrow_mut().push(i))
            })
            .collect();
        let input = Input::new();
        let t0 = Instant::now();
        viewer.frame(t0, &input).unwrap();
        assert!(viewer.off_before_render(ids[1]));
        assert!(!viewer.off_before_render(ids[1]));
        viewer.frame(t0 + Duration::from_millis(16), &input).unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2, 0, 2]);
    }

    #[test]
    fn effects_key_switches_output_at_next_frame() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        mount_effects(&mut viewer);
        let (full, raw) = {
            let pipeline = viewer.post_processing().unwrap().pipeline();
            (pipeline.full, pipeline.raw)
        };

        let mut input = Input::new();
        let t0 = Instant::now();
        input.press_key(KeyCode::KeyE);
        viewer.frame(t0, &input).unwrap();
        input.end_frame();
        viewer.frame(t0 + Duration::from_millis(16), &input).unwrap();

        let outputs: Vec<_> = viewer.backend().frames.iter().map(|(o, _)| *o).collect();
        assert_eq!(outputs, vec![full, raw]);
        // Raw output schedules only the geometry pass.
        assert_eq!(viewer.backend().frames[1].1, 1);
    }

    #[test]
    fn jitter_follows_presented_output() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        let config = PipelineConfig::plain().with_temporal_aa(TaaParams::default());
        viewer.mount("taa", config, |_| Ok(())).unwrap();
        let input = Input::new();
        let t0 = Instant::now();
        viewer.frame(t0, &input).unwrap();
        viewer.frame(t0 + Duration::from_millis(16), &input).unwrap();
        assert_ne!(viewer.camera().jitter(), Vec2::ZERO);

        viewer.set_effects_enabled(false);
        viewer.frame(t0 + Duration::from_millis(32), &input).unwrap();
        assert_eq!(viewer.camera().jitter(), Vec2::ZERO);
    }

    #[test]
    fn failed_mount_tears_down_scope() {
        let mut viewer = Viewer::new(
            RecordingBackend {
                fail_at: Some(2),
                ..recording()
            },
            ViewerConfig::default(),
        );
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let err = viewer
            .mount("broken", PipelineConfig::screen_space_effects(), move |ctx| {
                let group = ctx.scene.add_group(ctx.scene.root(), "group", Transform::new());
                ctx.track(group);
                ctx.on_before_render(|_| {});
                ctx.defer("flag", move |_| *flag.borrow_mut() = true);
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, ViewerError::Render(RenderError::Unallocated(_))));
        assert_eq!(viewer.scene().node_count(), 0);
        assert!(*ran.borrow());
        assert!(viewer.hooks.entries.is_empty());
        assert!(viewer.mounted().is_empty());
        assert!(viewer.post_processing().is_none());
    }

    #[test]
    fn setup_errors_abort_the_mount() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        let err = viewer
            .mount("bad", PipelineConfig::plain(), |ctx| {
                let group = ctx.scene.add_group(ctx.scene.root(), "group", Transform::new());
                ctx.track(group);
                Err(GraphError::Empty.into())
            })
            .unwrap_err();
        assert!(matches!(err, ViewerError::Graph(GraphError::Empty)));
        assert_eq!(viewer.scene().node_count(), 0);
        assert!(viewer.backend().allocations.is_empty());
    }

    #[test]
    fn dispose_is_idempotent_and_stops_frames() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        mount_effects(&mut viewer);
        let passes = viewer.post_processing().unwrap().graph().len();
        viewer.on_before_render(|_| panic!("hook ran after dispose"));

        viewer.dispose();
        viewer.dispose();
        assert!(viewer.is_disposed());
        assert_eq!(viewer.scene().node_count(), 0);
        assert_eq!(viewer.backend().releases.len(), passes);
        assert!(viewer.backend().releases.values().all(|&n| n == 1));
        assert_eq!(viewer.backend().detached, 1);
        assert!(!viewer.frame(Instant::now(), &Input::new()).unwrap());
    }

    #[test]
    fn remounting_replaces_the_graph() {
        let mut viewer = Viewer::new(recording(), ViewerConfig::default());
        mount_effects(&mut viewer);
        let first = viewer.post_processing().unwrap().graph().len();
        viewer.mount("plain", PipelineConfig::plain(), |_| Ok(())).unwrap();
        assert_eq!(viewer.backend().releases.len(), first);
        assert_eq!(viewer.mounted(), vec!["effects", "plain"]);

        assert!(viewer.unmount("effects"));
        assert_eq!(viewer.scene().node_count(), 0);
        assert_eq!(viewer.mounted(), vec!["plain"]);
    }

    #[test]
    fn configured_pipeline_overrides_the_scene() {
        let config = ViewerConfig::default().pipeline(PipelineConfig::plain());
        let mut viewer = Viewer::new(recording(), config);
        mount_effects(&mut viewer);
        assert_eq!(viewer.post_processing().unwrap().graph().len(), 1);
    }

    #[test]
    fn plain_scene_renders_on_software_backend() {
        let mut viewer = Viewer::new(SoftwareBackend::new(32, 24), ViewerConfig::default());
        viewer
            .mount("plain", PipelineConfig::plain(), |ctx| {
                let cube = ctx.scene.add_mesh(
                    ctx.scene.root(),
                    "cube",
                    Arc::new(MeshData::cube()),
                    Material::default(),
                    Transform::new(),
                );
                ctx.track(cube);
                let ambient = ctx.scene.add_light(
                    "ambient",
                    Light::Ambient {
                        color: Vec3::ONE,
                        intensity: 1.0,
                    },
                );
                ctx.track(ambient);
                ctx.set_camera_pose(Vec3::new(3.0, 2.0, 3.0), Vec3::ZERO);
                Ok(())
            })
            .unwrap();
        assert!(viewer.frame(Instant::now(), &Input::new()).unwrap());
        let presented = viewer.backend().presented().unwrap();
        assert!(presented.is_finite());
        // The cube covers the center pixel.
        assert!(presented.get(16, 12).truncate().length() > 0.0);
    }
}

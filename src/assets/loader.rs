//! Background decoding with frame-loop application.
//!
//! Worker threads turn bytes into [`ModelData`] or [`EnvironmentMap`] and
//! send them back over a channel. Nothing touches the [`Scene`] until the
//! frame loop calls [`AssetLoader::pump`], and a completion whose
//! [`LoadScope`] was disposed in the meantime is dropped there.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use hecs::Entity;

use crate::controls::OrbitControls;
use crate::error::AssetError;
use crate::mesh::Transform;
use crate::scene::{Environment, EnvironmentMap, Scene};

use super::environment::decode_environment_file;
use super::model::{ModelData, ModelFormat, decode_model_bytes, decode_model_file};
use super::overrides::MaterialOverride;

type Job = Box<dyn FnOnce() + Send + 'static>;

const MAX_WORKERS: usize = 4;

/// Model decoding state shared by every load of one scope.
#[derive(Debug, Default)]
pub struct ModelDecoder {
    released: AtomicBool,
    releases: AtomicUsize,
}

impl ModelDecoder {
    pub fn decode_file(&self, path: &Path) -> Result<ModelData, AssetError> {
        self.check()?;
        decode_model_file(path)
    }

    pub fn decode_bytes(
        &self,
        bytes: &[u8],
        format: ModelFormat,
        name: &str,
    ) -> Result<ModelData, AssetError> {
        self.check()?;
        decode_model_bytes(bytes, format, name)
    }

    fn check(&self) -> Result<(), AssetError> {
        if self.is_released() {
            Err(AssetError::DecoderDisposed)
        } else {
            Ok(())
        }
    }

    /// Returns whether this call did the release.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.releases.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }
}

struct ScopeInner {
    name: String,
    live: bool,
    nodes: Vec<Entity>,
    decoder: Arc<ModelDecoder>,
    environment: Option<Arc<EnvironmentMap>>,
}

/// The unit of cancellation for loads. Cloning shares the scope.
#[derive(Clone)]
pub struct LoadScope {
    inner: Rc<RefCell<ScopeInner>>,
}

impl LoadScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ScopeInner {
                name: name.into(),
                live: true,
                nodes: Vec::new(),
                decoder: Arc::new(ModelDecoder::default()),
                environment: None,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner.borrow().live
    }

    pub fn decoder(&self) -> Arc<ModelDecoder> {
        self.inner.borrow().decoder.clone()
    }

    /// Registers a node to be removed when the scope is disposed.
    pub fn track(&self, entity: Entity) {
        self.inner.borrow_mut().nodes.push(entity);
    }

    pub fn nodes(&self) -> Vec<Entity> {
        self.inner.borrow().nodes.clone()
    }

    fn set_environment(&self, map: Arc<EnvironmentMap>) {
        self.inner.borrow_mut().environment = Some(map);
    }

    /// Removes every tracked node and releases the decoder. Returns the
    /// number of nodes removed; later calls return zero.
    pub fn dispose(&self, scene: &mut Scene) -> usize {
        let mut inner = self.inner.borrow_mut();
        if !inner.live {
            return 0;
        }
        inner.live = false;
        let removed: usize = inner.nodes.drain(..).map(|e| scene.remove(e)).sum();
        // Only clear the environment if no other scope replaced it since.
        if let Some(map) = inner.environment.take()
            && matches!(
                &scene.environment,
                Environment::Equirect(current) if Arc::ptr_eq(current, &map)
            )
        {
            scene.environment = Environment::None;
        }
        inner.decoder.release();
        removed
    }
}

/// How a decoded model is placed in the scene.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    /// Defaults to the scene root.
    pub parent: Option<Entity>,
    pub transform: Transform,
    /// Applied in order, so later entries win.
    pub overrides: Vec<MaterialOverride>,
    pub fit_camera: bool,
}

impl ModelRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn under(mut self, parent: Entity) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_override(mut self, o: MaterialOverride) -> Self {
        self.overrides.push(o);
        self
    }

    pub fn shadows(self, cast: bool, receive: bool) -> Self {
        self.with_override(MaterialOverride::all().shadows(cast, receive))
    }

    pub fn fit_camera(mut self) -> Self {
        self.fit_camera = true;
        self
    }
}

enum Decoded {
    Model(ModelData),
    Environment(EnvironmentMap),
}

struct Completion {
    id: u64,
    result: Result<Decoded, AssetError>,
}

enum Apply {
    Model(ModelRequest),
    Environment,
}

struct PendingLoad {
    scope: LoadScope,
    label: String,
    apply: Apply,
}

/// Counters for one [`AssetLoader::pump`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub applied: usize,
    pub discarded: usize,
    pub failed: usize,
}

/// Decodes assets on a small worker pool.
pub struct AssetLoader {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
    pending: HashMap<u64, PendingLoad>,
    next_id: u64,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLoader {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_WORKERS);
        Self::with_workers(threads)
    }

    pub fn with_workers(threads: usize) -> Self {
        let (jobs, job_rx) = unbounded::<Job>();
        let workers = (0..threads)
            .filter_map(|i| {
                let rx = job_rx.clone();
                std::thread::Builder::new()
                    .name(format!("uspace-asset-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .inspect_err(|err| tracing::warn!(error = %err, "failed to spawn asset worker"))
                    .ok()
            })
            .collect::<Vec<_>>();
        tracing::debug!(workers = workers.len(), "asset loader started");

        let (done_tx, done_rx) = unbounded();
        Self {
            jobs: Some(jobs),
            workers,
            done_tx,
            done_rx,
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Loads that have not been applied or discarded yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn load_model(
        &mut self,
        scope: &LoadScope,
        path: impl AsRef<Path>,
        request: ModelRequest,
    ) -> u64 {
        let path: PathBuf = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        self.submit_model(scope, label, request, move |decoder| decoder.decode_file(&path))
    }

    pub fn load_model_bytes(
        &mut self,
        scope: &LoadScope,
        bytes: Vec<u8>,
        format: ModelFormat,
        name: impl Into<String>,
        request: ModelRequest,
    ) -> u64 {
        let name = name.into();
        self.submit_model(scope, name.clone(), request, move |decoder| {
            decoder.decode_bytes(&bytes, format, &name)
        })
    }

    pub(crate) fn submit_model(
        &mut self,
        scope: &LoadScope,
        label: String,
        request: ModelRequest,
        decode: impl FnOnce(&ModelDecoder) -> Result<ModelData, AssetError> + Send + 'static,
    ) -> u64 {
        let decoder = scope.decoder();
        self.submit(scope, label, Apply::Model(request), move || {
            decode(&decoder).map(Decoded::Model)
        })
    }

    /// Loads an equirectangular image as the scene environment and
    /// background. Disposing the scope clears it again.
    pub fn load_environment(&mut self, scope: &LoadScope, path: impl AsRef<Path>) -> u64 {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        self.submit(scope, label, Apply::Environment, move || {
            decode_environment_file(&path).map(Decoded::Environment)
        })
    }

    fn submit(
        &mut self,
        scope: &LoadScope,
        label: String,
        apply: Apply,
        work: impl FnOnce() -> Result<Decoded, AssetError> + Send + 'static,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let done = self.done_tx.clone();
        let span_label = label.clone();
        let job: Job = Box::new(move || {
            let _span = tracing::debug_span!("decode", asset = %span_label).entered();
            let started = Instant::now();
            let result = work();
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "decoded"
            );
            // The loader may already be gone.
            let _ = done.send(Completion { id, result });
        });

        self.pending.insert(
            id,
            PendingLoad {
                scope: scope.clone(),
                label,
                apply,
            },
        );

        match &self.jobs {
            Some(jobs) if !self.workers.is_empty() => {
                if let Err(err) = jobs.send(job) {
                    (err.into_inner())();
                }
            }
            _ => job(),
        }
        id
    }

    /// Applies every finished load without blocking.
    pub fn pump(
        &mut self,
        scene: &mut Scene,
        controls: &mut OrbitControls,
        fov_y_degrees: f32,
    ) -> PumpStats {
        let mut stats = PumpStats::default();
        while let Ok(completion) = self.done_rx.try_recv() {
            self.finish(completion, scene, controls, fov_y_degrees, &mut stats);
        }
        stats
    }

    /// Applies finished loads until none are pending or `timeout` passes.
    pub fn pump_blocking(
        &mut self,
        scene: &mut Scene,
        controls: &mut OrbitControls,
        fov_y_degrees: f32,
        timeout: Duration,
    ) -> PumpStats {
        let deadline = Instant::now() + timeout;
        let mut stats = PumpStats::default();
        while !self.pending.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(left) {
                Ok(completion) => {
                    self.finish(completion, scene, controls, fov_y_degrees, &mut stats)
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(pending = self.pending.len(), "timed out waiting for assets");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        stats
    }

    fn finish(
        &mut self,
        completion: Completion,
        scene: &mut Scene,
        controls: &mut OrbitControls,
        fov_y_degrees: f32,
        stats: &mut PumpStats,
    ) {
        let Some(load) = self.pending.remove(&completion.id) else {
            return;
        };
        if !load.scope.is_live() {
            tracing::debug!(
                asset = %load.label,
                scope = %load.scope.name(),
                "discarding load for disposed scope"
            );
            stats.discarded += 1;
            return;
        }

        match (completion.result, load.apply) {
            (Err(err), _) => {
                tracing::warn!(asset = %load.label, error = %err, "asset load failed");
                stats.failed += 1;
            }
            (Ok(Decoded::Model(model)), Apply::Model(request)) => {
                let parent = request.parent.unwrap_or(scene.root());
                if !scene.contains(parent) {
                    tracing::debug!(asset = %load.label, "parent removed before load finished");
                    stats.discarded += 1;
                    return;
                }
                let root = model.attach(scene, parent, request.transform);
                for o in &request.overrides {
                    scene.visit(root, &mut o.clone());
                }
                load.scope.track(root);
                if request.fit_camera {
                    controls.fit_to_box(scene.bounds(root), fov_y_degrees, true);
                }
                tracing::info!(asset = %load.label, meshes = model.mesh_count(), "model loaded");
                stats.applied += 1;
            }
            (Ok(Decoded::Environment(map)), Apply::Environment) => {
                tracing::info!(
                    asset = %load.label,
                    width = map.width,
                    height = map.height,
                    "environment loaded"
                );
                let map = Arc::new(map);
                scene.environment = Environment::Equirect(map.clone());
                load.scope.set_environment(map);
                stats.applied += 1;
            }
            _ => {
                tracing::warn!(asset = %load.label, "decoded asset does not match its request");
                stats.failed += 1;
            }
        }
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::model::fixtures::SQUARE_STL;
    use crate::mesh::Aabb;
    use crate::scene::SceneNode;

    const WAIT: Duration = Duration::from_secs(5);

    fn stl_bytes() -> Vec<u8> {
        SQUARE_STL.as_bytes().to_vec()
    }

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("uspace-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn model_is_attached_with_overrides_on_pump() {
        let mut loader = AssetLoader::with_workers(2);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("test");
        let group = scene.add_group(scene.root(), "robots", Transform::new());

        let request = ModelRequest::new()
            .under(group)
            .transform(Transform::from_position(glam::Vec3::new(2.0, 0.0, 0.0)))
            .with_override(MaterialOverride::all().metal_rough(0.0, 1.0))
            .shadows(true, true)
            .fit_camera();
        loader.load_model_bytes(&scope, stl_bytes(), ModelFormat::Stl, "square", request);
        let stats = loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);

        assert_eq!(stats.applied, 1);
        assert!(loader.is_idle());
        let root = scene.find("square").unwrap();
        assert_eq!(scene.parent(root), Some(group));
        assert_eq!(scope.nodes(), vec![root]);

        let mut seen = 0;
        scene.visit(root, &mut |_: Entity, _: &str, node: &mut SceneNode| {
            if let Some(mesh) = node.as_mesh_mut() {
                assert_eq!(mesh.material.metal_rough(), (0.0, 1.0));
                assert!(mesh.material.cast_shadow && mesh.material.receive_shadow);
                seen += 1;
            }
        });
        assert_eq!(seen, 1);

        let bounds: Aabb = scene.bounds(root);
        let expected = bounds.size().length() * 0.5 / 25f32.to_radians().sin();
        assert!(!controls.is_settled());
        assert!((controls.goal_position().distance(bounds.center()) - expected).abs() < 1e-3);
    }

    #[test]
    fn teardown_before_completion_leaves_no_nodes() {
        let mut loader = AssetLoader::with_workers(1);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("short-lived");
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        // Blocks until released so teardown happens strictly first.
        loader.submit_model(&scope, "gated".into(), ModelRequest::new(), move |_| {
            let _ = gate_rx.recv();
            decode_model_bytes(SQUARE_STL.as_bytes(), ModelFormat::Stl, "gated")
        });
        let request = ModelRequest::new();
        loader.load_model_bytes(&scope, stl_bytes(), ModelFormat::Stl, "queued", request);

        assert_eq!(scope.dispose(&mut scene), 0);
        gate_tx.send(()).unwrap();
        let stats = loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);

        assert_eq!(stats.applied, 0);
        assert_eq!(stats.discarded, 2);
        assert_eq!(scene.node_count(), 0);
        assert!(scope.nodes().is_empty());
    }

    #[test]
    fn decoder_released_exactly_once() {
        let mut scene = Scene::new();
        let scope = LoadScope::new("scope");
        let decoder = scope.decoder();
        scope.dispose(&mut scene);
        scope.dispose(&mut scene);
        assert_eq!(decoder.release_count(), 1);
        assert!(matches!(
            decoder.decode_bytes(SQUARE_STL.as_bytes(), ModelFormat::Stl, "late"),
            Err(AssetError::DecoderDisposed)
        ));
    }

    #[test]
    fn dispose_removes_loaded_nodes() {
        let mut loader = AssetLoader::with_workers(1);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("scope");
        loader.load_model_bytes(&scope, stl_bytes(), ModelFormat::Stl, "a", ModelRequest::new());
        loader.load_model_bytes(&scope, stl_bytes(), ModelFormat::Stl, "b", ModelRequest::new());
        loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);
        // Each model is a named group plus its mesh.
        assert_eq!(scope.nodes().len(), 2);
        assert_eq!(scene.node_count(), 4);

        assert_eq!(scope.dispose(&mut scene), 4);
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn failed_loads_are_reported_not_applied() {
        let mut loader = AssetLoader::with_workers(1);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("scope");
        loader.load_model(&scope, "/definitely/missing/model.glb", ModelRequest::new());
        let stats = loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);
        assert_eq!(stats.failed, 1);
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn environment_is_cleared_with_its_scope() {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let path = temp_file("env.png", &bytes);

        let mut loader = AssetLoader::with_workers(1);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("env");
        loader.load_environment(&scope, &path);
        loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);
        assert!(matches!(scene.environment, Environment::Equirect(ref map) if map.width == 4));

        scope.dispose(&mut scene);
        assert!(matches!(scene.environment, Environment::None));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn disposing_an_old_scope_keeps_a_newer_environment() {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(2, 1, image::Rgb([1, 2, 3])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let path = temp_file("env-replaced.png", &bytes);

        let mut loader = AssetLoader::with_workers(1);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let first = LoadScope::new("first");
        let second = LoadScope::new("second");
        loader.load_environment(&first, &path);
        loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);
        loader.load_environment(&second, &path);
        loader.pump_blocking(&mut scene, &mut controls, 50.0, WAIT);

        first.dispose(&mut scene);
        assert!(matches!(scene.environment, Environment::Equirect(_)));
        second.dispose(&mut scene);
        assert!(matches!(scene.environment, Environment::None));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn zero_workers_decode_inline() {
        let mut loader = AssetLoader::with_workers(0);
        let mut scene = Scene::new();
        let mut controls = OrbitControls::default();
        let scope = LoadScope::new("inline");
        loader.load_model_bytes(&scope, stl_bytes(), ModelFormat::Stl, "m", ModelRequest::new());
        assert_eq!(loader.pump(&mut scene, &mut controls, 50.0).applied, 1);
    }
}

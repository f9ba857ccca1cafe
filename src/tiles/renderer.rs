use std::collections::HashMap;

use glam::{DMat4, DVec3, Vec3};
use hecs::Entity;

use crate::atmosphere::Geodetic;
use crate::camera::PerspectiveCamera;
use crate::error::TilesError;
use crate::mesh::{Material, Transform};
use crate::scene::{Scene, SceneNode};

use super::plugins::{
    CreasedNormalsPlugin, IonAuthPlugin, MaterialReplacementPlugin, MeshDecompressionPlugin,
    ReorientationPlugin, TileCompressionPlugin, TileFade, TilesFadePlugin, TilesFrame,
    TilesPlugin, UpdateOnChangePlugin,
};
use super::stream::{TileContent, TileEvent, TileKey, TileRequest, TileStream, ViewState};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilesStats {
    pub updates: u64,
    pub skipped: u64,
    pub loaded: u64,
    pub unloaded: u64,
    pub failed: u64,
}

struct TileNode {
    entity: Entity,
    center: DVec3,
    material: Material,
}

/// Drives a [`TileStream`] through an ordered plugin chain and mirrors its
/// resident tiles as mesh nodes under one scene group.
pub struct TilesRenderer<S> {
    stream: S,
    plugins: Vec<Box<dyn TilesPlugin>>,
    frame: TilesFrame,
    request: TileRequest,
    opened: bool,
    group: Option<Entity>,
    tiles: HashMap<TileKey, TileNode>,
    fades: HashMap<TileKey, TileFade>,
    camera_position: Vec3,
    fov_y: f32,
    resolution: (u32, u32),
    stats: TilesStats,
}

impl<S: TileStream> TilesRenderer<S> {
    pub fn new(stream: S, request: TileRequest) -> Self {
        Self {
            stream,
            plugins: Vec::new(),
            frame: TilesFrame::default(),
            request,
            opened: false,
            group: None,
            tiles: HashMap::new(),
            fades: HashMap::new(),
            camera_position: Vec3::ZERO,
            fov_y: 50f32.to_radians(),
            resolution: (1, 1),
            stats: TilesStats::default(),
        }
    }

    /// Registers the standard chain: authentication, decompression,
    /// compression, update suppression, fading, normal smoothing, material
    /// replacement and reorientation.
    pub fn with_default_plugins(
        stream: S,
        request: TileRequest,
        auth: IonAuthPlugin,
    ) -> Result<Self, TilesError> {
        let mut tiles = Self::new(stream, request);
        tiles.register_plugin(Box::new(auth))?;
        tiles.register_plugin(Box::new(MeshDecompressionPlugin))?;
        tiles.register_plugin(Box::new(TileCompressionPlugin))?;
        tiles.register_plugin(Box::new(UpdateOnChangePlugin::new()))?;
        tiles.register_plugin(Box::new(TilesFadePlugin::new()))?;
        tiles.register_plugin(Box::new(CreasedNormalsPlugin::default()))?;
        tiles.register_plugin(Box::new(MaterialReplacementPlugin))?;
        tiles.register_plugin(Box::new(ReorientationPlugin))?;
        Ok(tiles)
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn TilesPlugin>) -> Result<(), TilesError> {
        let name = plugin.name();
        if self.has_plugin(name) {
            return Err(TilesError::Duplicate(name));
        }
        if let Some(&missing) = plugin.dependencies().iter().find(|d| !self.has_plugin(d)) {
            return Err(TilesError::MissingDependency {
                plugin: name,
                requires: missing,
            });
        }
        tracing::debug!(plugin = name, "registered tiles plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn set_camera(&mut self, camera: &PerspectiveCamera) {
        self.camera_position = camera.position;
        self.fov_y = camera.fov.to_radians();
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = (width.max(1), height.max(1));
    }

    /// Re-projects the tile set so `origin` sits at the scene origin. The
    /// most recent call wins, including across tile set reloads.
    pub fn set_origin(&mut self, scene: &mut Scene, origin: Geodetic) {
        self.frame.origin = Some(origin);
        for plugin in &mut self.plugins {
            plugin.origin_changed(&mut self.frame);
        }
        self.reposition(scene);
    }

    /// Transform from tile (ECEF) coordinates into the scene.
    pub fn group_transform(&self) -> DMat4 {
        self.frame.group_transform
    }

    pub fn group(&self) -> Option<Entity> {
        self.group
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stats(&self) -> TilesStats {
        self.stats
    }

    /// Resident tiles, including ones still fading out.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn opacity(&self, key: TileKey) -> Option<f32> {
        self.fades.get(&key).map(|f| f.opacity)
    }

    /// Asks the stream to load the tile set again on the next update.
    pub fn reload(&mut self) {
        self.opened = false;
    }

    fn view(&self) -> ViewState {
        let to_ecef = self.frame.group_transform.inverse();
        ViewState {
            camera_ecef: to_ecef.transform_point3(self.camera_position.as_dvec3()),
            fov_y: self.fov_y,
            resolution: self.resolution,
        }
    }

    fn ensure_group(&mut self, scene: &mut Scene) -> Entity {
        match self.group {
            Some(group) if scene.contains(group) => group,
            _ => {
                let group = scene.add_group(scene.root(), "tiles", Transform::new());
                self.tiles.clear();
                self.fades.clear();
                self.group = Some(group);
                group
            }
        }
    }

    fn tile_transform(&self, center: DVec3) -> Transform {
        let matrix = self.frame.group_transform * DMat4::from_translation(center);
        Transform::from_matrix(matrix.as_mat4())
    }

    fn reposition(&mut self, scene: &mut Scene) {
        for node in self.tiles.values() {
            scene.set_transform(node.entity, self.tile_transform(node.center));
        }
    }

    /// Runs one streaming step. Call once per frame before the scene is
    /// rendered.
    pub fn update(&mut self, scene: &mut Scene, delta: f32) {
        let group = self.ensure_group(scene);

        if !self.opened {
            let mut request = self.request.clone();
            for plugin in &mut self.plugins {
                plugin.prepare_request(&mut request);
            }
            self.stream.open(request);
            self.opened = true;
        }

        let view = self.view();
        let run = self
            .plugins
            .iter_mut()
            .fold(true, |run, plugin| plugin.should_update(&view) && run);
        if run {
            self.stats.updates += 1;
            for event in self.stream.update(&view) {
                self.handle(scene, group, event);
            }
        } else {
            self.stats.skipped += 1;
        }

        self.advance_fades(scene, delta);
    }

    fn handle(&mut self, scene: &mut Scene, group: Entity, event: TileEvent) {
        match event {
            TileEvent::TilesetLoaded => {
                tracing::info!("tile set loaded");
                for plugin in &mut self.plugins {
                    plugin.tileset_loaded(&mut self.frame);
                }
                self.reposition(scene);
            }
            TileEvent::Loaded(tile) => self.add_tile(scene, group, tile),
            TileEvent::Unloaded(key) => {
                self.stats.unloaded += 1;
                let fading = self.plugins.iter().any(|p| p.fades());
                if fading && let Some(fade) = self.fades.get_mut(&key) {
                    fade.target = 0.0;
                } else {
                    self.remove_tile(scene, key);
                }
            }
        }
    }

    fn add_tile(&mut self, scene: &mut Scene, group: Entity, mut tile: TileContent) {
        let key = tile.key;
        for plugin in &mut self.plugins {
            if let Err(err) = plugin.process_tile(&mut tile) {
                tracing::warn!(tile = %key, plugin = plugin.name(), "dropping tile: {err}");
                self.stats.failed += 1;
                return;
            }
        }
        let Some(mesh) = tile.mesh() else {
            tracing::warn!(tile = %key, "dropping tile: geometry is still encoded");
            self.stats.failed += 1;
            return;
        };

        // A tile reloaded mid fade-out replaces the old node.
        self.remove_tile(scene, key);

        let fading = self.plugins.iter().any(|p| p.fades());
        let opacity = if fading { 0.0 } else { 1.0 };
        let mut material = tile.material;
        material.base_color.w = tile.material.base_color.w * opacity;
        let entity = scene.add_mesh(
            group,
            format!("tile {key}"),
            std::sync::Arc::new(mesh.clone()),
            material,
            self.tile_transform(tile.center),
        );
        self.tiles.insert(
            key,
            TileNode {
                entity,
                center: tile.center,
                material: tile.material,
            },
        );
        self.fades.insert(key, TileFade { opacity, target: 1.0 });
        self.stats.loaded += 1;
    }

    fn remove_tile(&mut self, scene: &mut Scene, key: TileKey) {
        if let Some(node) = self.tiles.remove(&key) {
            scene.remove(node.entity);
        }
        self.fades.remove(&key);
    }

    fn advance_fades(&mut self, scene: &mut Scene, delta: f32) {
        let before: HashMap<TileKey, f32> =
            self.fades.iter().map(|(k, f)| (*k, f.opacity)).collect();
        for plugin in &mut self.plugins {
            plugin.advance(delta, &mut self.fades);
        }

        let mut finished = Vec::new();
        for (key, fade) in &self.fades {
            if fade.target <= 0.0 && fade.opacity <= 0.0 {
                finished.push(*key);
                continue;
            }
            if before.get(key) == Some(&fade.opacity) {
                continue;
            }
            if let Some(node) = self.tiles.get(key) {
                let alpha = node.material.base_color.w * fade.opacity;
                scene.visit(node.entity, &mut |_: Entity, _: &str, n: &mut SceneNode| {
                    if let Some(mesh) = n.as_mesh_mut() {
                        mesh.material.base_color.w = alpha;
                    }
                });
            }
        }
        for key in finished {
            self.remove_tile(scene, key);
        }
    }

    /// Removes the tile group and every tile node from `scene`.
    pub fn detach(&mut self, scene: &mut Scene) {
        if let Some(group) = self.group.take() {
            scene.remove(group);
        }
        self.tiles.clear();
        self.fades.clear();
    }
}

//! Tile plugins. Each hooks one stage of the tile life cycle; the adapter
//! calls them in registration order.

use std::collections::HashMap;

use glam::{DMat4, Vec3};

use crate::atmosphere::{Ellipsoid, Geodetic};
use crate::error::TilesError;
use crate::mesh::Material;

use super::stream::{
    TileContent, TileGeometry, TileKey, TileRequest, ViewState, dequantize, quantize,
};

/// Shared state plugins may read and modify.
#[derive(Clone, Debug, PartialEq)]
pub struct TilesFrame {
    /// Maps tile (ECEF) coordinates into the scene.
    pub group_transform: DMat4,
    /// Latest origin requested through `set_origin`.
    pub origin: Option<Geodetic>,
}

impl Default for TilesFrame {
    fn default() -> Self {
        Self {
            group_transform: DMat4::IDENTITY,
            origin: None,
        }
    }
}

/// Per-tile visibility state kept by the adapter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileFade {
    pub opacity: f32,
    pub target: f32,
}

pub trait TilesPlugin {
    fn name(&self) -> &'static str;

    /// Plugins that must be registered before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn prepare_request(&mut self, _request: &mut TileRequest) {}

    /// Returning `false` skips this frame's stream update.
    fn should_update(&mut self, _view: &ViewState) -> bool {
        true
    }

    fn process_tile(&mut self, _tile: &mut TileContent) -> Result<(), TilesError> {
        Ok(())
    }

    fn tileset_loaded(&mut self, _frame: &mut TilesFrame) {}

    fn origin_changed(&mut self, _frame: &mut TilesFrame) {}

    /// Whether tiles should appear and disappear gradually.
    fn fades(&self) -> bool {
        false
    }

    fn advance(&mut self, _delta: f32, _tiles: &mut HashMap<TileKey, TileFade>) {}
}

/// Attaches Cesium ion credentials to the tile set request.
pub struct IonAuthPlugin {
    pub api_token: String,
    pub asset_id: String,
    pub auto_refresh_token: bool,
}

impl IonAuthPlugin {
    pub const NAME: &'static str = "ion_auth";

    pub fn new(api_token: impl Into<String>, asset_id: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            asset_id: asset_id.into(),
            auto_refresh_token: true,
        }
    }
}

impl TilesPlugin for IonAuthPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prepare_request(&mut self, request: &mut TileRequest) {
        if request.url.is_empty() {
            request.url = format!("https://api.cesium.com/v1/assets/{}/endpoint", self.asset_id);
        }
        request.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
        request
            .headers
            .push(("Authorization".into(), format!("Bearer {}", self.api_token)));
    }
}

/// Expands quantized tile geometry into full vertices.
pub struct MeshDecompressionPlugin;

impl MeshDecompressionPlugin {
    pub const NAME: &'static str = "mesh_decompression";
}

impl TilesPlugin for MeshDecompressionPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process_tile(&mut self, tile: &mut TileContent) -> Result<(), TilesError> {
        if let TileGeometry::Encoded(encoded) = &tile.geometry {
            if encoded.indices.iter().any(|&i| i as usize >= encoded.positions.len()) {
                return Err(TilesError::Decode {
                    tile: tile.key.to_string(),
                    reason: "index out of range".into(),
                });
            }
            let mut mesh = encoded.decode();
            // Flat normals until a smoothing plugin replaces them.
            mesh.smooth_normals(0.0);
            tile.geometry = TileGeometry::Mesh(mesh);
        }
        Ok(())
    }
}

/// Snaps decoded positions to a 16-bit grid over the tile bounds and
/// normals to 8-bit steps, and drops texture coordinates. Lossy. Vertices
/// stay `f32`; only their precision changes.
pub struct TileCompressionPlugin;

impl TileCompressionPlugin {
    pub const NAME: &'static str = "tile_compression";
}

impl TilesPlugin for TileCompressionPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[MeshDecompressionPlugin::NAME]
    }

    fn process_tile(&mut self, tile: &mut TileContent) -> Result<(), TilesError> {
        let Some(mesh) = tile.mesh_mut() else {
            return Ok(());
        };
        let bounds = mesh.bounds();
        if bounds.is_empty() {
            return Ok(());
        }
        let (min, extent) = (bounds.min, bounds.size());
        for v in &mut mesh.vertices {
            let q = quantize(Vec3::from(v.position), min, extent);
            v.position = dequantize(q, min, extent).to_array();
            v.normal = v.normal.map(|c| (c.clamp(-1.0, 1.0) * 127.0).round() / 127.0);
            v.uv = [0.0; 2];
        }
        Ok(())
    }
}

/// Skips stream updates while the view is unchanged and no tile arrived
/// since the last update.
#[derive(Default)]
pub struct UpdateOnChangePlugin {
    last: Option<ViewState>,
    dirty: bool,
}

impl UpdateOnChangePlugin {
    pub const NAME: &'static str = "update_on_change";

    pub fn new() -> Self {
        Self::default()
    }
}

impl TilesPlugin for UpdateOnChangePlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn should_update(&mut self, view: &ViewState) -> bool {
        let changed = self.last.as_ref() != Some(view);
        let update = changed || self.dirty;
        self.last = Some(*view);
        self.dirty = false;
        update
    }

    fn process_tile(&mut self, _tile: &mut TileContent) -> Result<(), TilesError> {
        self.dirty = true;
        Ok(())
    }

    fn tileset_loaded(&mut self, _frame: &mut TilesFrame) {
        self.dirty = true;
    }

    fn origin_changed(&mut self, _frame: &mut TilesFrame) {
        self.dirty = true;
    }
}

/// Cross-fades tiles in and out when the LOD changes.
pub struct TilesFadePlugin {
    /// Seconds for a full fade.
    pub duration: f32,
}

impl Default for TilesFadePlugin {
    fn default() -> Self {
        Self { duration: 0.25 }
    }
}

impl TilesFadePlugin {
    pub const NAME: &'static str = "tiles_fade";

    pub fn new() -> Self {
        Self::default()
    }
}

impl TilesPlugin for TilesFadePlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fades(&self) -> bool {
        true
    }

    fn advance(&mut self, delta: f32, tiles: &mut HashMap<TileKey, TileFade>) {
        let step = if self.duration > 0.0 {
            delta / self.duration
        } else {
            1.0
        };
        for fade in tiles.values_mut() {
            if fade.opacity < fade.target {
                fade.opacity = (fade.opacity + step).min(fade.target);
            } else if fade.opacity > fade.target {
                fade.opacity = (fade.opacity - step).max(fade.target);
            }
        }
    }
}

/// Recomputes normals, smoothing across edges flatter than the crease
/// angle so tile seams do not show.
pub struct CreasedNormalsPlugin {
    pub crease_angle: f32,
}

impl Default for CreasedNormalsPlugin {
    fn default() -> Self {
        Self {
            crease_angle: 30f32.to_radians(),
        }
    }
}

impl CreasedNormalsPlugin {
    pub const NAME: &'static str = "creased_normals";
}

impl TilesPlugin for CreasedNormalsPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[MeshDecompressionPlugin::NAME]
    }

    fn process_tile(&mut self, tile: &mut TileContent) -> Result<(), TilesError> {
        if let Some(mesh) = tile.mesh_mut() {
            mesh.smooth_normals(self.crease_angle);
        }
        Ok(())
    }
}

/// Swaps every tile material for a diffuse-only one, keeping its color and
/// shadow flags.
#[derive(Default)]
pub struct MaterialReplacementPlugin;

impl MaterialReplacementPlugin {
    pub const NAME: &'static str = "material_replacement";
}

impl TilesPlugin for MaterialReplacementPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[MeshDecompressionPlugin::NAME]
    }

    fn process_tile(&mut self, tile: &mut TileContent) -> Result<(), TilesError> {
        let old = tile.material;
        tile.material = Material {
            cast_shadow: old.cast_shadow,
            receive_shadow: old.receive_shadow,
            ..Material::lambert(old.base_color)
        };
        Ok(())
    }
}

/// Moves the tile set so a geodetic point becomes the scene origin, with
/// north along +X, up along +Y and east along +Z.
#[derive(Default)]
pub struct ReorientationPlugin;

impl ReorientationPlugin {
    pub const NAME: &'static str = "reorientation";

    fn apply(frame: &mut TilesFrame) {
        if let Some(origin) = frame.origin {
            let ecef = origin.to_ecef(&Ellipsoid::WGS84);
            frame.group_transform = Ellipsoid::WGS84.north_up_east_frame(ecef).inverse();
        }
    }
}

impl TilesPlugin for ReorientationPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn origin_changed(&mut self, frame: &mut TilesFrame) {
        Self::apply(frame);
    }

    fn tileset_loaded(&mut self, frame: &mut TilesFrame) {
        Self::apply(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshData;
    use crate::tiles::stream::EncodedMesh;
    use glam::{DVec3, Vec4};

    fn encoded_tile() -> TileContent {
        TileContent {
            key: TileKey::new(0, 0, 0),
            center: DVec3::ZERO,
            geometry: TileGeometry::Encoded(EncodedMesh::encode(&MeshData::plane(10.0))),
            material: Material::standard(Vec4::new(0.5, 0.6, 0.4, 1.0), 0.3, 0.5),
        }
    }

    #[test]
    fn ion_auth_sets_bearer_token_once() {
        let mut plugin = IonAuthPlugin::new("secret", "2275207");
        let mut request = TileRequest::default();
        plugin.prepare_request(&mut request);
        plugin.prepare_request(&mut request);
        assert_eq!(request.url, "https://api.cesium.com/v1/assets/2275207/endpoint");
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn decompression_produces_mesh_with_normals() {
        let mut tile = encoded_tile();
        MeshDecompressionPlugin.process_tile(&mut tile).unwrap();
        let mesh = tile.mesh().unwrap();
        assert!(mesh.vertices.iter().all(|v| (Vec3::from(v.normal) - Vec3::Y).length() < 1e-5));
    }

    #[test]
    fn decompression_rejects_bad_indices() {
        let mut tile = encoded_tile();
        if let TileGeometry::Encoded(encoded) = &mut tile.geometry {
            encoded.indices.push(99);
        }
        assert!(matches!(
            MeshDecompressionPlugin.process_tile(&mut tile),
            Err(TilesError::Decode { .. })
        ));
    }

    #[test]
    fn compression_snaps_attributes_to_reduced_precision() {
        let mut tile = encoded_tile();
        MeshDecompressionPlugin.process_tile(&mut tile).unwrap();
        if let Some(mesh) = tile.mesh_mut() {
            mesh.vertices[0].normal = [0.3, 0.9, 0.1];
        }
        TileCompressionPlugin.process_tile(&mut tile).unwrap();

        let mesh = tile.mesh().unwrap();
        let bounds = mesh.bounds();
        let (min, extent) = (bounds.min, bounds.size());
        for v in &mesh.vertices {
            assert_eq!(v.uv, [0.0; 2]);
            for c in v.normal {
                let steps = c * 127.0;
                assert!((steps - steps.round()).abs() < 1e-4, "{c}");
            }
            let p = Vec3::from(v.position);
            let snapped = dequantize(quantize(p, min, extent), min, extent);
            assert!((p - snapped).length() < 1e-4);
        }
    }

    #[test]
    fn material_replacement_keeps_color() {
        let mut tile = encoded_tile();
        tile.material.cast_shadow = true;
        MaterialReplacementPlugin.process_tile(&mut tile).unwrap();
        assert_eq!(tile.material.kind, crate::mesh::MaterialKind::Lambert);
        assert_eq!(tile.material.base_color, Vec4::new(0.5, 0.6, 0.4, 1.0));
        assert!(tile.material.cast_shadow);
    }

    #[test]
    fn update_on_change_suppresses_identical_views() {
        let mut plugin = UpdateOnChangePlugin::new();
        let view = ViewState {
            camera_ecef: DVec3::new(1.0, 2.0, 3.0),
            fov_y: 0.8,
            resolution: (640, 480),
        };
        assert!(plugin.should_update(&view));
        assert!(!plugin.should_update(&view));

        let mut tile = encoded_tile();
        plugin.process_tile(&mut tile).unwrap();
        assert!(plugin.should_update(&view));
        assert!(!plugin.should_update(&view));

        let moved = ViewState {
            resolution: (800, 600),
            ..view
        };
        assert!(plugin.should_update(&moved));
    }

    #[test]
    fn fade_moves_toward_target() {
        let mut plugin = TilesFadePlugin { duration: 0.5 };
        let mut tiles = HashMap::new();
        let key = TileKey::new(1, 0, 0);
        tiles.insert(key, TileFade { opacity: 0.0, target: 1.0 });
        plugin.advance(0.25, &mut tiles);
        assert!((tiles[&key].opacity - 0.5).abs() < 1e-6);
        plugin.advance(1.0, &mut tiles);
        assert_eq!(tiles[&key].opacity, 1.0);
    }
}

use std::collections::BTreeSet;

use glam::{DVec3, Vec4};

use crate::atmosphere::{Ellipsoid, Geodetic};
use crate::mesh::{Material, MeshData, Vertex3d};

use super::stream::{
    EncodedMesh, TileContent, TileEvent, TileGeometry, TileKey, TileRequest, TileStream, ViewState,
};

/// Synthetic terrain over a geodetic rectangle, refined as a quadtree by
/// screen-space error.
///
/// Tiles are generated on demand and delivered quantized, so the plugin
/// chain has real decoding work to do.
pub struct ProceduralTerrainStream {
    center: Geodetic,
    /// Width and height of the patch in radians.
    span: f64,
    segments: u32,
    max_level: u8,
    /// Refine while a tile's projected error exceeds this many pixels.
    max_sse: f64,
    request: Option<TileRequest>,
    reload: bool,
    resident: BTreeSet<TileKey>,
}

impl ProceduralTerrainStream {
    pub fn new(center: Geodetic) -> Self {
        Self {
            center,
            span: 0.02_f64.to_radians(),
            segments: 16,
            max_level: 5,
            max_sse: 16.0,
            request: None,
            reload: false,
            resident: BTreeSet::new(),
        }
    }

    pub fn with_span_degrees(mut self, degrees: f64) -> Self {
        self.span = degrees.to_radians();
        self
    }

    pub fn with_max_level(mut self, level: u8) -> Self {
        self.max_level = level;
        self
    }

    pub fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments.max(1);
        self
    }

    /// The request the tile set was last opened with.
    pub fn request(&self) -> Option<&TileRequest> {
        self.request.as_ref()
    }

    pub fn resident(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.resident.iter().copied()
    }

    /// West, south, east and north edges of a tile in radians.
    fn rectangle(&self, key: TileKey) -> (f64, f64, f64, f64) {
        let n = (1u64 << key.level) as f64;
        let size = self.span / n;
        let west = self.center.longitude - self.span * 0.5 + key.x as f64 * size;
        let south = self.center.latitude - self.span * 0.5 + key.y as f64 * size;
        (west, south, west + size, south + size)
    }

    fn height(&self, longitude: f64, latitude: f64) -> f64 {
        let r = Ellipsoid::WGS84.radii.x;
        let north = (latitude - self.center.latitude) * r;
        let east = (longitude - self.center.longitude) * r * self.center.latitude.cos();
        self.center.height
            + 6.0 * (east / 90.0).sin() * (north / 120.0).cos()
            + 2.5 * ((east + north) / 35.0).sin()
    }

    fn tile_center(&self, key: TileKey) -> DVec3 {
        let (w, s, e, n) = self.rectangle(key);
        let (lon, lat) = ((w + e) * 0.5, (s + n) * 0.5);
        Geodetic::new(lon, lat, self.height(lon, lat)).to_ecef(&Ellipsoid::WGS84)
    }

    /// Geometric error in meters: the spacing between grid samples.
    fn geometric_error(&self, key: TileKey) -> f64 {
        let n = (1u64 << key.level) as f64;
        self.span / n * Ellipsoid::WGS84.radii.x / self.segments as f64
    }

    fn screen_space_error(&self, key: TileKey, view: &ViewState) -> f64 {
        let n = (1u64 << key.level) as f64;
        let radius = self.span / n * Ellipsoid::WGS84.radii.x * std::f64::consts::FRAC_1_SQRT_2;
        let distance = ((view.camera_ecef - self.tile_center(key)).length() - radius).max(1.0);
        self.geometric_error(key) / distance * view.sse_denominator()
    }

    fn select(&self, view: &ViewState) -> BTreeSet<TileKey> {
        let mut selected = BTreeSet::new();
        let mut stack = vec![TileKey::new(0, 0, 0)];
        while let Some(key) = stack.pop() {
            if key.level < self.max_level && self.screen_space_error(key, view) > self.max_sse {
                stack.extend(key.children());
            } else {
                selected.insert(key);
            }
        }
        selected
    }

    fn generate(&self, key: TileKey) -> TileContent {
        let (w, s, e, n) = self.rectangle(key);
        let center = self.tile_center(key);
        let steps = self.segments;
        let row = steps + 1;

        let mut vertices = Vec::with_capacity((row * row) as usize);
        for j in 0..=steps {
            let lat = s + (n - s) * j as f64 / steps as f64;
            for i in 0..=steps {
                let lon = w + (e - w) * i as f64 / steps as f64;
                let p = Geodetic::new(lon, lat, self.height(lon, lat)).to_ecef(&Ellipsoid::WGS84);
                let local = (p - center).as_vec3();
                let uv = [i as f32 / steps as f32, j as f32 / steps as f32];
                vertices.push(Vertex3d::new(local.to_array(), [0.0; 3], uv));
            }
        }

        let mut indices = Vec::with_capacity((steps * steps * 6) as usize);
        for j in 0..steps {
            for i in 0..steps {
                let a = j * row + i;
                indices.extend([a, a + 1, a + row]);
                indices.extend([a + 1, a + row + 1, a + row]);
            }
        }

        let mut material = Material::standard(Vec4::new(0.42, 0.47, 0.36, 1.0), 0.0, 0.9);
        material.cast_shadow = true;
        material.receive_shadow = true;

        TileContent {
            key,
            center,
            geometry: TileGeometry::Encoded(EncodedMesh::encode(&MeshData::new(vertices, indices))),
            material,
        }
    }
}

impl TileStream for ProceduralTerrainStream {
    fn open(&mut self, request: TileRequest) {
        tracing::debug!(url = %request.url, "opening procedural tile set");
        self.request = Some(request);
        self.reload = true;
    }

    fn update(&mut self, view: &ViewState) -> Vec<TileEvent> {
        if self.request.is_none() {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.reload {
            self.reload = false;
            events.extend(self.resident.iter().map(|&key| TileEvent::Unloaded(key)));
            self.resident.clear();
            events.push(TileEvent::TilesetLoaded);
        }

        let wanted = self.select(view);
        for &key in self.resident.difference(&wanted) {
            events.push(TileEvent::Unloaded(key));
        }
        for &key in wanted.difference(&self.resident) {
            events.push(TileEvent::Loaded(self.generate(key)));
        }
        self.resident = wanted;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Geodetic {
        Geodetic::from_degrees(30.284658, 120.002982, 8.4)
    }

    fn view_from(height: f64) -> ViewState {
        let camera = Geodetic::new(origin().longitude, origin().latitude, height);
        ViewState {
            camera_ecef: camera.to_ecef(&Ellipsoid::WGS84),
            fov_y: 50f32.to_radians(),
            resolution: (1280, 720),
        }
    }

    fn loaded(events: &[TileEvent]) -> Vec<TileKey> {
        events
            .iter()
            .filter_map(|e| match e {
                TileEvent::Loaded(tile) => Some(tile.key),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_streams_before_open() {
        let mut stream = ProceduralTerrainStream::new(origin());
        assert!(stream.update(&view_from(100.0)).is_empty());
    }

    #[test]
    fn distant_camera_gets_root_only() {
        let mut stream = ProceduralTerrainStream::new(origin());
        stream.open(TileRequest::new("procedural://terrain"));
        let events = stream.update(&view_from(1.0e6));
        assert!(matches!(events[0], TileEvent::TilesetLoaded));
        assert_eq!(loaded(&events), vec![TileKey::new(0, 0, 0)]);
    }

    #[test]
    fn close_camera_refines_and_unloads_parent() {
        let mut stream = ProceduralTerrainStream::new(origin()).with_max_level(3);
        stream.open(TileRequest::new("procedural://terrain"));
        stream.update(&view_from(1.0e6));

        let events = stream.update(&view_from(50.0));
        assert!(events
            .iter()
            .any(|e| matches!(e, TileEvent::Unloaded(k) if *k == TileKey::new(0, 0, 0))));
        let keys = loaded(&events);
        assert!(keys.iter().any(|k| k.level == 3));
        assert!(stream.resident().all(|k| k.level > 0));

        // A stable view produces no further events.
        assert!(stream.update(&view_from(50.0)).is_empty());
    }

    #[test]
    fn reopening_unloads_then_reloads() {
        let mut stream = ProceduralTerrainStream::new(origin());
        stream.open(TileRequest::new("procedural://terrain"));
        stream.update(&view_from(1.0e6));
        stream.open(TileRequest::new("procedural://terrain"));

        let events = stream.update(&view_from(1.0e6));
        assert!(matches!(events[0], TileEvent::Unloaded(_)));
        assert!(matches!(events[1], TileEvent::TilesetLoaded));
        assert_eq!(loaded(&events), vec![TileKey::new(0, 0, 0)]);
    }

    #[test]
    fn tiles_are_encoded_and_centered() {
        let stream = ProceduralTerrainStream::new(origin()).with_segments(4);
        let tile = stream.generate(TileKey::new(0, 0, 0));
        let TileGeometry::Encoded(encoded) = &tile.geometry else {
            panic!("expected encoded geometry");
        };
        assert_eq!(encoded.positions.len(), 25);
        assert_eq!(encoded.indices.len(), 4 * 4 * 6);
        // The patch spans about 2.2 km, so offsets from the center stay small.
        let decoded = encoded.decode();
        let radius = decoded.bounds().size().length();
        assert!(radius < 4_000.0, "{radius}");
    }
}

//! The contract between the adapter and a tile source.

use std::fmt;

use glam::{DVec3, Vec3};

use crate::mesh::{Material, MeshData, Vertex3d};

/// Quadtree address of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub const fn new(level: u8, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    pub fn children(&self) -> [TileKey; 4] {
        let (x, y, level) = (self.x * 2, self.y * 2, self.level + 1);
        [
            TileKey::new(level, x, y),
            TileKey::new(level, x + 1, y),
            TileKey::new(level, x, y + 1),
            TileKey::new(level, x + 1, y + 1),
        ]
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Positions quantized to 16 bits per axis over the tile's bounding box,
/// the way quantized-mesh terrain arrives over the wire. Normals are not
/// transmitted.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedMesh {
    pub min: Vec3,
    pub extent: Vec3,
    pub positions: Vec<[u16; 3]>,
    pub indices: Vec<u32>,
}

impl EncodedMesh {
    pub fn encode(mesh: &MeshData) -> Self {
        let bounds = mesh.bounds();
        let (min, extent) = if bounds.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            (bounds.min, bounds.size())
        };
        let positions = mesh
            .vertices
            .iter()
            .map(|v| quantize(Vec3::from(v.position), min, extent))
            .collect();
        Self {
            min,
            extent,
            positions,
            indices: mesh.indices.clone(),
        }
    }

    pub fn decode(&self) -> MeshData {
        let vertices = self
            .positions
            .iter()
            .map(|&q| {
                let position = dequantize(q, self.min, self.extent).to_array();
                Vertex3d::new(position, [0.0; 3], [0.0; 2])
            })
            .collect();
        MeshData::new(vertices, self.indices.clone())
    }

    pub fn byte_size(&self) -> usize {
        self.positions.len() * 6 + self.indices.len() * 4
    }
}

pub(crate) fn quantize(p: Vec3, min: Vec3, extent: Vec3) -> [u16; 3] {
    let t = ((p - min) / extent.max(Vec3::splat(f32::EPSILON))).clamp(Vec3::ZERO, Vec3::ONE);
    (t * 65535.0).round().to_array().map(|c| c as u16)
}

pub(crate) fn dequantize(q: [u16; 3], min: Vec3, extent: Vec3) -> Vec3 {
    min + Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32) / 65535.0 * extent
}

#[derive(Clone, Debug, PartialEq)]
pub enum TileGeometry {
    Encoded(EncodedMesh),
    Mesh(MeshData),
}

/// One tile as delivered by a stream and transformed by the plugin chain.
#[derive(Clone, Debug)]
pub struct TileContent {
    pub key: TileKey,
    /// ECEF center. Vertex positions are ECEF offsets from it.
    pub center: DVec3,
    pub geometry: TileGeometry,
    pub material: Material,
}

impl TileContent {
    pub fn mesh(&self) -> Option<&MeshData> {
        match &self.geometry {
            TileGeometry::Mesh(mesh) => Some(mesh),
            TileGeometry::Encoded(_) => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut MeshData> {
        match &mut self.geometry {
            TileGeometry::Mesh(mesh) => Some(mesh),
            TileGeometry::Encoded(_) => None,
        }
    }
}

/// Where the tile set is fetched from and with which credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl TileRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Camera state in the stream's frame, used for LOD selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub camera_ecef: DVec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub resolution: (u32, u32),
}

impl ViewState {
    /// Pixels per meter of geometric error at unit distance.
    pub fn sse_denominator(&self) -> f64 {
        let height = self.resolution.1.max(1) as f64;
        height / (2.0 * (self.fov_y as f64 * 0.5).tan())
    }
}

#[derive(Clone, Debug)]
pub enum TileEvent {
    /// The root tile set finished (re)loading. Resident tiles from an
    /// earlier load have been unloaded first.
    TilesetLoaded,
    Loaded(TileContent),
    Unloaded(TileKey),
}

/// A source of streamed tiles.
///
/// Implementations own LOD selection, fetching, retries and caching. The
/// adapter forwards view changes and consumes events; it never retries a
/// failed tile.
pub trait TileStream {
    /// Starts (or restarts) loading the tile set described by `request`.
    fn open(&mut self, request: TileRequest);

    /// Advances streaming for the current view and returns what changed.
    fn update(&mut self, view: &ViewState) -> Vec<TileEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_error_is_bounded_by_grid_step() {
        let mesh = MeshData::sphere(8, 6);
        let encoded = EncodedMesh::encode(&mesh);
        let decoded = encoded.decode();
        let step = encoded.extent / 65535.0;
        for (a, b) in mesh.vertices.iter().zip(&decoded.vertices) {
            let d = (Vec3::from(a.position) - Vec3::from(b.position)).abs();
            assert!(d.cmple(step + Vec3::splat(1e-6)).all(), "{d:?}");
        }
        assert_eq!(decoded.indices, mesh.indices);
        assert!(encoded.byte_size() < mesh.vertices.len() * std::mem::size_of::<Vertex3d>());
    }

    #[test]
    fn keys_subdivide() {
        let children = TileKey::new(1, 1, 0).children();
        assert_eq!(children[0], TileKey::new(2, 2, 0));
        assert_eq!(children[3], TileKey::new(2, 3, 1));
        assert_eq!(TileKey::new(2, 3, 1).to_string(), "2/3/1");
    }
}

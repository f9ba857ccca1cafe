//! CPU-side mesh data, materials and spatial transforms.
//!
//! - [`Vertex3d`] is the vertex format shared by every backend
//! - [`MeshData`] holds triangle geometry and is shared through `Arc`
//! - [`Material`] carries the PBR-ish parameters the geometry pass writes
//!   into the color and metal/rough channels
//! - [`Transform`] places a scene node relative to its parent
//!
//! GPU buffers are never stored here. The wgpu backend uploads a `MeshData`
//! lazily and keys its cache on the `Arc`, so dropping the last scene node
//! that references a mesh is enough to free its buffers.

use glam::{Mat4, Quat, Vec3, Vec4};

/// A vertex with position, normal and texture coordinates.
///
/// | Attribute | Format    | Offset | Shader Location |
/// |-----------|-----------|--------|-----------------|
/// | position  | Float32x3 | 0      | 0               |
/// | normal    | Float32x3 | 12     | 1               |
/// | uv        | Float32x2 | 24     | 2               |
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // normal
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            // uv
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `include` call replaces.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(mut self, other: Aabb) -> Aabb {
        if !other.is_empty() {
            self.include(other.min);
            self.include(other.max);
        }
        self
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// The box enclosing this one after `matrix` is applied to all corners.
    pub fn transformed(&self, matrix: Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.include(matrix.transform_point3(corner));
        }
        out
    }
}

/// Triangle geometry with u32 indices, counter-clockwise front faces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bounds(&self) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for v in &self.vertices {
            aabb.include(Vec3::from(v.position));
        }
        aabb
    }

    /// Bounds of the vertices after `matrix`. Tighter than transforming the
    /// local box when the matrix rotates.
    pub fn bounds_in(&self, matrix: Mat4) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for v in &self.vertices {
            aabb.include(matrix.transform_point3(Vec3::from(v.position)));
        }
        aabb
    }

    /// Unit cube centered at the origin, 4 vertices per face.
    pub fn cube() -> Self {
        #[rustfmt::skip]
        let vertices = vec![
            // Front face (Z+)
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 1.0]),
            // Back face (Z-)
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 0.0]),
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 1.0]),
            // Top face (Y+)
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [0.0, 1.0]),
            // Bottom face (Y-)
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [0.0, 1.0]),
            // Right face (X+)
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 1.0]),
            // Left face (X-)
            Vertex3d::new([-0.5, -0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 1.0]),
        ];

        #[rustfmt::skip]
        let indices: Vec<u32> = vec![
            0,  1,  2,  2,  3,  0,  // front
            4,  5,  6,  6,  7,  4,  // back
            8,  9,  10, 10, 11, 8,  // top
            12, 13, 14, 14, 15, 12, // bottom
            16, 17, 18, 18, 19, 16, // right
            20, 21, 22, 22, 23, 20, // left
        ];

        Self::new(vertices, indices)
    }

    /// UV sphere of radius 0.5.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex3d::new(
                    [x * 0.5, y * 0.5, z * 0.5],
                    [x, y, z],
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;

                indices.extend([current, current + 1, next]);
                indices.extend([current + 1, next + 1, next]);
            }
        }

        Self::new(vertices, indices)
    }

    /// Square plane on XZ facing +Y.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let up = [0.0, 1.0, 0.0];
        let vertices = vec![
            Vertex3d::new([-half, 0.0, -half], up, [0.0, 0.0]),
            Vertex3d::new([-half, 0.0, half], up, [0.0, 1.0]),
            Vertex3d::new([half, 0.0, half], up, [1.0, 1.0]),
            Vertex3d::new([half, 0.0, -half], up, [1.0, 0.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 3, 0])
    }

    /// Recomputes per-vertex normals from face normals. Faces meeting at a
    /// shared vertex position are averaged only when the angle between them
    /// is below `crease_angle` (radians); sharper edges keep a hard normal.
    ///
    /// Vertices are unwelded first so every corner gets its own normal.
    pub fn smooth_normals(&mut self, crease_angle: f32) {
        let tri_count = self.triangle_count();
        if tri_count == 0 {
            return;
        }

        let mut corners = Vec::with_capacity(tri_count * 3);
        let mut face_normals = Vec::with_capacity(tri_count);
        for tri in self.indices.chunks_exact(3) {
            let p: [Vec3; 3] = [0, 1, 2].map(|k| {
                self.vertices
                    .get(tri[k] as usize)
                    .map_or(Vec3::ZERO, |v| Vec3::from(v.position))
            });
            face_normals.push((p[1] - p[0]).cross(p[2] - p[0]).normalize_or_zero());
            for k in 0..3 {
                corners.push(self.vertices.get(tri[k] as usize).copied().unwrap_or(
                    Vertex3d::new(p[k].to_array(), [0.0; 3], [0.0; 2]),
                ));
            }
        }

        // Group corners by quantized position.
        let key = |p: [f32; 3]| p.map(|c| (c * 1.0e4).round() as i64);
        let mut groups: std::collections::HashMap<[i64; 3], Vec<usize>> =
            std::collections::HashMap::new();
        for (i, corner) in corners.iter().enumerate() {
            groups.entry(key(corner.position)).or_default().push(i);
        }

        let cos_crease = crease_angle.cos();
        let mut vertices = corners.clone();
        for members in groups.values() {
            for &i in members {
                let own = face_normals[i / 3];
                let mut sum = Vec3::ZERO;
                for &j in members {
                    let other = face_normals[j / 3];
                    if own.dot(other) >= cos_crease {
                        sum += other;
                    }
                }
                let n = if sum.length_squared() > 0.0 {
                    sum.normalize()
                } else {
                    own
                };
                vertices[i].normal = n.to_array();
            }
        }

        self.indices = (0..vertices.len() as u32).collect();
        self.vertices = vertices;
    }
}

/// Shading model used by the geometry pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialKind {
    /// Metal/rough PBR shading.
    Standard,
    /// Diffuse only. Writes zero metalness and full roughness.
    Lambert,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub kind: MaterialKind,
    pub base_color: Vec4,
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            kind: MaterialKind::Standard,
            base_color: Vec4::ONE,
            metalness: 0.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            cast_shadow: false,
            receive_shadow: false,
        }
    }
}

impl Material {
    pub fn standard(base_color: Vec4, metalness: f32, roughness: f32) -> Self {
        Self {
            base_color,
            metalness,
            roughness,
            ..Self::default()
        }
    }

    pub fn lambert(base_color: Vec4) -> Self {
        Self {
            kind: MaterialKind::Lambert,
            base_color,
            ..Self::default()
        }
    }

    /// Metalness and roughness as written to the metal/rough channel.
    pub fn metal_rough(&self) -> (f32, f32) {
        match self.kind {
            MaterialKind::Standard => (self.metalness, self.roughness),
            MaterialKind::Lambert => (0.0, 1.0),
        }
    }
}

/// Position, rotation and scale, applied in scale → rotate → translate order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Decomposes an affine matrix. Shear is lost.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_bounds_are_unit() {
        let b = MeshData::cube().bounds();
        assert_eq!(b.min, Vec3::splat(-0.5));
        assert_eq!(b.max, Vec3::splat(0.5));
    }

    #[test]
    fn empty_aabb_union_is_identity() {
        let b = MeshData::cube().bounds();
        assert_eq!(Aabb::EMPTY.union(b), b);
        assert_eq!(b.union(Aabb::EMPTY), b);
    }

    #[test]
    fn transformed_bounds_follow_translation() {
        let b = MeshData::cube()
            .bounds()
            .transformed(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(b.center(), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn creased_normals_keep_cube_edges_hard() {
        let mut cube = MeshData::cube();
        cube.smooth_normals(30f32.to_radians());
        for tri in cube.indices.chunks_exact(3) {
            let n0 = Vec3::from(cube.vertices[tri[0] as usize].normal);
            for &i in &tri[1..] {
                assert!((Vec3::from(cube.vertices[i as usize].normal) - n0).length() < 1e-5);
            }
            // Hard faces: each normal is axis aligned.
            assert!((n0.abs().max_element() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn creased_normals_smooth_shallow_angles() {
        // Two triangles folded by 10 degrees along the shared edge x = 0.
        let fold = 10f32.to_radians();
        let v = |p: [f32; 3]| Vertex3d::new(p, [0.0; 3], [0.0; 2]);
        let mut mesh = MeshData::new(
            vec![
                v([0.0, 0.0, 0.0]),
                v([0.0, 0.0, 1.0]),
                v([-1.0, 0.0, 0.0]),
                v([0.0, 0.0, 0.0]),
                v([fold.cos(), fold.sin(), 0.0]),
                v([0.0, 0.0, 1.0]),
            ],
            vec![0, 1, 2, 3, 4, 5],
        );
        mesh.smooth_normals(30f32.to_radians());
        let shared = Vec3::from(mesh.vertices[0].normal);
        let other = Vec3::from(mesh.vertices[3].normal);
        assert!((shared - other).length() < 1e-5);
    }

    #[test]
    fn lambert_writes_rough_dielectric() {
        let m = Material::lambert(Vec4::ONE);
        assert_eq!(m.metal_rough(), (0.0, 1.0));
    }
}

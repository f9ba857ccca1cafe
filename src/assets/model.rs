//! CPU-side model decoding.
//!
//! | Format | Extensions      | Notes                                      |
//! |--------|-----------------|--------------------------------------------|
//! | glTF   | `.glb`, `.gltf` | Triangle primitives, metal/rough factors   |
//! | STL    | `.stl`          | Binary and ASCII, face normals, no UVs     |
//!
//! Draco and meshopt compressed primitives are rejected with
//! [`AssetError::Unsupported`].

use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use hecs::Entity;

use crate::error::AssetError;
use crate::mesh::{Material, MeshData, Transform, Vertex3d};
use crate::scene::Scene;

const UNSUPPORTED_EXTENSIONS: [&str; 2] = ["KHR_draco_mesh_compression", "EXT_meshopt_compression"];

/// One node of a decoded model.
#[derive(Clone, Debug, Default)]
pub struct ModelNode {
    pub name: String,
    pub transform: Transform,
    pub primitives: Vec<(Arc<MeshData>, Material)>,
    pub children: Vec<ModelNode>,
}

impl ModelNode {
    fn count(&self) -> usize {
        self.primitives.len() + self.children.iter().map(ModelNode::count).sum::<usize>()
    }

    fn attach(&self, scene: &mut Scene, parent: Entity) {
        let entity = match self.primitives.as_slice() {
            [(mesh, material)] => {
                scene.add_mesh(parent, self.name.clone(), mesh.clone(), *material, self.transform)
            }
            primitives => {
                let group = scene.add_group(parent, self.name.clone(), self.transform);
                for (i, (mesh, material)) in primitives.iter().enumerate() {
                    scene.add_mesh(
                        group,
                        format!("{}_{i}", self.name),
                        mesh.clone(),
                        *material,
                        Transform::new(),
                    );
                }
                group
            }
        };
        for child in &self.children {
            child.attach(scene, entity);
        }
    }
}

/// A decoded model, ready to attach to a scene.
#[derive(Clone, Debug, Default)]
pub struct ModelData {
    pub name: String,
    pub nodes: Vec<ModelNode>,
}

impl ModelData {
    pub fn mesh_count(&self) -> usize {
        self.nodes.iter().map(ModelNode::count).sum()
    }

    /// Adds the model under `parent` as one group named after the model.
    /// Returns the group.
    pub fn attach(&self, scene: &mut Scene, parent: Entity, transform: Transform) -> Entity {
        let root = scene.add_group(parent, self.name.clone(), transform);
        for node in &self.nodes {
            node.attach(scene, root);
        }
        root
    }
}

/// Supported container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    Gltf,
    Stl,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Result<Self, AssetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "glb" | "gltf" => Ok(Self::Gltf),
            "stl" => Ok(Self::Stl),
            _ => Err(AssetError::UnknownFormat(ext)),
        }
    }
}

/// Decodes a model file, picking the format from the extension.
pub fn decode_model_file(path: &Path) -> Result<ModelData, AssetError> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    decode_model_bytes(&bytes, ModelFormat::from_path(path)?, name)
}

pub fn decode_model_bytes(
    bytes: &[u8],
    format: ModelFormat,
    name: impl Into<String>,
) -> Result<ModelData, AssetError> {
    let name = name.into();
    match format {
        ModelFormat::Gltf => decode_gltf(bytes, name),
        ModelFormat::Stl => decode_stl(&mut std::io::Cursor::new(bytes), name),
    }
}

fn decode_stl<R: Read + Seek>(reader: &mut R, name: String) -> Result<ModelData, AssetError> {
    let stl = stl_io::read_stl(reader).map_err(|e| AssetError::Stl(e.to_string()))?;

    let mut vertices = Vec::with_capacity(stl.faces.len() * 3);
    for face in &stl.faces {
        let normal: [f32; 3] = face.normal.into();
        for &index in &face.vertices {
            let Some(vertex) = stl.vertices.get(index) else {
                return Err(AssetError::Stl(format!("vertex index {index} out of range")));
            };
            vertices.push(Vertex3d::new((*vertex).into(), normal, [0.0, 0.0]));
        }
    }
    let indices = (0..vertices.len() as u32).collect();

    Ok(ModelData {
        nodes: vec![ModelNode {
            name: name.clone(),
            primitives: vec![(Arc::new(MeshData::new(vertices, indices)), Material::default())],
            ..Default::default()
        }],
        name,
    })
}

fn decode_gltf(bytes: &[u8], name: String) -> Result<ModelData, AssetError> {
    let (document, buffers, _images) = gltf::import_slice(bytes)?;
    if let Some(ext) = document
        .extensions_required()
        .find(|ext| UNSUPPORTED_EXTENSIONS.iter().any(|u| u == ext))
    {
        return Err(AssetError::Unsupported {
            mesh: name,
            reason: format!("requires {ext}"),
        });
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next());
    let nodes = match scene {
        Some(scene) => scene
            .nodes()
            .map(|node| gltf_node(&node, &buffers))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(ModelData { name, nodes })
}

fn gltf_node(
    node: &gltf::Node<'_>,
    buffers: &[gltf::buffer::Data],
) -> Result<ModelNode, AssetError> {
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node{}", node.index()));
    let (translation, rotation, scale) = node.transform().decomposed();
    let transform = Transform {
        position: Vec3::from(translation),
        rotation: Quat::from_array(rotation),
        scale: Vec3::from(scale),
    };

    let mut primitives = Vec::new();
    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            primitives.push(gltf_primitive(&name, &primitive, buffers)?);
        }
    }

    let children = node
        .children()
        .map(|child| gltf_node(&child, buffers))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModelNode {
        name,
        transform,
        primitives,
        children,
    })
}

fn gltf_primitive(
    name: &str,
    primitive: &gltf::Primitive<'_>,
    buffers: &[gltf::buffer::Data],
) -> Result<(Arc<MeshData>, Material), AssetError> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return Err(AssetError::Unsupported {
            mesh: name.to_string(),
            reason: format!("primitive mode {:?}", primitive.mode()),
        });
    }

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| AssetError::Unsupported {
            mesh: name.to_string(),
            reason: "no POSITION attribute".into(),
        })?
        .collect();
    let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
    let uvs: Option<Vec<[f32; 2]>> = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().collect());

    let vertices = positions
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let n = normals.as_ref().and_then(|n| n.get(i)).copied().unwrap_or([0.0; 3]);
            let uv = uvs.as_ref().and_then(|t| t.get(i)).copied().unwrap_or([0.0; 2]);
            Vertex3d::new(p, n, uv)
        })
        .collect::<Vec<_>>();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..vertices.len() as u32).collect(),
    };
    if indices.iter().any(|&i| i as usize >= vertices.len()) {
        return Err(AssetError::Unsupported {
            mesh: name.to_string(),
            reason: "index out of range".into(),
        });
    }

    let mut mesh = MeshData::new(vertices, indices);
    if normals.is_none() {
        mesh.smooth_normals(0.0);
    }

    let pbr = primitive.material().pbr_metallic_roughness();
    let material = Material {
        emissive: Vec3::from(primitive.material().emissive_factor()),
        ..Material::standard(
            Vec4::from(pbr.base_color_factor()),
            pbr.metallic_factor(),
            pbr.roughness_factor(),
        )
    };
    Ok((Arc::new(mesh), material))
}

/// Re-bases a Z-up model (robot conventions) into the Y-up scene.
pub fn z_up_to_y_up() -> Mat4 {
    Mat4::from_cols(
        Vec3::X.extend(0.0),
        Vec3::NEG_Z.extend(0.0),
        Vec3::Y.extend(0.0),
        Vec3::ZERO.extend(1.0),
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A two-triangle square in ASCII STL.
    pub const SQUARE_STL: &str = "solid square
facet normal 0 0 1
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 1 1 0
  endloop
endfacet
facet normal 0 0 1
  outer loop
    vertex 0 0 0
    vertex 1 1 0
    vertex 0 1 0
  endloop
endfacet
endsolid square
";

    /// One red triangle as a binary glTF container.
    pub fn triangle_glb() -> Vec<u8> {
        let json = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "name": "tri", "mesh": 0, "translation": [0, 2, 0] }],
  "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }] }],
  "materials": [{ "pbrMetallicRoughness": { "baseColorFactor": [1, 0, 0, 1], "metallicFactor": 0.5, "roughnessFactor": 0.25 } }],
  "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0] }],
  "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
  "buffers": [{ "byteLength": 36 }]
}"#;
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let floats: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let bin: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();

        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"JSON");
        glb.extend_from_slice(&json);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"BIN\0");
        glb.extend_from_slice(&bin);
        glb
    }
}

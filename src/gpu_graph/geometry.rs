//! The geometry pass: shadow map, background and the multi-target G-buffer.
//!
//! # Bind groups
//!
//! - **Group 0**: camera and lights
//! - **Group 1**: environment uniforms and equirect map (shared with aerial perspective)
//! - **Group 2**: per-draw model uniforms, one dynamic-offset slot per draw
//! - **Group 3**: shadow map and comparison sampler

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::mesh::{MaterialKind, MeshData, Vertex3d};
use crate::render_graph::{Channel, FrameView};
use crate::scene::{DirectionalLight, DrawItem, Environment};
use crate::texture::{EnvironmentTexture, RenderTexture, channel_format};

use super::fullscreen::{ENVIRONMENT, load_texture_entry, uniform_entry};

const MAX_LIGHTS: usize = 4;
/// Dynamic offsets must be multiples of the device's uniform alignment.
const MODEL_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniforms {
    view_proj: [[f32; 4]; 4],
    current: [[f32; 4]; 4],
    previous: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    inv_view_proj: [[f32; 4]; 4],
    light_view_proj: [[f32; 4]; 4],
    position: [f32; 3],
    light_count: u32,
    ambient_light: [f32; 3],
    shadows: u32,
    normal_bias: f32,
    time: f32,
    _pad: [f32; 2],
    light_direction: [[f32; 4]; MAX_LIGHTS],
    light_color: [[f32; 4]; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniforms {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
    base_color: [f32; 4],
    emissive: [f32; 4],
    surface: [f32; 4],
}

impl ModelUniforms {
    fn new(draw: &DrawItem) -> Self {
        let material = &draw.material;
        let (metalness, roughness) = material.metal_rough();
        let standard = if material.kind == MaterialKind::Standard {
            1.0
        } else {
            0.0
        };
        Self {
            model: draw.world.to_cols_array_2d(),
            normal: draw.world.inverse().transpose().to_cols_array_2d(),
            base_color: material.base_color.to_array(),
            emissive: material.emissive.extend(standard).to_array(),
            surface: [
                metalness,
                roughness,
                if material.receive_shadow { 1.0 } else { 0.0 },
                0.0,
            ],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct EnvironmentUniforms {
    clear_color: [f32; 4],
    sun_direction: [f32; 3],
    kind: u32,
    intensity: f32,
    _pad: [f32; 3],
}

/// Environment uniforms and map, re-uploaded only when the map changes.
pub(crate) struct EnvironmentBinding {
    pub layout: wgpu::BindGroupLayout,
    pub group: wgpu::BindGroup,
    buffer: wgpu::Buffer,
    texture: EnvironmentTexture,
    uploaded: Option<Weak<crate::scene::EnvironmentMap>>,
}

impl EnvironmentBinding {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("environment"),
            entries: &[uniform_entry(), load_texture_entry(1)],
        });
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("environment uniforms"),
            size: std::mem::size_of::<EnvironmentUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let texture = EnvironmentTexture::placeholder(device, queue);
        let group = Self::bind(device, &layout, &buffer, &texture);
        Self {
            layout,
            group,
            buffer,
            texture,
            uploaded: None,
        }
    }

    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        buffer: &wgpu::Buffer,
        texture: &EnvironmentTexture,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("environment"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
            ],
        })
    }

    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        environment: &Environment,
        clear_color: Vec4,
    ) {
        let mut uniforms = EnvironmentUniforms {
            clear_color: clear_color.to_array(),
            sun_direction: Vec3::Y.to_array(),
            kind: 0,
            intensity: 1.0,
            _pad: [0.0; 3],
        };
        match environment {
            Environment::None => {}
            Environment::Equirect(map) => {
                uniforms.kind = 1;
                let current = self
                    .uploaded
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .is_some_and(|uploaded| Arc::ptr_eq(&uploaded, map));
                if !current {
                    self.texture = EnvironmentTexture::from_map(device, queue, map);
                    self.group = Self::bind(device, &self.layout, &self.buffer, &self.texture);
                    self.uploaded = Some(Arc::downgrade(map));
                    tracing::debug!(
                        width = self.texture.width,
                        height = self.texture.height,
                        "uploaded environment map"
                    );
                }
            }
            Environment::Sky(sky) => {
                uniforms.kind = 2;
                uniforms.sun_direction = sky.sun_direction.to_array();
                uniforms.intensity = sky.intensity;
            }
        }
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&uniforms));
    }
}

struct GpuMesh {
    source: Weak<MeshData>,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct ShadowMap {
    size: u32,
    view: wgpu::TextureView,
    group: wgpu::BindGroup,
}

/// Pipelines, uniform buffers and the mesh cache for geometry passes.
///
/// Shared by every geometry pass the backend allocates; each pass owns only
/// its output textures.
pub(crate) struct GeometryRenderer {
    mesh_pipeline: wgpu::RenderPipeline,
    background_pipeline: wgpu::RenderPipeline,
    shadow_pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_group: wgpu::BindGroup,
    model_layout: wgpu::BindGroupLayout,
    model_buffer: wgpu::Buffer,
    model_group: wgpu::BindGroup,
    model_capacity: u64,
    shadow_layout: wgpu::BindGroupLayout,
    shadow_sampler: wgpu::Sampler,
    /// Bound when no light casts shadows this frame.
    placeholder_shadow: ShadowMap,
    shadow_map: Option<ShadowMap>,
    meshes: HashMap<usize, GpuMesh>,
}

impl GeometryRenderer {
    pub fn new(device: &wgpu::Device, environment: &wgpu::BindGroupLayout) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("geometry"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{ENVIRONMENT}\n{}", include_str!("shaders/geometry.wgsl")).into(),
            ),
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera"),
            entries: &[uniform_entry()],
        });
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camera uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let model_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("model"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<ModelUniforms>() as u64
                    ),
                },
                count: None,
            }],
        });
        let model_capacity = 64;
        let (model_buffer, model_group) =
            Self::model_storage(device, &model_layout, model_capacity);

        let shadow_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let placeholder_shadow = Self::shadow_target(device, &shadow_layout, &shadow_sampler, 1);

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("geometry"),
            bind_group_layouts: &[&camera_layout, environment, &model_layout, &shadow_layout],
            push_constant_ranges: &[],
        });
        let shadow_layout_desc = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow"),
            bind_group_layouts: &[&camera_layout, environment, &model_layout],
            push_constant_ranges: &[],
        });

        let gbuffer_targets: Vec<Option<wgpu::ColorTargetState>> = [
            Channel::Color,
            Channel::Normal,
            Channel::MetalRough,
            Channel::Velocity,
        ]
        .into_iter()
        .map(|channel| {
            Some(wgpu::ColorTargetState {
                format: channel_format(channel),
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

        let mesh_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("geometry mesh"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_mesh"),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_mesh"),
                targets: &gbuffer_targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let background_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("geometry background"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_background"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_background"),
                targets: &gbuffer_targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let shadow_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow"),
            layout: Some(&shadow_layout_desc),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_shadow"),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            mesh_pipeline,
            background_pipeline,
            shadow_pipeline,
            camera_buffer,
            camera_group,
            model_layout,
            model_buffer,
            model_group,
            model_capacity,
            shadow_layout,
            shadow_sampler,
            placeholder_shadow,
            shadow_map: None,
            meshes: HashMap::new(),
        }
    }

    fn model_storage(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("model uniforms"),
            size: capacity * MODEL_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("model"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ModelUniforms>() as u64),
                }),
            }],
        });
        (buffer, group)
    }

    fn shadow_target(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        size: u32,
    ) -> ShadowMap {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow map"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });
        ShadowMap { size, view, group }
    }

    /// Cached meshes still referenced by some scene.
    pub fn cached_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// Drops buffers whose mesh data no scene references anymore.
    fn evict(&mut self) {
        let before = self.meshes.len();
        self.meshes.retain(|_, m| m.source.strong_count() > 0);
        let evicted = before - self.meshes.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted mesh buffers");
        }
    }

    fn upload(&mut self, device: &wgpu::Device, mesh: &Arc<MeshData>) {
        let key = Arc::as_ptr(mesh) as usize;
        if let Some(cached) = self.meshes.get(&key)
            && cached.source.strong_count() > 0
        {
            return;
        }
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.meshes.insert(
            key,
            GpuMesh {
                source: Arc::downgrade(mesh),
                vertices,
                indices,
                index_count: mesh.indices.len() as u32,
            },
        );
    }

    /// Picks the first shadow-casting light when shadows are enabled.
    fn shadow_light(frame: &FrameView<'_>, lights: &[DirectionalLight]) -> Option<(usize, Mat4)> {
        if !frame.shadows {
            return None;
        }
        lights
            .iter()
            .take(MAX_LIGHTS)
            .enumerate()
            .find_map(|(i, light)| light.shadow_view_proj().map(|vp| (i, vp)))
    }

    /// Records the shadow and G-buffer passes. `outputs` holds the pass's
    /// color, depth, normal, metal/rough and velocity targets.
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameView<'_>,
        environment: &wgpu::BindGroup,
        outputs: &[(Channel, RenderTexture)],
    ) {
        let target = |channel: Channel| {
            outputs
                .iter()
                .find(|(c, _)| *c == channel)
                .map(|(_, t)| t.view())
        };
        let (Some(color), Some(depth), Some(normal), Some(metal_rough), Some(velocity)) = (
            target(Channel::Color),
            target(Channel::Depth),
            target(Channel::Normal),
            target(Channel::MetalRough),
            target(Channel::Velocity),
        ) else {
            tracing::warn!("geometry pass is missing an output target");
            return;
        };

        self.evict();
        let draws = frame.scene.collect_draws();
        for draw in &draws {
            self.upload(device, &draw.mesh);
        }

        let needed = draws.len().max(1) as u64;
        if needed > self.model_capacity {
            let capacity = needed.next_power_of_two();
            let (buffer, group) = Self::model_storage(device, &self.model_layout, capacity);
            self.model_buffer = buffer;
            self.model_group = group;
            self.model_capacity = capacity;
        }
        let mut models = vec![0u8; (draws.len() as u64 * MODEL_STRIDE) as usize];
        for (i, draw) in draws.iter().enumerate() {
            let offset = i * MODEL_STRIDE as usize;
            let uniforms = ModelUniforms::new(draw);
            let bytes = bytemuck::bytes_of(&uniforms);
            models[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        if !models.is_empty() {
            queue.write_buffer(&self.model_buffer, 0, &models);
        }

        let camera = frame.camera;
        let lights = frame.scene.directional_lights();
        let shadow = Self::shadow_light(frame, &lights);
        let mut uniforms = CameraUniforms {
            view_proj: (camera.jittered_projection() * camera.view()).to_cols_array_2d(),
            current: camera.view_proj().to_cols_array_2d(),
            previous: camera.previous_view_proj().to_cols_array_2d(),
            view: camera.view().to_cols_array_2d(),
            inv_view_proj: camera.view_proj().inverse().to_cols_array_2d(),
            light_view_proj: shadow
                .map(|(_, vp)| vp)
                .unwrap_or(Mat4::IDENTITY)
                .to_cols_array_2d(),
            position: camera.position.to_array(),
            light_count: lights.len().min(MAX_LIGHTS) as u32,
            ambient_light: frame.scene.ambient_light().to_array(),
            shadows: shadow.is_some() as u32,
            normal_bias: 0.0,
            time: frame.time,
            _pad: [0.0; 2],
            light_direction: [[0.0; 4]; MAX_LIGHTS],
            light_color: [[0.0; 4]; MAX_LIGHTS],
        };
        for (i, light) in lights.iter().take(MAX_LIGHTS).enumerate() {
            let shadowed = shadow.is_some_and(|(s, _)| s == i);
            uniforms.light_direction[i] = light.direction.extend(shadowed as u32 as f32).to_array();
            uniforms.light_color[i] = (light.color * light.intensity).extend(1.0).to_array();
            if shadowed && let Some(settings) = light.shadow {
                uniforms.normal_bias = settings.normal_bias;
            }
        }
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&uniforms));

        if let Some((index, _)) = shadow {
            let size = lights[index].shadow.map_or(1, |s| s.map_size.max(1));
            if self.shadow_map.as_ref().is_none_or(|m| m.size != size) {
                self.shadow_map = Some(Self::shadow_target(
                    device,
                    &self.shadow_layout,
                    &self.shadow_sampler,
                    size,
                ));
            }
            if let Some(map) = &self.shadow_map {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("shadow"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &map.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.shadow_pipeline);
                pass.set_bind_group(0, &self.camera_group, &[]);
                pass.set_bind_group(1, environment, &[]);
                for (i, draw) in draws.iter().enumerate() {
                    if !draw.material.cast_shadow {
                        continue;
                    }
                    self.draw_mesh(&mut pass, i, &draw.mesh);
                }
            }
        }

        let shadow_group = match (&shadow, &self.shadow_map) {
            (Some(_), Some(map)) => &map.group,
            _ => &self.placeholder_shadow.group,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("geometry"),
            color_attachments: &[
                attachment(color, wgpu::Color::TRANSPARENT),
                attachment(
                    normal,
                    wgpu::Color {
                        r: 0.5,
                        g: 0.5,
                        b: 1.0,
                        a: 1.0,
                    },
                ),
                attachment(
                    metal_rough,
                    wgpu::Color {
                        r: 0.0,
                        g: 1.0,
                        b: 0.0,
                        a: 1.0,
                    },
                ),
                attachment(velocity, wgpu::Color::TRANSPARENT),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_bind_group(0, &self.camera_group, &[]);
        pass.set_bind_group(1, environment, &[]);
        pass.set_bind_group(2, &self.model_group, &[0]);
        pass.set_bind_group(3, shadow_group, &[]);
        pass.set_pipeline(&self.background_pipeline);
        pass.draw(0..3, 0..1);

        pass.set_pipeline(&self.mesh_pipeline);
        for (i, draw) in draws.iter().enumerate() {
            self.draw_mesh(&mut pass, i, &draw.mesh);
        }
    }

    fn draw_mesh(&self, pass: &mut wgpu::RenderPass<'_>, index: usize, mesh: &Arc<MeshData>) {
        let Some(gpu) = self.meshes.get(&(Arc::as_ptr(mesh) as usize)) else {
            return;
        };
        if gpu.index_count == 0 {
            return;
        }
        pass.set_bind_group(2, &self.model_group, &[(index as u64 * MODEL_STRIDE) as u32]);
        pass.set_vertex_buffer(0, gpu.vertices.slice(..));
        pass.set_index_buffer(gpu.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..gpu.index_count, 0, 0..1);
    }
}

fn attachment(
    view: &wgpu::TextureView,
    clear: wgpu::Color,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(clear),
            store: wgpu::StoreOp::Store,
        },
        depth_slice: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 560);
        assert_eq!(std::mem::size_of::<ModelUniforms>(), 176);
        assert!(std::mem::size_of::<ModelUniforms>() as u64 <= MODEL_STRIDE);
        assert_eq!(std::mem::size_of::<EnvironmentUniforms>(), 48);
    }

    #[test]
    fn lambert_materials_disable_specular() {
        let draw = DrawItem {
            entity: hecs::World::new().spawn(()),
            mesh: Arc::new(MeshData::cube()),
            material: crate::mesh::Material::lambert(Vec4::ONE),
            world: Mat4::IDENTITY,
        };
        let uniforms = ModelUniforms::new(&draw);
        assert_eq!(uniforms.emissive[3], 0.0);
        assert_eq!(uniforms.surface[..2], [0.0, 1.0]);
    }
}

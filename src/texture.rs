use wgpu::util::DeviceExt;

use crate::render_graph::Channel;
use crate::scene::EnvironmentMap;

/// Storage format for a render graph channel.
pub fn channel_format(channel: Channel) -> wgpu::TextureFormat {
    match channel {
        Channel::Depth => wgpu::TextureFormat::Depth32Float,
        Channel::Normal | Channel::MetalRough => wgpu::TextureFormat::Rgba8Unorm,
        Channel::Color
        | Channel::Velocity
        | Channel::Reflection
        | Channel::Gi
        | Channel::Ao
        | Channel::Bloom => wgpu::TextureFormat::Rgba16Float,
    }
}

/// An offscreen texture that follows the surface size.
#[derive(Debug)]
pub struct RenderTexture {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    label: String,
}

impl RenderTexture {
    /// Usable as an attachment, a `textureLoad` source and a copy endpoint.
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            width: width.max(1),
            height: height.max(1),
            label: label.to_string(),
        }
    }

    /// Recreates the texture when the size changed. Returns whether it did.
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        if self.width == width.max(1) && self.height == height.max(1) {
            return false;
        }
        *self = Self::new(device, width, height, self.format, &self.label);
        true
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn copy_to(&self, encoder: &mut wgpu::CommandEncoder, target: &RenderTexture) {
        encoder.copy_texture_to_texture(
            self.texture.as_image_copy(),
            target.texture.as_image_copy(),
            wgpu::Extent3d {
                width: self.width.min(target.width),
                height: self.height.min(target.height),
                depth_or_array_layers: 1,
            },
        );
    }
}

/// An equirectangular environment map uploaded as `Rgba32Float`.
///
/// The format is not filterable without extra device features, so shaders
/// read it with `textureLoad`.
pub struct EnvironmentTexture {
    pub(crate) view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl EnvironmentTexture {
    pub fn from_map(device: &wgpu::Device, queue: &wgpu::Queue, map: &EnvironmentMap) -> Self {
        let (width, height) = if map.texels.is_empty() {
            (1, 1)
        } else {
            (map.width.max(1), map.height.max(1))
        };
        let data: &[u8] = if map.texels.is_empty() {
            bytemuck::cast_slice(&[[0.0f32; 4]])
        } else {
            bytemuck::cast_slice(&map.texels)
        };
        Self::from_texels(device, queue, width, height, data)
    }

    /// A black 1x1 placeholder bound when the scene has no map.
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::from_texels(device, queue, 1, 1, bytemuck::cast_slice(&[[0.0f32; 4]]))
    }

    fn from_texels(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("environment map"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            view,
            width,
            height,
        }
    }
}

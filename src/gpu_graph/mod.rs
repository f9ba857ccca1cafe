//! The wgpu implementation of [`RenderBackend`].
//!
//! Each allocated pass owns its output textures (and scratch or history
//! textures when its program needs them). Pipelines for the geometry pass
//! and the environment binding are shared by every graph. A frame encodes
//! the scheduled passes into one command buffer, then a display stage
//! applies the [`DisplayTransform`](crate::render_graph::DisplayTransform)
//! while writing the presented channel to the surface.

mod fullscreen;
mod geometry;

use std::collections::HashMap;
use std::sync::Arc;

use winit::window::Window;

use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::render_graph::{
    Channel, ChannelRef, FrameView, PassId, PassKind, PassNode, RenderBackend,
};
use crate::texture::{RenderTexture, channel_format};

use fullscreen::{FullscreenPass, PassUniforms, Source, Stage, StageDesc, Target, operator_index};
use geometry::{EnvironmentBinding, GeometryRenderer};

struct PassResources {
    outputs: Vec<(Channel, RenderTexture)>,
    program: Option<FullscreenPass>,
}

impl PassResources {
    fn output(&self, channel: Channel) -> Option<&RenderTexture> {
        self.outputs
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, t)| t)
    }
}

/// Writes the presented channel to the surface.
struct DisplayStage {
    stage: Stage,
    uniforms: wgpu::Buffer,
}

impl DisplayStage {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("display"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}\n{}", fullscreen::PRELUDE, include_str!("shaders/display.wgsl")).into(),
            ),
        });
        let stage = Stage::new(
            device,
            "display",
            &module,
            StageDesc {
                entry: "fs",
                inputs: vec![Source::Slot("color")],
                target: Target::Outputs,
            },
            &[format],
            None,
        );
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("display uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { stage, uniforms }
    }
}

/// Renders graphs on the GPU into a window surface.
pub struct GpuBackend {
    gpu: GpuContext,
    geometry: GeometryRenderer,
    environment: EnvironmentBinding,
    display: DisplayStage,
    passes: HashMap<PassId, PassResources>,
    detached: bool,
}

impl GpuBackend {
    pub fn new(window: Arc<Window>) -> Result<Self, RenderError> {
        Ok(Self::from_context(GpuContext::new(window)?))
    }

    pub fn from_context(gpu: GpuContext) -> Self {
        let environment = EnvironmentBinding::new(&gpu.device, &gpu.queue);
        let geometry = GeometryRenderer::new(&gpu.device, &environment.layout);
        let display = DisplayStage::new(&gpu.device, gpu.config.format);
        tracing::info!(
            width = gpu.width(),
            height = gpu.height(),
            format = ?gpu.config.format,
            "GPU backend ready"
        );
        Self {
            gpu,
            geometry,
            environment,
            display,
            passes: HashMap::new(),
            detached: false,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn cached_meshes(&self) -> usize {
        self.geometry.cached_meshes()
    }

    fn view(&self, channel: ChannelRef) -> Result<&wgpu::TextureView, RenderError> {
        self.passes
            .get(&channel.pass)
            .and_then(|p| p.output(channel.channel))
            .map(RenderTexture::view)
            .ok_or(RenderError::Unallocated(channel.pass))
    }

    fn encode_fullscreen(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassNode,
        frame: &FrameView<'_>,
    ) -> Result<(), RenderError> {
        let resources = self
            .passes
            .get(&pass.id)
            .ok_or(RenderError::Unallocated(pass.id))?;
        let Some(program) = &resources.program else {
            return Err(RenderError::Unallocated(pass.id));
        };

        let (width, height) = self.size();
        let uniforms = PassUniforms::new(frame, width, height, program.frame_params());
        self.gpu
            .queue
            .write_buffer(&program.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let outputs: Vec<&wgpu::TextureView> =
            resources.outputs.iter().map(|(_, t)| t.view()).collect();
        for stage in &program.stages {
            let mut inputs = Vec::with_capacity(stage.desc.inputs.len());
            for source in &stage.desc.inputs {
                let view = match source {
                    Source::Slot(slot) => {
                        let channel = pass.input(slot).ok_or(RenderError::Unallocated(pass.id))?;
                        self.view(channel)?
                    }
                    Source::Scratch => program
                        .scratch
                        .as_ref()
                        .map(RenderTexture::view)
                        .ok_or(RenderError::Unallocated(pass.id))?,
                    Source::History => program
                        .history
                        .as_ref()
                        .map(RenderTexture::view)
                        .ok_or(RenderError::Unallocated(pass.id))?,
                };
                inputs.push(view);
            }
            let targets = match stage.desc.target {
                Target::Outputs => outputs.clone(),
                Target::Scratch => program
                    .scratch
                    .as_ref()
                    .map(|s| vec![s.view()])
                    .ok_or(RenderError::Unallocated(pass.id))?,
            };
            let environment = program.uses_environment.then_some(&self.environment.group);
            stage.draw(
                &self.gpu.device,
                encoder,
                &program.uniforms,
                &inputs,
                &targets,
                environment,
            );
        }

        if let (Some(history), Some((_, output))) = (&program.history, resources.outputs.first()) {
            output.copy_to(encoder, history);
        }
        Ok(())
    }

    fn encode_display(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameView<'_>,
        target: &wgpu::TextureView,
    ) -> Result<(), RenderError> {
        let presented = self.view(frame.output)?;
        let srgb_encode = if self.gpu.is_srgb() { 0.0 } else { 1.0 };
        let (width, height) = self.size();
        let uniforms = PassUniforms::screen(
            width,
            height,
            [
                operator_index(frame.display.operator),
                frame.display.exposure,
                srgb_encode,
                0.0,
            ],
        );
        self.gpu
            .queue
            .write_buffer(&self.display.uniforms, 0, bytemuck::bytes_of(&uniforms));
        self.display.stage.draw(
            &self.gpu.device,
            encoder,
            &self.display.uniforms,
            &[presented],
            &[target],
            None,
        );
        Ok(())
    }
}

impl RenderBackend for GpuBackend {
    fn size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.size() {
            return;
        }
        self.gpu.resize(width, height);
        let device = &self.gpu.device;
        for resources in self.passes.values_mut() {
            for (_, texture) in &mut resources.outputs {
                texture.ensure_size(device, width, height);
            }
            if let Some(program) = &mut resources.program {
                program.resize(device, width, height);
            }
        }
        tracing::debug!(width, height, "resized GPU targets");
    }

    fn allocate(&mut self, pass: &PassNode) -> Result<(), RenderError> {
        let (width, height) = self.size();
        let device = &self.gpu.device;
        let outputs = pass
            .outputs()
            .iter()
            .map(|&channel| {
                let label = format!("{}/{}", pass.label, channel.name());
                (
                    channel,
                    RenderTexture::new(device, width, height, channel_format(channel), &label),
                )
            })
            .collect();
        let program = fullscreen::describe(&pass.kind).map(|desc| {
            FullscreenPass::new(
                device,
                &pass.label,
                pass.kind,
                desc,
                (width, height),
                &self.environment.layout,
            )
        });
        self.passes.insert(pass.id, PassResources { outputs, program });
        tracing::debug!(pass = %pass.label, kind = pass.kind.name(), "allocated GPU pass");
        Ok(())
    }

    fn release(&mut self, pass: PassId) {
        if self.passes.remove(&pass).is_some() {
            tracing::debug!(?pass, "released GPU pass");
        }
    }

    fn render(&mut self, frame: &FrameView<'_>) -> Result<(), RenderError> {
        if self.detached {
            return Ok(());
        }
        let schedule = frame.schedule();
        for pass in &schedule {
            if !self.passes.contains_key(&pass.id) {
                return Err(RenderError::Unallocated(pass.id));
            }
        }

        let surface_texture = match self.gpu.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.gpu.reconfigure();
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        let surface_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.environment.update(
            &self.gpu.device,
            &self.gpu.queue,
            &frame.scene.environment,
            frame.scene.clear_color,
        );

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });

        for pass in &schedule {
            if pass.kind == PassKind::Geometry {
                let resources = self
                    .passes
                    .get(&pass.id)
                    .ok_or(RenderError::Unallocated(pass.id))?;
                self.geometry.encode(
                    &self.gpu.device,
                    &self.gpu.queue,
                    &mut encoder,
                    frame,
                    &self.environment.group,
                    &resources.outputs,
                );
            } else {
                self.encode_fullscreen(&mut encoder, pass, frame)?;
            }
        }
        self.encode_display(&mut encoder, frame, &surface_view)?;

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();

        for pass in &schedule {
            if let Some(program) = self
                .passes
                .get_mut(&pass.id)
                .and_then(|r| r.program.as_mut())
                && program.history.is_some()
            {
                program.history_valid = true;
            }
        }
        Ok(())
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.passes.clear();
            tracing::debug!("GPU backend detached");
        }
    }
}

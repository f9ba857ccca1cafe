//! Fullscreen post-processing programs.
//!
//! Every pass after geometry is one or two fragment stages drawn over the
//! prelude's fullscreen triangle. A stage reads graph channels, the pass's
//! scratch texture or its history, and writes either the pass outputs or the
//! scratch texture.

use glam::Mat4;

use crate::render_graph::{CompositeParams, FrameView, PassKind, ToneMapOperator};
use crate::texture::{RenderTexture, channel_format};

pub(crate) const PRELUDE: &str = include_str!("shaders/prelude.wgsl");
pub(crate) const ENVIRONMENT: &str = include_str!("shaders/environment.wgsl");

/// Uniforms shared by every fullscreen stage. Mirrors `PassUniforms` in the
/// prelude.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct PassUniforms {
    pub proj: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub resolution: [f32; 2],
    pub time: f32,
    pub frame: f32,
    pub params0: [f32; 4],
    pub params1: [f32; 4],
}

impl PassUniforms {
    pub fn new(frame: &FrameView<'_>, width: u32, height: u32, params: [[f32; 4]; 2]) -> Self {
        let proj = frame.camera.projection();
        Self {
            proj: proj.to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            inv_view: frame.camera.view().inverse().to_cols_array_2d(),
            resolution: [width as f32, height as f32],
            time: frame.time,
            frame: frame.frame_index as f32,
            params0: params[0],
            params1: params[1],
        }
    }

    /// Uniforms for a blit that only needs the resolution and params.
    pub fn screen(width: u32, height: u32, params: [f32; 4]) -> Self {
        let identity = Mat4::IDENTITY.to_cols_array_2d();
        Self {
            proj: identity,
            inv_proj: identity,
            inv_view: identity,
            resolution: [width as f32, height as f32],
            time: 0.0,
            frame: 0.0,
            params0: params,
            params1: [0.0; 4],
        }
    }
}

/// Operator index understood by `tone_map` in the prelude.
pub(crate) fn operator_index(op: Option<ToneMapOperator>) -> f32 {
    match op {
        Some(ToneMapOperator::AcesFilmic) => 0.0,
        Some(ToneMapOperator::Agx) => 1.0,
        Some(ToneMapOperator::Reinhard) => 2.0,
        None => 3.0,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    Slot(&'static str),
    Scratch,
    History,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    Outputs,
    Scratch,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StageDesc {
    pub entry: &'static str,
    pub inputs: Vec<Source>,
    pub target: Target,
}

/// Everything needed to build a pass's pipelines.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ProgramDesc {
    pub source: String,
    pub stages: Vec<StageDesc>,
    pub uses_environment: bool,
    pub uses_history: bool,
    pub params: [[f32; 4]; 2],
}

impl ProgramDesc {
    fn single(body: &str, inputs: Vec<Source>, params: [[f32; 4]; 2]) -> Self {
        Self {
            source: format!("{PRELUDE}\n{body}"),
            stages: vec![StageDesc {
                entry: "fs",
                inputs,
                target: Target::Outputs,
            }],
            uses_environment: false,
            uses_history: false,
            params,
        }
    }

    pub fn uses_scratch(&self) -> bool {
        self.stages.iter().any(|s| s.target == Target::Scratch)
    }
}

fn slots(names: &[&'static str]) -> Vec<Source> {
    names.iter().copied().map(Source::Slot).collect()
}

/// The program for a post-processing pass, or `None` for geometry.
pub(crate) fn describe(kind: &PassKind) -> Option<ProgramDesc> {
    let desc = match kind {
        PassKind::Geometry => return None,
        PassKind::Reflection(p) => ProgramDesc {
            source: format!("{PRELUDE}\n{}", include_str!("shaders/ssr.wgsl")),
            stages: vec![
                StageDesc {
                    entry: "fs_trace",
                    inputs: slots(&["color", "depth", "normal", "metalrough"]),
                    target: Target::Scratch,
                },
                StageDesc {
                    entry: "fs_blur",
                    inputs: vec![Source::Scratch],
                    target: Target::Outputs,
                },
            ],
            uses_environment: false,
            uses_history: false,
            params: [
                [p.max_distance, p.thickness, p.steps as f32, p.blur_quality as f32],
                [0.0; 4],
            ],
        },
        PassKind::GlobalIllumination(p) => ProgramDesc::single(
            include_str!("shaders/ssgi.wgsl"),
            slots(&["color", "depth", "normal"]),
            [
                [
                    p.slice_count as f32,
                    p.step_count as f32,
                    p.radius,
                    p.gi_intensity,
                ],
                [p.ao_intensity, 0.0, 0.0, 0.0],
            ],
        ),
        PassKind::Bloom(p) => {
            let radius = (p.radius * 8.0).round().max(1.0);
            ProgramDesc {
                source: format!("{PRELUDE}\n{}", include_str!("shaders/bloom.wgsl")),
                stages: vec![
                    StageDesc {
                        entry: "fs_horizontal",
                        inputs: slots(&["color"]),
                        target: Target::Scratch,
                    },
                    StageDesc {
                        entry: "fs_vertical",
                        inputs: vec![Source::Scratch],
                        target: Target::Outputs,
                    },
                ],
                uses_environment: false,
                uses_history: false,
                params: [[p.strength, radius, p.threshold, radius / 2.0], [0.0; 4]],
            }
        }
        PassKind::Composite(p) => ProgramDesc::single(
            &composite_source(*p),
            kind.required_slots().into_iter().map(Source::Slot).collect(),
            [[0.0; 4]; 2],
        ),
        PassKind::AerialPerspective(p) => {
            let mut desc = ProgramDesc::single(
                &format!(
                    "{ENVIRONMENT}\n{}",
                    include_str!("shaders/aerial_perspective.wgsl")
                ),
                slots(&["color", "depth"]),
                [
                    [
                        p.world_to_meters,
                        p.rayleigh_density,
                        p.mie_density,
                        p.inscatter_strength,
                    ],
                    [0.0; 4],
                ],
            );
            desc.uses_environment = true;
            desc
        }
        PassKind::LensFlare(p) => ProgramDesc::single(
            include_str!("shaders/lens_flare.wgsl"),
            slots(&["color"]),
            [
                [p.threshold, p.intensity, p.ghost_count as f32, p.ghost_spacing],
                [p.halo_width, 0.0, 0.0, 0.0],
            ],
        ),
        PassKind::ToneMap(p) => ProgramDesc::single(
            include_str!("shaders/tone_map.wgsl"),
            slots(&["color"]),
            [
                [operator_index(Some(p.operator)), p.exposure, 0.0, 0.0],
                [0.0; 4],
            ],
        ),
        PassKind::TemporalAa(p) => {
            let mut desc = ProgramDesc::single(
                include_str!("shaders/temporal_aa.wgsl"),
                vec![
                    Source::Slot("color"),
                    Source::Slot("velocity"),
                    Source::History,
                ],
                [[p.history_weight, 0.0, 0.0, 0.0], [0.0; 4]],
            );
            desc.uses_history = true;
            desc
        }
        PassKind::Dither => ProgramDesc::single(
            include_str!("shaders/dither.wgsl"),
            slots(&["color"]),
            [[0.0; 4]; 2],
        ),
    };
    Some(desc)
}

/// Composite shader with bindings only for the enabled channels.
pub(crate) fn composite_source(params: CompositeParams) -> String {
    let mut bindings = vec!["color"];
    let mut body = String::from("    var out = c.rgb;\n");
    if params.gi {
        bindings.extend(["gi", "ao"]);
        body.push_str("    let ao = textureLoad(ao_tex, p, 0).x;\n");
        body.push_str("    out = c.rgb * ao + c.rgb * textureLoad(gi_tex, p, 0).rgb;\n");
    }
    if params.bloom {
        bindings.push("bloom");
        body.push_str("    out += textureLoad(bloom_tex, p, 0).rgb;\n");
    }
    if params.reflection {
        bindings.push("reflection");
        body.push_str("    let r = textureLoad(reflection_tex, p, 0);\n");
        body.push_str("    out = mix(out, r.rgb, clamp(r.a, 0.0, 1.0));\n");
    }

    let mut source = String::new();
    for (i, name) in bindings.iter().enumerate() {
        source.push_str(&format!(
            "@group(0) @binding({}) var {name}_tex: texture_2d<f32>;\n",
            i + 1
        ));
    }
    source.push_str("\n@fragment\nfn fs(in: VsOut) -> @location(0) vec4f {\n");
    source.push_str("    let p = vec2i(in.position.xy);\n");
    source.push_str("    let c = textureLoad(color_tex, p, 0);\n");
    source.push_str(&body);
    source.push_str("    return vec4f(out, c.a);\n}\n");
    source
}

/// A compiled stage.
pub(crate) struct Stage {
    pub desc: StageDesc,
    pub pipeline: wgpu::RenderPipeline,
    pub layout: wgpu::BindGroupLayout,
}

pub(crate) fn uniform_entry() -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// An unfilterable 2D texture read with `textureLoad`.
pub(crate) fn load_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

impl Stage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        desc: StageDesc,
        targets: &[wgpu::TextureFormat],
        environment: Option<&wgpu::BindGroupLayout>,
    ) -> Self {
        let mut entries = vec![uniform_entry()];
        entries.extend((0..desc.inputs.len() as u32).map(|i| load_texture_entry(i + 1)));
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let mut groups = vec![&layout];
        groups.extend(environment);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        });
        let targets: Vec<Option<wgpu::ColorTargetState>> = targets
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(desc.entry),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        Self {
            desc,
            pipeline,
            layout,
        }
    }

    /// Draws the fullscreen triangle into `targets`.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        uniforms: &wgpu::Buffer,
        inputs: &[&wgpu::TextureView],
        targets: &[&wgpu::TextureView],
        environment: Option<&wgpu::BindGroup>,
    ) {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }];
        entries.extend(
            inputs
                .iter()
                .enumerate()
                .map(|(i, view)| wgpu::BindGroupEntry {
                    binding: i as u32 + 1,
                    resource: wgpu::BindingResource::TextureView(view),
                }),
        );
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.desc.entry),
            layout: &self.layout,
            entries: &entries,
        });

        let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.desc.entry),
            color_attachments: &attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        if let Some(env) = environment {
            pass.set_bind_group(1, env, &[]);
        }
        pass.draw(0..3, 0..1);
    }
}

/// Pipelines and size-dependent textures of one post-processing pass.
pub(crate) struct FullscreenPass {
    pub kind: PassKind,
    pub stages: Vec<Stage>,
    pub uniforms: wgpu::Buffer,
    pub params: [[f32; 4]; 2],
    pub uses_environment: bool,
    pub scratch: Option<RenderTexture>,
    pub history: Option<RenderTexture>,
    pub history_valid: bool,
}

impl FullscreenPass {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        kind: PassKind,
        desc: ProgramDesc,
        size: (u32, u32),
        environment: &wgpu::BindGroupLayout,
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });
        let outputs: Vec<wgpu::TextureFormat> =
            kind.outputs().iter().map(|&c| channel_format(c)).collect();
        let scratch_format = [wgpu::TextureFormat::Rgba16Float];
        let uses_scratch = desc.uses_scratch();
        let env_layout = desc.uses_environment.then_some(environment);

        let stages = desc
            .stages
            .into_iter()
            .map(|stage| {
                let targets: &[wgpu::TextureFormat] = match stage.target {
                    Target::Outputs => &outputs,
                    Target::Scratch => &scratch_format,
                };
                let stage_label = format!("{label}/{}", stage.entry);
                Stage::new(device, &stage_label, &module, stage, targets, env_layout)
            })
            .collect();

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (w, h) = size;
        Self {
            kind,
            stages,
            uniforms,
            params: desc.params,
            uses_environment: desc.uses_environment,
            scratch: uses_scratch
                .then(|| RenderTexture::new(device, w, h, scratch_format[0], "scratch")),
            history: desc.uses_history.then(|| {
                RenderTexture::new(device, w, h, channel_format(kind.outputs()[0]), "history")
            }),
            history_valid: false,
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if let Some(scratch) = &mut self.scratch {
            scratch.ensure_size(device, width, height);
        }
        if let Some(history) = &mut self.history
            && history.ensure_size(device, width, height)
        {
            self.history_valid = false;
        }
    }

    /// Params with per-frame state folded in.
    pub fn frame_params(&self) -> [[f32; 4]; 2] {
        let mut params = self.params;
        if matches!(self.kind, PassKind::TemporalAa(_)) {
            params[0][1] = if self.history_valid { 1.0 } else { 0.0 };
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::{PipelineConfig, build_pipeline};

    #[test]
    fn composite_binds_only_enabled_channels() {
        let src = composite_source(CompositeParams {
            gi: false,
            bloom: true,
            reflection: false,
        });
        assert!(src.contains("@binding(1) var color_tex"));
        assert!(src.contains("@binding(2) var bloom_tex"));
        assert!(!src.contains("gi_tex"));
        assert!(!src.contains("ao_tex"));
        assert!(!src.contains("reflection_tex"));
    }

    #[test]
    fn composite_binding_order_matches_required_slots() {
        let params = CompositeParams {
            gi: true,
            bloom: true,
            reflection: true,
        };
        let src = composite_source(params);
        for (i, slot) in PassKind::Composite(params).required_slots().iter().enumerate() {
            assert!(src.contains(&format!("@binding({}) var {slot}_tex", i + 1)), "{slot}");
        }
    }

    #[test]
    fn every_post_pass_has_a_program_that_reads_bound_slots() {
        let built = build_pipeline(&PipelineConfig::atmosphere()).unwrap();
        for pass in built.graph.passes() {
            let Some(desc) = describe(&pass.kind) else {
                assert_eq!(pass.kind, PassKind::Geometry);
                continue;
            };
            for stage in &desc.stages {
                for input in &stage.inputs {
                    if let Source::Slot(slot) = input {
                        assert!(pass.input(slot).is_some(), "{} reads {slot}", pass.label);
                    }
                }
            }
            assert_eq!(desc.uses_scratch(), desc.stages.len() > 1);
        }
    }

    #[test]
    fn bloom_sigma_is_half_the_radius() {
        let desc = describe(&PassKind::Bloom(Default::default())).unwrap();
        let [strength, radius, threshold, sigma] = desc.params[0];
        assert_eq!(strength, 0.05);
        assert_eq!(radius, 6.0);
        assert_eq!(threshold, 0.99);
        assert_eq!(sigma, 3.0);
    }

    #[test]
    fn display_operator_indices_are_distinct() {
        let ops = [
            operator_index(Some(ToneMapOperator::AcesFilmic)),
            operator_index(Some(ToneMapOperator::Agx)),
            operator_index(Some(ToneMapOperator::Reinhard)),
            operator_index(None),
        ];
        for (i, a) in ops.iter().enumerate() {
            for b in &ops[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<PassUniforms>(), 240);
    }
}

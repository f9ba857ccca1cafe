//! The fixed-order post-processing pipeline.
//!
//! Every scene in the viewer is a configuration of the same builder. The
//! stages always appear in this order, and disabled stages are simply absent
//! from the graph:
//!
//! ```text
//! geometry ─┬─ ssr ──────────┐
//!           ├─ ssgi (gi, ao) ├─ composite ─ aerial ─ flare ─ tone map ─ taa ─ dither
//!           └─ bloom ────────┘
//! ```
//!
//! When GI, bloom and reflections are all disabled no composite pass is
//! built and the geometry color flows straight to the next stage.

use serde::Deserialize;

use crate::error::GraphError;

use super::channel::{Channel, ChannelRef, PassId};
use super::graph::{RenderGraph, RenderGraphBuilder};
use super::pass::{
    AerialPerspectiveParams, BloomParams, CompositeParams, LensFlareParams, PassKind, SsgiParams,
    SsrParams, TaaParams, ToneMapParams,
};

/// Which optional stages run, and with which parameters.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reflections: Option<SsrParams>,
    pub global_illumination: Option<SsgiParams>,
    pub bloom: Option<BloomParams>,
    pub aerial_perspective: Option<AerialPerspectiveParams>,
    pub lens_flare: Option<LensFlareParams>,
    pub tone_mapping: Option<ToneMapParams>,
    pub temporal_aa: Option<TaaParams>,
    pub dithering: bool,
}

impl PipelineConfig {
    /// Geometry output only.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Reflections, GI, bloom and TAA with the showcase tuning.
    pub fn screen_space_effects() -> Self {
        Self {
            reflections: Some(SsrParams::default()),
            global_illumination: Some(SsgiParams::default()),
            bloom: Some(BloomParams::default()),
            temporal_aa: Some(TaaParams::default()),
            ..Self::default()
        }
    }

    /// Aerial perspective, lens flare, AgX tone mapping, TAA and dithering.
    pub fn atmosphere() -> Self {
        Self {
            aerial_perspective: Some(AerialPerspectiveParams::default()),
            lens_flare: Some(LensFlareParams::default()),
            tone_mapping: Some(ToneMapParams::default()),
            temporal_aa: Some(TaaParams::default()),
            dithering: true,
            ..Self::default()
        }
    }

    pub fn with_reflections(mut self, params: SsrParams) -> Self {
        self.reflections = Some(params);
        self
    }

    pub fn with_global_illumination(mut self, params: SsgiParams) -> Self {
        self.global_illumination = Some(params);
        self
    }

    pub fn with_bloom(mut self, params: BloomParams) -> Self {
        self.bloom = Some(params);
        self
    }

    pub fn with_temporal_aa(mut self, params: TaaParams) -> Self {
        self.temporal_aa = Some(params);
        self
    }

    pub fn without_temporal_aa(mut self) -> Self {
        self.temporal_aa = None;
        self
    }

    /// Whether the tone-mapping stage is part of the graph. The presenter
    /// skips its own output tone mapping in that case.
    pub fn tone_maps(&self) -> bool {
        self.tone_mapping.is_some()
    }
}

/// A built pipeline graph and the outputs a presenter may switch between.
#[derive(Debug)]
pub struct BuiltPipeline {
    pub graph: RenderGraph,
    pub geometry: PassId,
    /// Output with every enabled stage applied.
    pub full: ChannelRef,
    /// The raw geometry-pass color.
    pub raw: ChannelRef,
    /// Whether `full` is already tone mapped.
    pub tone_mapped: bool,
}

/// Builds the pipeline graph for `config`.
pub fn build_pipeline(config: &PipelineConfig) -> Result<BuiltPipeline, GraphError> {
    let mut b = RenderGraphBuilder::new();

    let scene = b.add_pass("scene", PassKind::Geometry, &[])?;
    let color = scene.channel(Channel::Color);
    let depth = scene.channel(Channel::Depth);
    let normal = scene.channel(Channel::Normal);

    let reflection = config
        .reflections
        .map(|params| {
            b.add_pass(
                "ssr",
                PassKind::Reflection(params),
                &[
                    ("color", color),
                    ("depth", depth),
                    ("normal", normal),
                    ("metalrough", scene.channel(Channel::MetalRough)),
                ],
            )
        })
        .transpose()?;

    let gi = config
        .global_illumination
        .map(|params| {
            b.add_pass(
                "ssgi",
                PassKind::GlobalIllumination(params),
                &[("color", color), ("depth", depth), ("normal", normal)],
            )
        })
        .transpose()?;

    let bloom = config
        .bloom
        .map(|params| b.add_pass("bloom", PassKind::Bloom(params), &[("color", color)]))
        .transpose()?;

    let composite = CompositeParams {
        gi: gi.is_some(),
        bloom: bloom.is_some(),
        reflection: reflection.is_some(),
    };

    let mut current = color;
    if !composite.is_passthrough() {
        let mut inputs = vec![("color", color)];
        if let Some(gi) = gi {
            inputs.push(("gi", gi.channel(Channel::Gi)));
            inputs.push(("ao", gi.channel(Channel::Ao)));
        }
        if let Some(bloom) = bloom {
            inputs.push(("bloom", bloom.channel(Channel::Bloom)));
        }
        if let Some(reflection) = reflection {
            inputs.push(("reflection", reflection.channel(Channel::Reflection)));
        }
        current = b
            .add_pass("composite", PassKind::Composite(composite), &inputs)?
            .channel(Channel::Color);
    }

    if let Some(params) = config.aerial_perspective {
        current = b
            .add_pass(
                "aerial_perspective",
                PassKind::AerialPerspective(params),
                &[("color", current), ("depth", depth)],
            )?
            .channel(Channel::Color);
    }

    if let Some(params) = config.lens_flare {
        current = b
            .add_pass("lens_flare", PassKind::LensFlare(params), &[("color", current)])?
            .channel(Channel::Color);
    }

    if let Some(params) = config.tone_mapping {
        current = b
            .add_pass("tone_map", PassKind::ToneMap(params), &[("color", current)])?
            .channel(Channel::Color);
    }

    if let Some(params) = config.temporal_aa {
        current = b
            .add_pass(
                "taa",
                PassKind::TemporalAa(params),
                &[
                    ("color", current),
                    ("depth", depth),
                    ("velocity", scene.channel(Channel::Velocity)),
                ],
            )?
            .channel(Channel::Color);
    }

    if config.dithering {
        current = b
            .add_pass("dither", PassKind::Dither, &[("color", current)])?
            .channel(Channel::Color);
    }

    let graph = b.build(current)?;
    tracing::debug!(passes = graph.len(), "built render pipeline");

    Ok(BuiltPipeline {
        graph,
        geometry: scene,
        full: current,
        raw: color,
        tone_mapped: config.tone_maps(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(built: &BuiltPipeline) -> Vec<&'static str> {
        built.graph.passes().iter().map(|p| p.kind.name()).collect()
    }

    #[test]
    fn all_optional_stages_disabled_presents_geometry_color() {
        let built = build_pipeline(&PipelineConfig::plain()).unwrap();
        assert_eq!(kinds(&built), vec!["geometry"]);
        assert_eq!(built.full, built.raw);
        assert_eq!(built.full, built.geometry.channel(Channel::Color));
    }

    #[test]
    fn screen_space_effects_follow_fixed_order() {
        let built = build_pipeline(&PipelineConfig::screen_space_effects()).unwrap();
        assert_eq!(
            kinds(&built),
            vec!["geometry", "ssr", "ssgi", "bloom", "composite", "taa"]
        );
        assert_eq!(built.graph.output(), built.full);
        assert!(!built.tone_mapped);
    }

    #[test]
    fn atmosphere_chain_follows_fixed_order() {
        let built = build_pipeline(&PipelineConfig::atmosphere()).unwrap();
        assert_eq!(
            kinds(&built),
            vec![
                "geometry",
                "aerial_perspective",
                "lens_flare",
                "tone_map",
                "taa",
                "dither"
            ]
        );
        assert!(built.tone_mapped);
    }

    #[test]
    fn composite_binds_only_enabled_channels() {
        let config = PipelineConfig::plain().with_bloom(BloomParams::default());
        let built = build_pipeline(&config).unwrap();
        let composite = built
            .graph
            .passes()
            .iter()
            .find(|p| p.kind.name() == "composite")
            .unwrap();
        let slots: Vec<_> = composite.inputs().iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec!["color", "bloom"]);
    }

    #[test]
    fn taa_alone_reads_geometry_color_directly() {
        let config = PipelineConfig::plain().with_temporal_aa(TaaParams::default());
        let built = build_pipeline(&config).unwrap();
        let taa = built.graph.pass(built.full.pass).unwrap();
        assert_eq!(taa.input("color"), Some(built.raw));
    }

    #[test]
    fn config_parses_from_json() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "global_illumination": { "gi_intensity": 2.0 }, "temporal_aa": {} }"#,
        )
        .unwrap();
        assert_eq!(config.global_illumination.unwrap().gi_intensity, 2.0);
        assert!(config.temporal_aa.is_some());
        assert!(config.bloom.is_none());
    }
}

//! Typed pass nodes and their tunable parameters.
//!
//! Every [`PassKind`] knows which input slots it requires and which channels
//! it writes. [`RenderGraphBuilder`](super::RenderGraphBuilder) uses that to
//! reject miswired graphs before any GPU work happens.

use serde::Deserialize;

use super::channel::{Channel, ChannelRef, PassId};

/// Screen-space reflection parameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SsrParams {
    /// Maximum ray length in world units.
    pub max_distance: f32,
    /// Depth tolerance for a ray/depth-buffer hit.
    pub thickness: f32,
    /// Roughness-driven blur quality, 0 disables the blur.
    pub blur_quality: u32,
    /// Ray march step count.
    pub steps: u32,
}

impl Default for SsrParams {
    fn default() -> Self {
        Self {
            max_distance: 10.0,
            thickness: 0.15,
            blur_quality: 1,
            steps: 48,
        }
    }
}

/// Screen-space global illumination parameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SsgiParams {
    pub slice_count: u32,
    pub step_count: u32,
    /// Sampling radius in world units.
    pub radius: f32,
    pub gi_intensity: f32,
    pub ao_intensity: f32,
}

impl Default for SsgiParams {
    fn default() -> Self {
        Self {
            slice_count: 2,
            step_count: 8,
            radius: 2.0,
            gi_intensity: 4.0,
            ao_intensity: 0.8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BloomParams {
    pub strength: f32,
    /// Blur radius as a fraction of the maximum kernel size.
    pub radius: f32,
    /// Luminance above which pixels bloom.
    pub threshold: f32,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            strength: 0.05,
            radius: 0.8,
            threshold: 0.99,
        }
    }
}

/// Which optional channels the composite pass combines. Derived by the
/// pipeline builder from the enabled passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CompositeParams {
    pub gi: bool,
    pub bloom: bool,
    pub reflection: bool,
}

impl CompositeParams {
    pub fn is_passthrough(&self) -> bool {
        !(self.gi || self.bloom || self.reflection)
    }
}

/// Distance-based atmospheric attenuation and in-scatter.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AerialPerspectiveParams {
    /// Scene units to meters.
    pub world_to_meters: f32,
    /// Rayleigh extinction at sea level per meter.
    pub rayleigh_density: f32,
    /// Mie extinction at sea level per meter.
    pub mie_density: f32,
    /// Multiplier on the in-scattered light.
    pub inscatter_strength: f32,
}

impl Default for AerialPerspectiveParams {
    fn default() -> Self {
        Self {
            world_to_meters: 1.0,
            rayleigh_density: 1.2e-5,
            mie_density: 2.0e-6,
            inscatter_strength: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LensFlareParams {
    /// Luminance above which pixels feed ghosts and halo.
    pub threshold: f32,
    pub intensity: f32,
    pub ghost_count: u32,
    pub ghost_spacing: f32,
    pub halo_width: f32,
}

impl Default for LensFlareParams {
    fn default() -> Self {
        Self {
            threshold: 4.0,
            intensity: 0.02,
            ghost_count: 4,
            ghost_spacing: 0.3,
            halo_width: 0.45,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapOperator {
    AcesFilmic,
    Agx,
    Reinhard,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToneMapParams {
    pub operator: ToneMapOperator,
    pub exposure: f32,
}

impl Default for ToneMapParams {
    fn default() -> Self {
        Self {
            operator: ToneMapOperator::Agx,
            exposure: 8.0,
        }
    }
}

/// Temporal anti-aliasing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaaParams {
    /// Weight of the reprojected history, in `[0, 1)`.
    pub history_weight: f32,
    /// Sub-pixel projection jitter.
    pub jitter: bool,
}

impl Default for TaaParams {
    fn default() -> Self {
        Self {
            history_weight: 0.9,
            jitter: true,
        }
    }
}

/// The operation a pass performs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PassKind {
    /// Rasterizes the scene into multiple render targets.
    Geometry,
    Reflection(SsrParams),
    GlobalIllumination(SsgiParams),
    Bloom(BloomParams),
    Composite(CompositeParams),
    AerialPerspective(AerialPerspectiveParams),
    LensFlare(LensFlareParams),
    ToneMap(ToneMapParams),
    TemporalAa(TaaParams),
    Dither,
}

impl PassKind {
    pub fn name(&self) -> &'static str {
        match self {
            PassKind::Geometry => "geometry",
            PassKind::Reflection(_) => "ssr",
            PassKind::GlobalIllumination(_) => "ssgi",
            PassKind::Bloom(_) => "bloom",
            PassKind::Composite(_) => "composite",
            PassKind::AerialPerspective(_) => "aerial_perspective",
            PassKind::LensFlare(_) => "lens_flare",
            PassKind::ToneMap(_) => "tone_map",
            PassKind::TemporalAa(_) => "taa",
            PassKind::Dither => "dither",
        }
    }

    /// Channels this pass writes.
    pub fn outputs(&self) -> &'static [Channel] {
        match self {
            PassKind::Geometry => &[
                Channel::Color,
                Channel::Depth,
                Channel::Normal,
                Channel::MetalRough,
                Channel::Velocity,
            ],
            PassKind::Reflection(_) => &[Channel::Reflection],
            PassKind::GlobalIllumination(_) => &[Channel::Gi, Channel::Ao],
            PassKind::Bloom(_) => &[Channel::Bloom],
            PassKind::Composite(_)
            | PassKind::AerialPerspective(_)
            | PassKind::LensFlare(_)
            | PassKind::ToneMap(_)
            | PassKind::TemporalAa(_)
            | PassKind::Dither => &[Channel::Color],
        }
    }

    /// Input slots that must be bound, in binding order.
    pub fn required_slots(&self) -> Vec<&'static str> {
        match self {
            PassKind::Geometry => Vec::new(),
            PassKind::Reflection(_) => vec!["color", "depth", "normal", "metalrough"],
            PassKind::GlobalIllumination(_) => vec!["color", "depth", "normal"],
            PassKind::Bloom(_) => vec!["color"],
            PassKind::Composite(params) => {
                let mut slots = vec!["color"];
                if params.gi {
                    slots.extend(["gi", "ao"]);
                }
                if params.bloom {
                    slots.push("bloom");
                }
                if params.reflection {
                    slots.push("reflection");
                }
                slots
            }
            PassKind::AerialPerspective(_) => vec!["color", "depth"],
            PassKind::LensFlare(_) | PassKind::ToneMap(_) | PassKind::Dither => vec!["color"],
            PassKind::TemporalAa(_) => vec!["color", "depth", "velocity"],
        }
    }

    pub fn produces(&self, channel: Channel) -> bool {
        self.outputs().contains(&channel)
    }
}

/// One node of a render graph.
#[derive(Clone, Debug)]
pub struct PassNode {
    pub id: PassId,
    pub label: String,
    pub kind: PassKind,
    pub(crate) inputs: Vec<(&'static str, ChannelRef)>,
}

impl PassNode {
    /// The channel bound to `slot`, if any.
    pub fn input(&self, slot: &str) -> Option<ChannelRef> {
        self.inputs
            .iter()
            .find(|(name, _)| *name == slot)
            .map(|(_, r)| *r)
    }

    pub fn inputs(&self) -> &[(&'static str, ChannelRef)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &'static [Channel] {
        self.kind.outputs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_composite_needs_only_color() {
        let kind = PassKind::Composite(CompositeParams::default());
        assert_eq!(kind.required_slots(), vec!["color"]);
    }

    #[test]
    fn composite_slots_follow_enabled_channels() {
        let kind = PassKind::Composite(CompositeParams {
            gi: true,
            bloom: false,
            reflection: true,
        });
        assert_eq!(kind.required_slots(), vec!["color", "gi", "ao", "reflection"]);
    }

    #[test]
    fn ssgi_defaults_match_showcase_tuning() {
        let p = SsgiParams::default();
        assert_eq!((p.slice_count, p.step_count), (2, 8));
        assert_eq!(p.gi_intensity, 4.0);
        assert_eq!(p.ao_intensity, 0.8);
    }

    #[test]
    fn params_deserialize_with_partial_fields() {
        let p: SsrParams = serde_json::from_str(r#"{ "max_distance": 4.0 }"#).unwrap();
        assert_eq!(p.max_distance, 4.0);
        assert_eq!(p.thickness, SsrParams::default().thickness);
    }
}

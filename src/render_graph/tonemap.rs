//! Tone-mapping curves shared by the reference backend and the display
//! transform. The WGSL in `gpu_graph/shaders/prelude.wgsl` mirrors these.

use glam::{Mat3, Vec3};

use super::pass::ToneMapOperator;

/// Final transform applied when writing the presented channel to the screen.
/// Skipped when the presented output already went through a tone-map pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayTransform {
    pub operator: Option<ToneMapOperator>,
    pub exposure: f32,
}

impl Default for DisplayTransform {
    fn default() -> Self {
        Self {
            operator: Some(ToneMapOperator::AcesFilmic),
            exposure: 0.8,
        }
    }
}

impl DisplayTransform {
    pub const IDENTITY: DisplayTransform = DisplayTransform {
        operator: None,
        exposure: 1.0,
    };

    pub fn apply(&self, rgb: Vec3) -> Vec3 {
        match self.operator {
            Some(op) => tone_map(op, rgb, self.exposure),
            None => rgb * self.exposure,
        }
    }
}

pub fn tone_map(op: ToneMapOperator, rgb: Vec3, exposure: f32) -> Vec3 {
    let c = rgb.max(Vec3::ZERO) * exposure;
    match op {
        ToneMapOperator::AcesFilmic => aces_filmic(c),
        ToneMapOperator::Agx => agx(c),
        ToneMapOperator::Reinhard => (c / (Vec3::ONE + c)).clamp(Vec3::ZERO, Vec3::ONE),
    }
}

fn aces_filmic(color: Vec3) -> Vec3 {
    let input = Mat3::from_cols(
        Vec3::new(0.59719, 0.07600, 0.02840),
        Vec3::new(0.35458, 0.90834, 0.13383),
        Vec3::new(0.04823, 0.01566, 0.83777),
    );
    let output = Mat3::from_cols(
        Vec3::new(1.60475, -0.10208, -0.00327),
        Vec3::new(-0.53108, 1.10813, -0.07276),
        Vec3::new(-0.07367, -0.00605, 1.07602),
    );
    let v = input * (color / 0.6);
    let a = v * (v + 0.0245786) - 0.000090537;
    let b = v * (0.983729 * v + 0.4329510) + 0.238081;
    (output * (a / b)).clamp(Vec3::ZERO, Vec3::ONE)
}

fn agx(color: Vec3) -> Vec3 {
    const MIN_EV: f32 = -12.47393;
    const MAX_EV: f32 = 4.026069;

    let srgb_to_rec2020 = Mat3::from_cols(
        Vec3::new(0.6274, 0.0691, 0.0164),
        Vec3::new(0.3293, 0.9195, 0.0880),
        Vec3::new(0.0433, 0.0113, 0.8956),
    );
    let rec2020_to_srgb = Mat3::from_cols(
        Vec3::new(1.6605, -0.1246, -0.0182),
        Vec3::new(-0.5876, 1.1329, -0.1006),
        Vec3::new(-0.0728, -0.0083, 1.1187),
    );
    let inset = Mat3::from_cols(
        Vec3::new(0.856627153315983, 0.137318972929847, 0.11189821299995),
        Vec3::new(0.0951212405381588, 0.761241990602591, 0.0767994186031903),
        Vec3::new(0.0482516061458583, 0.101439036467562, 0.811302368396859),
    );
    let outset = Mat3::from_cols(
        Vec3::new(1.1271005818144368, -0.1413297634984383, -0.14132976349843826),
        Vec3::new(-0.11060664309660323, 1.157823702216272, -0.11060664309660294),
        Vec3::new(-0.016493938717834573, -0.016493938717834257, 1.2519364065950405),
    );

    let c = (inset * (srgb_to_rec2020 * color)).max(Vec3::splat(1e-10));
    let c = ((c.map(f32::log2) - MIN_EV) / (MAX_EV - MIN_EV)).clamp(Vec3::ZERO, Vec3::ONE);
    let c = c.map(agx_contrast);
    let c = (outset * c).max(Vec3::ZERO).powf(2.2);
    (rec2020_to_srgb * c).clamp(Vec3::ZERO, Vec3::ONE)
}

fn agx_contrast(x: f32) -> f32 {
    let x2 = x * x;
    let x4 = x2 * x2;
    15.5 * x4 * x2 - 40.14 * x4 * x + 31.96 * x4 - 6.868 * x2 * x + 0.4298 * x2 + 0.1191 * x
        - 0.00232
}

/// Relative luminance of linear Rec.709 color.
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

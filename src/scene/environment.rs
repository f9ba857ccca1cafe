//! Scene background and image-based ambient light.

use std::sync::Arc;

use glam::{Vec3, Vec4};

/// An equirectangular radiance map in linear RGB.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    /// Row-major, top row first, alpha unused.
    pub texels: Vec<[f32; 4]>,
}

impl EnvironmentMap {
    /// Nearest-texel lookup for a world direction (+Y up).
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        if self.width == 0 || self.height == 0 {
            return Vec3::ZERO;
        }
        let d = dir.normalize_or_zero();
        let u = 0.5 + d.z.atan2(d.x) / std::f32::consts::TAU;
        let v = d.y.clamp(-1.0, 1.0).acos() / std::f32::consts::PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let t = self.texels[(y * self.width + x) as usize];
        Vec3::new(t[0], t[1], t[2])
    }
}

/// Analytic sky lit by the sun and moon, in scene-local directions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sky {
    pub sun_direction: Vec3,
    pub moon_direction: Vec3,
    /// Radiance scale. The atmosphere scene renders in physical-ish units and
    /// relies on exposure in the tone-mapping pass.
    pub intensity: f32,
}

impl Default for Sky {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::Y,
            moon_direction: -Vec3::Y,
            intensity: 1.0,
        }
    }
}

const ZENITH: Vec3 = Vec3::new(0.18, 0.34, 0.72);
const HORIZON: Vec3 = Vec3::new(0.62, 0.72, 0.86);
const GROUND: Vec3 = Vec3::new(0.16, 0.15, 0.14);

impl Sky {
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        let d = dir.normalize_or_zero();
        let sun = self.sun_direction.normalize_or_zero();
        // Daylight fades out over the last few degrees below the horizon.
        let day = ((sun.y + 0.1) / 0.3).clamp(0.0, 1.0);

        let base = if d.y >= 0.0 {
            HORIZON.lerp(ZENITH, d.y.sqrt())
        } else {
            HORIZON.lerp(GROUND, (-d.y).sqrt())
        };
        let cos_sun = d.dot(sun).max(0.0);
        let glow = Vec3::new(1.0, 0.8, 0.6) * cos_sun.powi(8) * 0.5;
        let disk = if cos_sun > 0.9995 { Vec3::splat(20.0) } else { Vec3::ZERO };
        let night = Vec3::new(0.002, 0.003, 0.008);

        ((base + glow + disk) * day + night) * self.intensity
    }
}

#[derive(Clone, Debug, Default)]
pub enum Environment {
    /// Solid clear color, no ambient light beyond the scene's lights.
    #[default]
    None,
    Equirect(Arc<EnvironmentMap>),
    Sky(Sky),
}

impl Environment {
    /// Background radiance seen along `dir`, or `clear` when there is none.
    pub fn background(&self, dir: Vec3, clear: Vec4) -> Vec4 {
        match self {
            Environment::None => clear,
            Environment::Equirect(map) => map.sample(dir).extend(1.0),
            Environment::Sky(sky) => sky.sample(dir).extend(1.0),
        }
    }

    /// Ambient irradiance for a surface facing `normal`.
    pub fn ambient(&self, normal: Vec3) -> Vec3 {
        match self {
            Environment::None => Vec3::ZERO,
            // Blend toward the upper hemisphere so normals grazing the ground
            // still pick up some sky.
            Environment::Equirect(map) => map.sample((normal + Vec3::Y * 0.5).normalize_or_zero()),
            Environment::Sky(sky) => sky.sample((normal + Vec3::Y * 0.5).normalize_or_zero()) * 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equirect_lookup_hits_poles() {
        let map = EnvironmentMap {
            width: 2,
            height: 2,
            texels: vec![
                [1.0, 0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
            ],
        };
        assert_eq!(map.sample(Vec3::Y), Vec3::X);
        assert_eq!(map.sample(-Vec3::Y), Vec3::Z);
    }

    #[test]
    fn sky_is_dark_when_sun_is_down() {
        let sky = Sky {
            sun_direction: -Vec3::Y,
            ..Sky::default()
        };
        assert!(sky.sample(Vec3::Y).max_element() < 0.01);
        let day = Sky::default();
        assert!(day.sample(Vec3::Y).max_element() > 0.3);
    }
}

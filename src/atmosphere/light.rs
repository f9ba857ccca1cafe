use glam::Vec3;

use crate::scene::{DirectionalLight, ShadowSettings};

use super::context::AtmosphereContext;

/// Shadow-casting directional light that follows the sun.
///
/// The light orbits its target at a fixed distance; the orthographic shadow
/// frustum is sized for the area around the origin, not the whole tile set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunLight {
    pub target: Vec3,
    pub distance: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub shadow: ShadowSettings,
    direction: Vec3,
}

impl Default for SunLight {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 80.0,
            color: Vec3::ONE,
            intensity: 3.0,
            shadow: ShadowSettings {
                map_size: 4096,
                near: 1.0,
                far: 500.0,
                left: -60.0,
                right: 60.0,
                bottom: -60.0,
                top: 60.0,
                normal_bias: 0.1,
            },
            direction: Vec3::Y,
        }
    }
}

impl SunLight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points the light at the context's current sun.
    pub fn update(&mut self, context: &AtmosphereContext) {
        let direction = context.sun_direction_world().as_vec3();
        if direction != Vec3::ZERO {
            self.direction = direction;
        }
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn position(&self) -> Vec3 {
        self.target + self.direction * self.distance
    }

    /// Whether the sun is above the horizon. Below it the light is dark.
    pub fn is_up(&self) -> bool {
        self.direction.y > 0.0
    }

    pub fn light(&self) -> DirectionalLight {
        DirectionalLight {
            direction: self.direction,
            color: self.color,
            intensity: if self.is_up() { self.intensity } else { 0.0 },
            distance: self.distance,
            target: self.target,
            shadow: Some(self.shadow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::{Geodetic, SceneDate};

    #[test]
    fn follows_context_sun() {
        let ctx = AtmosphereContext::new(
            Geodetic::from_degrees(30.284658, 120.002982, 8.4),
            SceneDate::from_local(2025, 6, 21, 15, 30, 8.0),
        );
        let mut sun = SunLight::new();
        sun.update(&ctx);

        let light = sun.light();
        assert!((light.direction - ctx.sun_direction_world().as_vec3()).length() < 1e-6);
        assert!((light.position().length() - 80.0).abs() < 1e-3);
        let shadow = light.shadow.unwrap();
        assert_eq!(shadow.map_size, 4096);
        assert_eq!((shadow.near, shadow.far), (1.0, 500.0));
        assert!(light.shadow_view_proj().is_some());
        assert!(light.intensity > 0.0);
    }

    #[test]
    fn dark_at_night() {
        let ctx = AtmosphereContext::new(
            Geodetic::from_degrees(30.284658, 120.002982, 8.4),
            SceneDate::from_local(2025, 6, 21, 1, 0, 8.0),
        );
        let mut sun = SunLight::new();
        sun.update(&ctx);
        assert!(!sun.is_up());
        assert_eq!(sun.light().intensity, 0.0);
    }
}

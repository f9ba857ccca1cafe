use glam::{DMat3, DMat4, DVec3, Vec3};

use crate::camera::PerspectiveCamera;
use crate::scene::Sky;

use super::astronomy::{SceneDate, eci_to_ecef, moon_direction_eci, sun_direction_eci};
use super::ellipsoid::{Ellipsoid, Geodetic};

/// Quantities that depend only on the geodetic origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OriginFrame {
    pub origin: Geodetic,
    pub position_ecef: DVec3,
    /// Scene (Y-up, X north, Z east) to ECEF.
    pub world_to_ecef: DMat4,
    pub ecef_to_world: DMat4,
}

impl OriginFrame {
    pub fn compute(origin: Geodetic, ellipsoid: &Ellipsoid) -> Self {
        let position_ecef = origin.to_ecef(ellipsoid);
        let world_to_ecef = ellipsoid.north_up_east_frame(position_ecef);
        Self {
            origin,
            position_ecef,
            world_to_ecef,
            ecef_to_world: world_to_ecef.inverse(),
        }
    }
}

/// Quantities that depend only on the date.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ephemeris {
    pub date: SceneDate,
    pub eci_to_ecef: DMat3,
    pub sun_direction_ecef: DVec3,
    pub moon_direction_ecef: DVec3,
}

impl Ephemeris {
    pub fn compute(date: SceneDate) -> Self {
        let eci_to_ecef = eci_to_ecef(date);
        Self {
            date,
            eci_to_ecef,
            sun_direction_ecef: eci_to_ecef * sun_direction_eci(date),
            moon_direction_ecef: eci_to_ecef * moon_direction_eci(date),
        }
    }
}

/// Sun, moon and Earth-frame state shared by the sky, the sun light and the
/// aerial perspective pass.
///
/// Origin matrices are computed once in [`new`](Self::new). The ephemeris is
/// recomputed by [`set_date`](Self::set_date) only when the date actually
/// changes, so driving it from a live clock every frame is cheap when the
/// clock is coarse and correct when it is not.
#[derive(Clone, Debug)]
pub struct AtmosphereContext {
    frame: OriginFrame,
    ephemeris: Ephemeris,
    camera_position: Vec3,
    updates: u64,
}

impl AtmosphereContext {
    pub fn new(origin: Geodetic, date: SceneDate) -> Self {
        Self {
            frame: OriginFrame::compute(origin, &Ellipsoid::WGS84),
            ephemeris: Ephemeris::compute(date),
            camera_position: Vec3::ZERO,
            updates: 1,
        }
    }

    /// Returns whether the ephemeris was recomputed.
    pub fn set_date(&mut self, date: SceneDate) -> bool {
        if date == self.ephemeris.date {
            return false;
        }
        self.ephemeris = Ephemeris::compute(date);
        self.updates += 1;
        tracing::trace!(jd = date.julian_date(), "atmosphere ephemeris updated");
        true
    }

    /// Keeps the camera snapshot in sync for the current frame.
    pub fn set_camera(&mut self, camera: &PerspectiveCamera) {
        self.camera_position = camera.position;
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_position
    }

    /// Camera position in ECEF meters, assuming one scene unit per meter.
    pub fn camera_ecef(&self) -> DVec3 {
        self.frame
            .world_to_ecef
            .transform_point3(self.camera_position.as_dvec3())
    }

    pub fn origin(&self) -> &OriginFrame {
        &self.frame
    }

    pub fn ephemeris(&self) -> &Ephemeris {
        &self.ephemeris
    }

    pub fn date(&self) -> SceneDate {
        self.ephemeris.date
    }

    /// How many times the ephemeris has been computed.
    pub fn ephemeris_updates(&self) -> u64 {
        self.updates
    }

    pub fn world_to_ecef(&self) -> DMat4 {
        self.frame.world_to_ecef
    }

    pub fn eci_to_ecef(&self) -> DMat3 {
        self.ephemeris.eci_to_ecef
    }

    pub fn sun_direction_ecef(&self) -> DVec3 {
        self.ephemeris.sun_direction_ecef
    }

    pub fn moon_direction_ecef(&self) -> DVec3 {
        self.ephemeris.moon_direction_ecef
    }

    /// Unit vector toward the sun in scene coordinates.
    pub fn sun_direction_world(&self) -> DVec3 {
        self.to_world(self.ephemeris.sun_direction_ecef)
    }

    pub fn moon_direction_world(&self) -> DVec3 {
        self.to_world(self.ephemeris.moon_direction_ecef)
    }

    fn to_world(&self, ecef: DVec3) -> DVec3 {
        self.frame
            .ecef_to_world
            .transform_vector3(ecef)
            .normalize_or_zero()
    }

    pub fn sky(&self) -> Sky {
        Sky {
            sun_direction: self.sun_direction_world().as_vec3(),
            moon_direction: self.moon_direction_world().as_vec3(),
            intensity: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hangzhou() -> Geodetic {
        Geodetic::from_degrees(30.284658, 120.002982, 8.4)
    }

    fn afternoon() -> SceneDate {
        SceneDate::from_local(2025, 6, 21, 15, 30, 8.0)
    }

    #[test]
    fn golden_sun_direction_at_origin() {
        let ctx = AtmosphereContext::new(hangzhou(), afternoon());

        let ecef = ctx.sun_direction_ecef();
        let expected_ecef = DVec3::new(0.3443161618380842, 0.8504543787066638, 0.3977106114196007);
        assert!((ecef - expected_ecef).length() < 1e-9, "{ecef:?}");

        let world = ctx.sun_direction_world();
        let expected = DVec3::new(0.05885105391080625, 0.687871084565586, -0.7234431038251395);
        assert!((world - expected).length() < 1e-9, "{world:?}");

        // Mid-afternoon sun stands about 43 degrees high in the west.
        let elevation = world.y.asin().to_degrees();
        assert!((elevation - 43.46).abs() < 0.01);
        assert!(world.z < 0.0);
    }

    #[test]
    fn recomputation_is_bit_identical() {
        let a = AtmosphereContext::new(hangzhou(), afternoon());
        let b = AtmosphereContext::new(hangzhou(), afternoon());
        assert_eq!(a.origin(), b.origin());
        assert_eq!(a.ephemeris(), b.ephemeris());

        let bits = |v: DVec3| v.to_array().map(f64::to_bits);
        assert_eq!(bits(a.sun_direction_world()), bits(b.sun_direction_world()));
        assert_eq!(bits(a.moon_direction_world()), bits(b.moon_direction_world()));
        assert_eq!(
            a.world_to_ecef().to_cols_array().map(f64::to_bits),
            b.world_to_ecef().to_cols_array().map(f64::to_bits)
        );
    }

    #[test]
    fn ephemeris_recomputed_only_when_date_changes() {
        let mut ctx = AtmosphereContext::new(hangzhou(), afternoon());
        let origin = *ctx.origin();
        assert!(!ctx.set_date(afternoon()));
        assert_eq!(ctx.ephemeris_updates(), 1);

        let later = SceneDate::from_unix_millis(afternoon().unix_millis() + 3_600_000);
        assert!(ctx.set_date(later));
        assert_eq!(ctx.ephemeris_updates(), 2);
        assert_eq!(*ctx.origin(), origin);
        assert_eq!(ctx.ephemeris(), &Ephemeris::compute(later));
    }

    #[test]
    fn camera_at_origin_sits_on_the_geodetic_point() {
        let mut ctx = AtmosphereContext::new(hangzhou(), afternoon());
        ctx.set_camera(&PerspectiveCamera::new().at(Vec3::ZERO));
        let expected = hangzhou().to_ecef(&Ellipsoid::WGS84);
        assert!((ctx.camera_ecef() - expected).length() < 1e-6);
    }
}

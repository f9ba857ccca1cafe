//! Reference ellipsoid and geodetic coordinates.

use glam::{DMat4, DVec3, DVec4};

/// An Earth ellipsoid given by its semi-axes in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipsoid {
    pub radii: DVec3,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179),
    };

    /// Geodetic surface normal at an ECEF position.
    pub fn surface_normal(&self, position: DVec3) -> DVec3 {
        (position / (self.radii * self.radii)).normalize()
    }

    /// East, north and up unit vectors at an ECEF position.
    pub fn east_north_up(&self, position: DVec3) -> (DVec3, DVec3, DVec3) {
        let up = self.surface_normal(position);
        let east = DVec3::Z.cross(up).try_normalize().unwrap_or(DVec3::Y);
        let north = up.cross(east).normalize();
        (east, north, up)
    }

    /// Local frame at `position` whose X, Y and Z axes are north, up and
    /// east, translated to `position`. Maps a Y-up scene into ECEF.
    pub fn north_up_east_frame(&self, position: DVec3) -> DMat4 {
        let (east, north, up) = self.east_north_up(position);
        DMat4::from_cols(
            north.extend(0.0),
            up.extend(0.0),
            east.extend(0.0),
            DVec4::new(position.x, position.y, position.z, 1.0),
        )
    }
}

/// Latitude and longitude in radians, height in meters above the ellipsoid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geodetic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Geodetic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn from_degrees(latitude: f64, longitude: f64, height: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians(), height)
    }

    pub fn to_ecef(&self, ellipsoid: &Ellipsoid) -> DVec3 {
        let cos_lat = self.latitude.cos();
        let n = DVec3::new(
            cos_lat * self.longitude.cos(),
            cos_lat * self.longitude.sin(),
            self.latitude.sin(),
        )
        .normalize();
        let r2 = ellipsoid.radii * ellipsoid.radii;
        let k = r2 * n;
        let gamma = n.dot(k).sqrt();
        k / gamma + n * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_prime_meridian_is_on_x_axis() {
        let p = Geodetic::from_degrees(0.0, 0.0, 0.0).to_ecef(&Ellipsoid::WGS84);
        assert!((p - DVec3::new(6_378_137.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn north_pole_uses_polar_radius() {
        let p = Geodetic::from_degrees(90.0, 0.0, 10.0).to_ecef(&Ellipsoid::WGS84);
        assert!((p.z - 6_356_762.314_245_179).abs() < 1e-6);
        assert!(p.x.abs() < 1e-6);
    }

    #[test]
    fn frame_is_right_handed_and_orthonormal() {
        let position =
            Geodetic::from_degrees(30.284658, 120.002982, 8.4).to_ecef(&Ellipsoid::WGS84);
        let m = Ellipsoid::WGS84.north_up_east_frame(position);
        let (x, y, z) = (m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate());
        assert!((x.length() - 1.0).abs() < 1e-12);
        assert!(x.dot(y).abs() < 1e-12 && y.dot(z).abs() < 1e-12);
        assert!((x.cross(y) - z).length() < 1e-12);
        assert!((m.transform_point3(DVec3::ZERO) - position).length() < 1e-9);
        // Up points away from the center.
        assert!(y.dot(position.normalize()) > 0.99);
    }
}

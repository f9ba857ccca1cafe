//! Earth-frame lighting: where the sun and moon are, seen from a geodetic
//! origin at a given instant.
//!
//! Scene space is a local tangent frame at the origin with X north, Y up and
//! Z east, one unit per meter.

mod astronomy;
mod context;
mod ellipsoid;
mod light;

pub use astronomy::{
    SceneDate, eci_to_ecef, greenwich_mean_sidereal_time, moon_direction_eci, sun_direction_eci,
};
pub use context::{AtmosphereContext, Ephemeris, OriginFrame};
pub use ellipsoid::{Ellipsoid, Geodetic};
pub use light::SunLight;

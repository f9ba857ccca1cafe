//! Low-precision solar and lunar ephemerides and Earth rotation.
//!
//! Series are from the Astronomical Almanac's low-precision formulas, good to
//! about 0.01° for the sun and 0.3° for the moon, which is far below what a
//! sky model can show. Results are unit vectors in an Earth-centered inertial
//! frame (equator and equinox of date).

use std::time::{SystemTime, UNIX_EPOCH};

use glam::{DMat3, DVec3};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const MS_PER_DAY: f64 = 86_400_000.0;

/// An instant, stored as milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneDate {
    unix_millis: i64,
}

impl SceneDate {
    pub fn from_unix_millis(unix_millis: i64) -> Self {
        Self { unix_millis }
    }

    pub fn from_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let days = days_from_civil(year, month, day);
        let secs = days * 86_400 + hour as i64 * 3_600 + minute as i64 * 60 + second as i64;
        Self::from_unix_millis(secs * 1_000)
    }

    /// A wall-clock time in a fixed UTC offset, e.g. `8.0` for UTC+8.
    pub fn from_local(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        utc_offset_hours: f64,
    ) -> Self {
        let local = Self::from_utc(year, month, day, hour, minute, 0);
        let offset_ms = (utc_offset_hours * 3_600_000.0).round() as i64;
        Self::from_unix_millis(local.unix_millis - offset_ms)
    }

    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self::from_unix_millis(millis)
    }

    pub fn unix_millis(&self) -> i64 {
        self.unix_millis
    }

    /// Julian date (UT).
    pub fn julian_date(&self) -> f64 {
        self.unix_millis as f64 / MS_PER_DAY + UNIX_EPOCH_JD
    }

    /// Julian centuries since J2000.
    pub fn julian_centuries(&self) -> f64 {
        (self.julian_date() - J2000) / 36_525.0
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = year as i64 - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Obliquity of the ecliptic in radians.
fn obliquity(date: SceneDate) -> f64 {
    let n = date.julian_date() - J2000;
    (23.439 - 0.000_000_4 * n).to_radians()
}

fn ecliptic_to_equatorial(v: DVec3, obliquity: f64) -> DVec3 {
    let (s, c) = obliquity.sin_cos();
    DVec3::new(v.x, v.y * c - v.z * s, v.y * s + v.z * c)
}

/// Unit vector toward the sun, ECI.
pub fn sun_direction_eci(date: SceneDate) -> DVec3 {
    let n = date.julian_date() - J2000;
    let mean_longitude = 280.460 + 0.985_647_4 * n;
    let mean_anomaly = (357.528 + 0.985_600_3 * n).to_radians();
    let lambda = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let ecliptic = DVec3::new(lambda.cos(), lambda.sin(), 0.0);
    ecliptic_to_equatorial(ecliptic, obliquity(date)).normalize()
}

/// Unit vector toward the moon, ECI (geocentric).
pub fn moon_direction_eci(date: SceneDate) -> DVec3 {
    let t = date.julian_centuries();
    let s = |deg: f64| deg.to_radians().sin();
    let lambda = (218.32 + 481_267.881 * t
        + 6.29 * s(135.0 + 477_198.87 * t)
        - 1.27 * s(259.3 - 413_335.36 * t)
        + 0.66 * s(235.7 + 890_534.22 * t)
        + 0.21 * s(269.9 + 954_397.74 * t)
        - 0.19 * s(357.5 + 35_999.05 * t)
        - 0.11 * s(186.5 + 966_404.03 * t))
        .to_radians();
    let beta = (5.13 * s(93.3 + 483_202.02 * t) + 0.28 * s(228.2 + 960_400.89 * t)
        - 0.28 * s(318.3 + 6_003.15 * t)
        - 0.17 * s(217.6 - 407_332.21 * t))
    .to_radians();
    let ecliptic = DVec3::new(
        beta.cos() * lambda.cos(),
        beta.cos() * lambda.sin(),
        beta.sin(),
    );
    ecliptic_to_equatorial(ecliptic, obliquity(date)).normalize()
}

/// Greenwich mean sidereal time in radians (IAU 1982).
pub fn greenwich_mean_sidereal_time(date: SceneDate) -> f64 {
    let t = date.julian_centuries();
    let seconds = 67_310.548_41
        + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    (seconds.rem_euclid(86_400.0) / 240.0).to_radians()
}

/// Rotation taking ECI vectors into the Earth-fixed frame at `date`.
pub fn eci_to_ecef(date: SceneDate) -> DMat3 {
    DMat3::from_rotation_z(-greenwich_mean_sidereal_time(date))
}

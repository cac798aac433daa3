//! Coordinate transforms: RA/Dec in ICRS degrees and a UTC time in, Alt/Az in
//! degrees out. A self-contained implementation rather than a dependency on
//! an external ephemeris crate, hidden behind [`CelestialFrame`] so one could
//! be swapped in later without touching callers.

use chrono::{DateTime, Datelike, Timelike, Utc};
use polynomials::poly;
use std::f64::consts::{PI, TAU};

pub type Hours = f64;
pub type Degrees = f64;
pub type Radians = f64;

pub fn deg_to_rad(degrees: Degrees) -> Radians {
    PI * degrees / 180.
}

pub fn rad_to_deg(rad: Radians) -> Degrees {
    180. * rad / PI
}

pub fn hours_to_rad(hours: Hours) -> Radians {
    PI * hours / 12.
}

pub fn rad_to_hours(rad: Radians) -> Hours {
    12. * rad / PI
}

pub fn deg_to_hours(deg: Degrees) -> Hours {
    deg / 15.
}

pub fn hours_to_deg(hours: Hours) -> Degrees {
    hours * 15.
}

pub fn modulo(val: f64, base: f64) -> f64 {
    ((val % base) + base) % base
}

/// Normalises an angle to [0, 360).
pub fn wrap_degrees(deg: Degrees) -> Degrees {
    modulo(deg, 360.)
}

fn calc_jd(time: DateTime<Utc>) -> f64 {
    let y = time.year() as f64;
    let m = time.month() as f64;
    let d = time.day() as f64;

    let mut jd = 367. * y;
    jd -= f64::floor(7. * (y + f64::floor((m + 9.) / 12.)) / 4.);
    jd -= f64::floor(3. * (f64::floor((y + (m - 9.) / 7.) / 100.) + 1.) / 4.);
    jd += f64::floor(275. * m / 9.);
    jd += d;
    jd += 1721028.5;
    jd + (hms_to_fractional_day(time.hour(), time.minute(), time.second() as f64)) / 24.
}

fn hms_to_fractional_day(h: u32, m: u32, s: f64) -> f64 {
    (h as f64) + (m as f64) / 60. + s / 3600.
}

/// see https://thecynster.home.blog/2019/11/04/calculating-sidereal-time/
pub fn greenwich_sidereal_time(time: DateTime<Utc>) -> Hours {
    const LEAP_SECOND_TOTAL: f64 = 27.;

    let jd_utc = calc_jd(time);
    let du = jd_utc - 2451545.0;
    let theta = rad_to_hours(modulo(
        TAU * (0.779_057_273_264f64 + 1.002_737_811_911_354_5f64 * du),
        TAU,
    ));

    let poly = poly![
        0.014506,
        4612.156534,
        1.3915817,
        -0.00000044,
        -0.000029956,
        -0.0000000368,
    ];
    let jd_tt = jd_utc + ((LEAP_SECOND_TOTAL + 32.184) / 3600.) / 24.;
    let t = (jd_tt - 2451545.0) / 36525.;

    let gmstp = deg_to_hours(modulo(poly.eval(t).unwrap() / 3600., 360.));

    modulo(theta + gmstp, 24.)
}

pub fn local_sidereal_time(time: DateTime<Utc>, longitude: Degrees) -> Hours {
    modulo(greenwich_sidereal_time(time) + deg_to_hours(longitude), 24.)
}

pub fn hour_angle(time: DateTime<Utc>, longitude: Degrees, ra_deg: Degrees) -> Hours {
    modulo(
        local_sidereal_time(time, longitude) - deg_to_hours(ra_deg),
        24.,
    )
}

fn alt_from_ha_dec(ha: Hours, dec: Degrees, lat: Degrees) -> Degrees {
    let ha = hours_to_rad(ha);
    let dec = deg_to_rad(dec);
    let lat = deg_to_rad(lat);
    rad_to_deg((dec.sin() * lat.sin() + dec.cos() * lat.cos() * ha.cos()).asin())
}

fn az_from_ha_dec(ha: Hours, dec: Degrees, lat: Degrees) -> Degrees {
    let alt = deg_to_rad(alt_from_ha_dec(ha, dec, lat));
    let ha_rad = hours_to_rad(ha);
    let dec = deg_to_rad(dec);
    let lat = deg_to_rad(lat);

    let a = rad_to_deg(((dec.sin() - alt.sin() * lat.sin()) / (alt.cos() * lat.cos())).acos());

    if 0. < ha_rad.sin() {
        360. - a
    } else {
        a
    }
}

/// Converts ICRS (RA, Dec) in degrees and a UTC time to (alt, az) in degrees
/// at the given observer location.
pub trait CelestialFrame {
    fn radec_to_altaz(
        &self,
        ra_deg: Degrees,
        dec_deg: Degrees,
        time: DateTime<Utc>,
    ) -> (Degrees, Degrees);
}

#[derive(Debug, Clone, Copy)]
pub struct ObserverFrame {
    pub latitude: Degrees,
    pub longitude: Degrees,
}

impl CelestialFrame for ObserverFrame {
    fn radec_to_altaz(
        &self,
        ra_deg: Degrees,
        dec_deg: Degrees,
        time: DateTime<Utc>,
    ) -> (Degrees, Degrees) {
        let ha = hour_angle(time, self.longitude, ra_deg);
        let alt = alt_from_ha_dec(ha, dec_deg, self.latitude);
        let az = az_from_ha_dec(ha, dec_deg, self.latitude);
        (alt, wrap_degrees(az))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::{assert_float_absolute_eq, assert_float_relative_eq};
    use chrono::TimeZone;

    #[test]
    fn deg_rad_round_trip() {
        assert_eq!(deg_to_rad(0.), 0.);
        assert_float_relative_eq!(deg_to_rad(55.), 0.9599311);
        assert_float_relative_eq!(rad_to_deg(1.), 57.29578);
    }

    #[test]
    fn modulo_wraps_like_python() {
        assert_eq!(modulo(TAU, PI), 0.);
        assert_eq!(modulo(-365., 360.), 355.);
        assert_eq!(wrap_degrees(370.), 10.);
        assert_eq!(wrap_degrees(-10.), 350.);
    }

    #[test]
    fn greenwich_sidereal_time_matches_known_values() {
        assert_float_relative_eq!(
            greenwich_sidereal_time(Utc.with_ymd_and_hms(1969, 1, 6, 1, 5, 0).unwrap()),
            8.1127421203,
            1E-4
        );
        assert_float_relative_eq!(
            greenwich_sidereal_time(Utc.with_ymd_and_hms(2021, 1, 30, 21, 20, 0).unwrap()),
            6.0219108930,
            1E-4
        );
    }

    #[test]
    fn alt_az_from_known_hour_angle_and_dec() {
        // HA = 54.382617deg, Dec = 36.466667, Lat = 52.5 -> known alt/az
        let ha = deg_to_hours(54.382617);
        assert_float_absolute_eq!(alt_from_ha_dec(ha, 36.466667, 52.5), 49.169122, 1E-3);
        assert_float_absolute_eq!(az_from_ha_dec(ha, 36.466667, 52.5), 269.14634, 1E-3);
    }

    #[test]
    fn radec_to_altaz_is_consistent_with_ha_dec_path() {
        let frame = ObserverFrame {
            latitude: 52.5,
            longitude: 0.0,
        };
        let time = Utc.with_ymd_and_hms(2021, 1, 30, 21, 20, 0).unwrap();
        let lst = local_sidereal_time(time, 0.0);
        let ra_deg = hours_to_deg(modulo(lst - deg_to_hours(54.382617), 24.));
        let (alt, az) = frame.radec_to_altaz(ra_deg, 36.466667, time);
        assert_float_absolute_eq!(alt, 49.169122, 1E-2);
        assert_float_absolute_eq!(az, 269.14634, 1E-2);
    }
}

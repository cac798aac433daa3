//! Dome-azimuth projection and unwrapping.
//!
//! Owns only the pier-offset projection from a telescope line-of-sight to a
//! dome-centred azimuth; the alt/az (or RA/Dec) transform that feeds it comes
//! from [`crate::astro_math`].

use crate::astro_math::{wrap_degrees, Degrees};

/// Projects the telescope's line of sight onto the dome azimuth that centres
/// the slit on it, correcting for the telescope's off-centre pier.
pub fn dome_azimuth_for_altaz(
    alt_deg: Degrees,
    az_deg: Degrees,
    dome_radius_cm: f64,
    telescope_offset_x_cm: f64,
) -> Degrees {
    let alt = alt_deg.to_radians();
    let az = az_deg.to_radians();

    let x = dome_radius_cm * az.cos() * alt.cos();
    let y = dome_radius_cm * az.sin() * alt.cos();

    let dx = x - telescope_offset_x_cm;
    let dy = y;

    wrap_degrees(dy.atan2(dx).to_degrees())
}

/// Picks the unwrapped representative of `target_deg` nearest the dome's
/// current unwrapped azimuth. The dome tracks absolute motor steps, not a
/// wrapped angle, so a slew from 359° to a requested 1° should continue
/// forward to 361° rather than reverse almost a full turn.
pub fn unwrap_target(current_unwrapped_deg: Degrees, target_deg: Degrees) -> Degrees {
    let target_deg = wrap_degrees(target_deg);
    let r = (current_unwrapped_deg / 360.).floor();

    [-1.0, 0.0, 1.0]
        .into_iter()
        .map(|k| target_deg + 360. * (r + k))
        .min_by(|a, b| {
            (current_unwrapped_deg - a)
                .abs()
                .partial_cmp(&(current_unwrapped_deg - b).abs())
                .unwrap()
        })
        .unwrap()
}

/// Converts an unwrapped target azimuth to an absolute motor step count.
pub fn target_to_steps(target_unwrapped_deg: Degrees, home_azimuth_deg: Degrees, steps_per_rotation: i64) -> i64 {
    ((target_unwrapped_deg - home_azimuth_deg) / 360. * steps_per_rotation as f64).round() as i64
}

/// Shortest signed delta from `current` to `target`, in (-180, 180].
pub fn shortest_delta(current_deg: Degrees, target_deg: Degrees) -> Degrees {
    let mut delta = wrap_degrees(target_deg - current_deg);
    if delta > 180. {
        delta -= 360.;
    }
    if delta <= -180. {
        delta += 360.;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::assert_float_absolute_eq;

    #[test]
    fn unwrap_prefers_continuation_over_wraparound() {
        // azimuth_degrees=350, user requests 10 -> chosen target is 370.
        assert_float_absolute_eq!(unwrap_target(350., 10.), 370., 1E-9);
    }

    #[test]
    fn unwrap_shortest_path_forward() {
        // azimuth_degrees=359 -> slew_azimuth(1) picks 361.
        assert_float_absolute_eq!(unwrap_target(359., 1.), 361., 1E-9);
    }

    #[test]
    fn unwrap_picks_nearest_representative_when_backward_is_shorter() {
        assert_float_absolute_eq!(unwrap_target(400., 10.), 370., 1E-9);
    }

    #[test]
    fn target_to_steps_respects_home_offset() {
        assert_eq!(target_to_steps(110., 110., 1_000_000), 0);
        assert_eq!(target_to_steps(200., 110., 1_000_000), 250_000);
    }

    #[test]
    fn shortest_delta_is_signed_and_bounded() {
        assert_float_absolute_eq!(shortest_delta(350., 10.), 20., 1E-9);
        assert_float_absolute_eq!(shortest_delta(10., 350.), -20., 1E-9);
        assert_float_absolute_eq!(shortest_delta(0., 180.), 180., 1E-9);
    }

    #[test]
    fn dome_azimuth_with_zero_offset_matches_line_of_sight_azimuth() {
        let az = dome_azimuth_for_altaz(45., 90., 350., 0.);
        assert_float_absolute_eq!(az, 90., 1E-6);
    }

    #[test]
    fn dome_azimuth_corrects_for_pier_offset() {
        let centred = dome_azimuth_for_altaz(30., 90., 350., 0.);
        let offset = dome_azimuth_for_altaz(30., 90., 350., 50.);
        assert!((centred - offset).abs() > 0.01);
    }
}

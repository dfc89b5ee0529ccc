// Angle helpers for swerve modules
//
// Every angle handed between components is in degrees and wrapped to
// (-180, 180]. Raw azimuth sensors report multi-turn ticks.

/// Wrap an angle in degrees to (-180, 180]
///
/// Works for multi-turn values (e.g. 7265°). Non-finite input maps to 0.
pub fn normalize(angle_deg: f64) -> f64 {
    if !angle_deg.is_finite() {
        return 0.0;
    }
    if angle_deg > -180.0 && angle_deg <= 180.0 {
        return angle_deg;
    }

    // rem_euclid gives [0, 360], the upper bound only through rounding
    let wrapped = angle_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180]
pub fn delta(from_deg: f64, to_deg: f64) -> f64 {
    normalize(to_deg - from_deg)
}

/// Pick between the target and its flipped equivalent so that the module
/// never turns more than 90° to reach it
///
/// # Arguments
/// * `target_deg` - Desired wheel angle
/// * `current_deg` - Measured wheel angle
/// * `speed` - Desired signed wheel speed
///
/// # Returns
/// `(angle, speed)`, where `angle` is normalized and within 90° of `current_deg`.
/// When the wheel is flipped the speed is negated, so the ground velocity is the same.
pub fn optimize(target_deg: f64, current_deg: f64, speed: f64) -> (f64, f64) {
    if delta(current_deg, target_deg).abs() > 90.0 {
        (normalize(target_deg + 180.0), -speed)
    } else {
        (normalize(target_deg), speed)
    }
}

/// Convert raw sensor ticks to degrees (not wrapped)
pub fn ticks_to_degrees(ticks: f64, ticks_per_rev: f64) -> f64 {
    ticks / ticks_per_rev * 360.0
}

/// Convert degrees to raw sensor ticks (not wrapped)
pub fn degrees_to_ticks(angle_deg: f64, ticks_per_rev: f64) -> f64 {
    angle_deg / 360.0 * ticks_per_rev
}

/// Calibrated module angle from a raw sensor reading
pub fn sensor_to_angle(ticks: f64, offset_ticks: f64, ticks_per_rev: f64) -> f64 {
    normalize(ticks_to_degrees(ticks - offset_ticks, ticks_per_rev))
}

/// Sensor reading that corresponds to a calibrated module angle
///
/// The result is only defined modulo one revolution.
pub fn angle_to_ticks(angle_deg: f64, offset_ticks: f64, ticks_per_rev: f64) -> f64 {
    degrees_to_ticks(angle_deg, ticks_per_rev) + offset_ticks
}

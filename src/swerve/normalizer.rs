// Wheel speed desaturation

use super::geometry::MODULE_COUNT;
use super::kinematics::ModuleState;

/// Scale module speeds so none exceeds `max_speed * speed_limit`
///
/// All speeds are scaled by the same factor, so the direction of chassis
/// travel is unchanged and only its magnitude drops. Speeds already under the
/// cap are left untouched.
///
/// # Arguments
/// * `max_speed` - Fastest a wheel can physically go
/// * `speed_limit` - Extra scale factor, clamped into (0, 1]
///
/// # Returns
/// The factor that was applied (1.0 when nothing changed)
pub fn desaturate(states: &mut [ModuleState; MODULE_COUNT], max_speed: f64, speed_limit: f64) -> f64 {
    let cap = max_speed * clamp_speed_limit(speed_limit);
    let largest = states
        .iter()
        .map(|s| s.speed.abs())
        .fold(0.0f64, f64::max);

    if largest <= cap || largest == 0.0 {
        return 1.0;
    }

    let scale = cap / largest;
    for state in states.iter_mut() {
        state.speed *= scale;
    }
    scale
}

/// Keep a speed limit inside (0, 1]
///
/// Non-positive or non-finite limits fall back to full speed.
pub fn clamp_speed_limit(limit: f64) -> f64 {
    if limit.is_finite() && limit > 0.0 {
        limit.min(1.0)
    } else {
        1.0
    }
}

// Closed-loop azimuth control
//
// PID on the angle error (in sensor ticks) with an allowable-error deadband,
// a trapezoidal-profile feed-forward and cruise/acceleration limits on the
// output velocity.

use serde::{Deserialize, Serialize};

/// Azimuth loop tuning, in sensor-tick units
///
/// With onboard azimuth control the servo runs its own PID: only
/// `allowable_error`, `cruise_velocity` and `acceleration` apply there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    /// Output ticks/s per tick of error
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Scale on the motion-profile velocity
    pub kf: f64,
    /// No correction is applied once the error is within this many ticks
    pub allowable_error: f64,
    /// Maximum azimuth velocity (ticks/s)
    pub cruise_velocity: f64,
    /// Maximum azimuth acceleration (ticks/s^2)
    pub acceleration: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 6.0,
            ki: 0.0,
            kd: 0.05,
            kf: 1.0,
            allowable_error: 6.0,
            cruise_velocity: 2400.0,
            acceleration: 24_000.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GainsError {
    #[error("{name} must be finite and non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
}

impl Gains {
    /// Check that every gain can be used by the loop
    pub fn validate(&self) -> Result<(), GainsError> {
        let values = [
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("kf", self.kf),
            ("allowable_error", self.allowable_error),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(GainsError::Negative { name, value });
            }
        }
        let limits = [
            ("cruise_velocity", self.cruise_velocity),
            ("acceleration", self.acceleration),
        ];
        for (name, value) in limits {
            if !value.is_finite() || value <= 0.0 {
                return Err(GainsError::NotPositive { name, value });
            }
        }
        Ok(())
    }
}

/// Integral term clamp (tick-seconds)
const INTEGRAL_LIMIT: f64 = 1_000.0;

/// Per-module azimuth controller state
#[derive(Debug, Clone)]
pub struct AzimuthLoop {
    gains: Gains,
    integral: f64,
    prev_error: Option<f64>,
    output: f64,
}

impl AzimuthLoop {
    pub fn new(gains: Gains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
            output: 0.0,
        }
    }

    pub fn gains(&self) -> &Gains {
        &self.gains
    }

    /// Last commanded velocity (ticks/s)
    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.output = 0.0;
    }

    pub fn within_tolerance(&self, error_ticks: f64) -> bool {
        error_ticks.abs() <= self.gains.allowable_error
    }

    /// Compute the azimuth velocity command for this tick
    ///
    /// # Arguments
    /// * `error_ticks` - Target minus measured position, shortest way round
    /// * `dt` - Seconds since the previous update
    ///
    /// # Returns
    /// Velocity command in ticks/s, within +/- cruise velocity, 0 inside the deadband
    pub fn update(&mut self, error_ticks: f64, dt: f64) -> f64 {
        let g = self.gains;

        if self.within_tolerance(error_ticks) {
            self.reset();
            return 0.0;
        }

        self.integral = (self.integral + error_ticks * dt).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);

        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error_ticks - prev) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(error_ticks);

        // Fastest speed that can still stop at the target, and never past it within one tick
        let mut ceiling = g
            .cruise_velocity
            .min((2.0 * g.acceleration * error_ticks.abs()).sqrt());
        if dt > 0.0 {
            ceiling = ceiling.min(error_ticks.abs() / dt);
        }
        let profile = error_ticks.signum() * ceiling;

        let pid = g.kp * error_ticks + g.ki * self.integral + g.kd * derivative;
        let mut desired = (pid + g.kf * profile).clamp(-ceiling, ceiling);

        // Acceleration limit when speeding up or reversing; slowing down follows the profile
        if dt > 0.0 && (desired.abs() > self.output.abs() || desired * self.output < 0.0) {
            let max_step = g.acceleration * dt;
            desired = desired.clamp(self.output - max_step, self.output + max_step);
        }

        self.output = desired.clamp(-ceiling, ceiling);
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.02;

    #[test]
    fn test_default_gains_valid() {
        assert!(Gains::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_gains_rejected() {
        let mut g = Gains::default();
        g.kp = -1.0;
        assert!(matches!(
            g.validate(),
            Err(GainsError::Negative { name: "kp", .. })
        ));

        let mut g = Gains::default();
        g.cruise_velocity = 0.0;
        assert!(matches!(
            g.validate(),
            Err(GainsError::NotPositive { name: "cruise_velocity", .. })
        ));

        let mut g = Gains::default();
        g.acceleration = f64::NAN;
        assert!(matches!(
            g.validate(),
            Err(GainsError::NotPositive { name: "acceleration", .. })
        ));
    }

    #[test]
    fn test_no_correction_inside_deadband() {
        let mut pid = AzimuthLoop::new(Gains::default());
        assert_eq!(pid.update(3.0, DT), 0.0);
        assert_eq!(pid.update(-6.0, DT), 0.0);
    }

    #[test]
    fn test_output_bounded_by_cruise() {
        let gains = Gains::default();
        let mut pid = AzimuthLoop::new(gains);
        for _ in 0..100 {
            let out = pid.update(1024.0, DT);
            assert!(out.abs() <= gains.cruise_velocity + 1e-9);
        }
        assert!((pid.output() - gains.cruise_velocity).abs() < 1e-9);
    }

    #[test]
    fn test_output_slew_limited() {
        let gains = Gains::default();
        let mut pid = AzimuthLoop::new(gains);
        let first = pid.update(1024.0, DT);
        assert!((first - gains.acceleration * DT).abs() < 1e-9);
        let second = pid.update(1024.0, DT);
        assert!((second - 2.0 * gains.acceleration * DT).abs() < 1e-9);
    }

    #[test]
    fn test_output_zeroed_once_within_tolerance() {
        let mut pid = AzimuthLoop::new(Gains::default());
        for _ in 0..10 {
            pid.update(1024.0, DT);
        }
        assert!(pid.output() > 0.0);
        assert_eq!(pid.update(2.0, DT), 0.0);
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn test_never_steps_past_target() {
        let mut pid = AzimuthLoop::new(Gains::default());
        for _ in 0..20 {
            pid.update(2000.0, DT);
        }
        // Close to the target at full speed: one tick must not cross it
        let out = pid.update(10.0, DT);
        assert!(out > 0.0 && out * DT <= 10.0, "output {}", out);
    }

    #[test]
    fn test_sign_follows_error() {
        let mut pid = AzimuthLoop::new(Gains::default());
        assert!(pid.update(-500.0, DT) < 0.0);
        pid.reset();
        assert!(pid.update(500.0, DT) > 0.0);
    }

    /// Step response of an ideal axis: (final position, largest overshoot)
    fn step_response(target: f64, ticks: usize) -> (f64, f64) {
        let mut pid = AzimuthLoop::new(Gains::default());
        let mut position = 0.0;
        let mut overshoot: f64 = 0.0;
        for _ in 0..ticks {
            let velocity = pid.update(target - position, DT);
            position += velocity * DT;
            overshoot = overshoot.max((position - target) * target.signum());
        }
        (position, overshoot)
    }

    #[test]
    fn test_converges_on_simulated_axis() {
        let tolerance = Gains::default().allowable_error;
        for target in [1024.0, 100.0, -700.0, 20.0, 682.67, 2048.0, -2048.0] {
            let (position, _) = step_response(target, 200);
            assert!(
                (target - position).abs() <= tolerance,
                "target {} position {}",
                target,
                position
            );
        }
    }

    #[test]
    fn test_step_response_does_not_overshoot() {
        let tolerance = Gains::default().allowable_error;
        for target in [1024.0, 100.0, -700.0, 20.0, 682.67, 2048.0, -2048.0] {
            let (_, overshoot) = step_response(target, 200);
            assert!(
                overshoot <= tolerance,
                "target {} overshoot {}",
                target,
                overshoot
            );
        }
    }
}

// Swerve inverse kinematics
// Converts chassis velocities (vx, vy, omega) into per-module (angle, speed) states.

use super::angle::normalize;
use super::geometry::{MODULE_COUNT, ModuleGeometry};

/// Module vectors shorter than this are treated as stopped
const STOPPED_EPSILON: f64 = 1e-9;

/// Normalized chassis command, each axis in [-1, 1]
///
/// * `forward` - positive = robot forward
/// * `strafe` - positive = robot left
/// * `rotation` - positive = counter-clockwise
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisVelocity {
    pub forward: f64,
    pub strafe: f64,
    pub rotation: f64,
}

impl ChassisVelocity {
    pub fn new(forward: f64, strafe: f64, rotation: f64) -> Self {
        Self {
            forward,
            strafe,
            rotation,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Clamp every axis into [-1, 1]; non-finite values become 0
    pub fn clamped(&self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            forward: clamp(self.forward),
            strafe: clamp(self.strafe),
            rotation: clamp(self.rotation),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.strafe == 0.0 && self.rotation == 0.0
    }
}

/// Chassis velocity in physical units
///
/// `vx`, `vy` in m/s (robot frame unless stated otherwise), `omega` in rad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    /// Convert field-frame speeds into the robot frame
    ///
    /// Rotates the translation by `-heading` so the commanded direction stays
    /// fixed relative to the field whatever way the robot faces.
    ///
    /// # Arguments
    /// * `heading_deg` - Robot heading, counter-clockwise positive, any number of turns
    pub fn from_field_relative(field: ChassisSpeeds, heading_deg: f64) -> Self {
        let (sin, cos) = heading_deg.to_radians().sin_cos();
        Self {
            vx: field.vx * cos + field.vy * sin,
            vy: -field.vx * sin + field.vy * cos,
            omega: field.omega,
        }
    }
}

/// Target for one module
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleState {
    /// Wheel angle in degrees, (-180, 180], 0 = robot forward
    pub angle: f64,
    /// Signed wheel speed
    pub speed: f64,
}

impl ModuleState {
    pub fn new(angle: f64, speed: f64) -> Self {
        Self { angle, speed }
    }
}

/// Inverse kinematics for a fixed set of four modules
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    modules: [ModuleGeometry; MODULE_COUNT],
}

impl SwerveKinematics {
    pub fn new(modules: [ModuleGeometry; MODULE_COUNT]) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[ModuleGeometry; MODULE_COUNT] {
        &self.modules
    }

    /// Compute the raw (unoptimized, unnormalized) state of every module
    ///
    /// Each wheel velocity is the chassis translation plus `omega x r`, with `r`
    /// the module offset from center. A module that would be stopped keeps the
    /// angle it had in `previous`, so idle wheels do not snap to `atan2(0, 0)`.
    pub fn to_module_states(
        &self,
        speeds: ChassisSpeeds,
        previous: &[ModuleState; MODULE_COUNT],
    ) -> [ModuleState; MODULE_COUNT] {
        let mut states = [ModuleState::default(); MODULE_COUNT];

        for (i, module) in self.modules.iter().enumerate() {
            let vx = speeds.vx - speeds.omega * module.y;
            let vy = speeds.vy + speeds.omega * module.x;
            let speed = vx.hypot(vy);

            states[i] = if speed < STOPPED_EPSILON {
                ModuleState::new(previous[i].angle, 0.0)
            } else {
                ModuleState::new(normalize(vy.atan2(vx).to_degrees()), speed)
            };
        }

        states
    }
}

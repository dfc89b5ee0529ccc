// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

use crate::swerve::kinematics::ChassisVelocity;

fn field_relative_default() -> bool {
    true
}

// Chassis command from teleop -> runtime
// Each axis is normalized [-1, 1] and already passed through the deadband
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChassisCommand {
    pub forward: f64,
    pub strafe: f64,
    pub rotation: f64,
    #[serde(default = "field_relative_default")]
    pub field_relative: bool,
}

impl From<&ChassisCommand> for ChassisVelocity {
    fn from(cmd: &ChassisCommand) -> Self {
        ChassisVelocity::new(cmd.forward, cmd.strafe, cmd.rotation)
    }
}

/// One-shot operator actions, applied between control ticks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Current robot orientation becomes field "forward"
    ZeroHeading,
    /// Current wheel directions become azimuth zero (not saved)
    ZeroAzimuths,
    /// Save the azimuth zero offsets
    SaveAzimuths,
    /// Scale the wheel speed cap, (0, 1]
    SetSpeedLimit { limit: f64 },
}

/// Per-module part of the telemetry snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleTelemetry {
    pub name: String,
    /// Measured angle (deg)
    pub angle: f64,
    /// Commanded angle (deg)
    pub target_angle: f64,
    /// Commanded wheel speed (m/s)
    pub speed: f64,
}

/// Snapshot published once per tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Telemetry {
    pub forward: f64,
    pub strafe: f64,
    pub rotation: f64,
    /// Heading used this tick (deg, not wrapped)
    pub heading: f64,
    pub field_relative: bool,
    pub speed_limit: f64,
    pub modules: Vec<ModuleTelemetry>,
    /// Problems raised this tick, e.g. a failed calibration save
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

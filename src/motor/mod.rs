// Motor access for the swerve base
//
// Provides:
// - The `Actuator` capability trait the swerve core drives
// - A simulated actuator for tests and hardware-less runs
// - Feetech STS serial protocol and the eight-servo swerve hardware

pub mod actuator;
mod driver;
pub mod feetech;

pub use actuator::{Actuator, ActuatorError, SimActuator, SimActuatorState, SpeedCommand};
pub use driver::{FeetechActuator, MotorIds, SharedBus, SwerveHardware};
pub use feetech::{FeetechBus, FeetechError};

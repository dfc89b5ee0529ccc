// Actuator capability interface
//
// The swerve core only talks to motors through `Actuator`. Each motor family
// (Feetech bus servos, the simulator) implements it once.

use std::sync::{Arc, Mutex};

use super::feetech::FeetechError;

/// Speed command, per what the actuator can do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedCommand {
    /// Open loop output fraction in [-1, 1]
    DutyCycle(f64),
    /// Closed loop velocity in sensor ticks per second
    Velocity(f64),
}

/// Error types for actuator access
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Motor bus lock poisoned")]
    Poisoned,

    #[error("Actuator fault: {0}")]
    Fault(String),
}

/// Minimal motor capability set used by the swerve modules
pub trait Actuator: Send {
    /// Read the position sensor in raw ticks
    ///
    /// `Ok(None)` means the device answered nothing this cycle.
    fn read_position(&mut self) -> Result<Option<f64>, ActuatorError>;

    /// Hold a position, in raw ticks, using the device's own loop
    fn command_position(&mut self, ticks: f64) -> Result<(), ActuatorError>;

    /// Run at a speed
    fn command_speed(&mut self, command: SpeedCommand) -> Result<(), ActuatorError>;
}

/// Observable state of a simulated actuator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimActuatorState {
    /// Current position in ticks
    pub position: f64,
    pub last_speed: Option<SpeedCommand>,
    pub last_position: Option<f64>,
    /// Reported by the next reads instead of a position
    pub fail_reads: bool,
    pub fail_writes: bool,
}

/// Ideal actuator for simulation and tests
///
/// Velocity commands move the position by `velocity * dt` on every read,
/// position commands jump straight to the target.
/// Clones of the `handle` see and change the same state.
#[derive(Debug, Clone)]
pub struct SimActuator {
    state: Arc<Mutex<SimActuatorState>>,
    dt: f64,
    /// Ticks/s reached at full duty cycle
    max_velocity: f64,
}

impl SimActuator {
    pub fn new(dt: f64, max_velocity: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimActuatorState::default())),
            dt,
            max_velocity,
        }
    }

    /// Start at a given position
    pub fn at(position: f64, dt: f64, max_velocity: f64) -> Self {
        let state = SimActuatorState {
            position,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            dt,
            max_velocity,
        }
    }

    pub fn handle(&self) -> Arc<Mutex<SimActuatorState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimActuatorState>, ActuatorError> {
        self.state.lock().map_err(|_| ActuatorError::Poisoned)
    }
}

impl Actuator for SimActuator {
    fn read_position(&mut self) -> Result<Option<f64>, ActuatorError> {
        let dt = self.dt;
        let max_velocity = self.max_velocity;
        let mut state = self.lock()?;

        let velocity = match state.last_speed {
            Some(SpeedCommand::Velocity(v)) => v,
            Some(SpeedCommand::DutyCycle(d)) => d * max_velocity,
            None => 0.0,
        };
        state.position += velocity * dt;

        if state.fail_reads {
            return Ok(None);
        }
        Ok(Some(state.position))
    }

    fn command_position(&mut self, ticks: f64) -> Result<(), ActuatorError> {
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(ActuatorError::Fault("simulated write failure".to_string()));
        }
        state.last_position = Some(ticks);
        state.last_speed = None;
        state.position = ticks;
        Ok(())
    }

    fn command_speed(&mut self, command: SpeedCommand) -> Result<(), ActuatorError> {
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(ActuatorError::Fault("simulated write failure".to_string()));
        }
        state.last_speed = Some(command);
        Ok(())
    }
}

// Feetech hardware for the swerve base
//
// All eight servos (four steer, four drive) hang off one serial bus. Each servo
// is exposed to the swerve core as an `Actuator`.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::actuator::{Actuator, ActuatorError, SpeedCommand};
use super::feetech::{FeetechBus, FeetechError, MAX_VELOCITY, OperatingMode, position_profile};
use crate::swerve::azimuth::Gains;
use crate::swerve::geometry::MODULE_COUNT;
use crate::swerve::module::{AzimuthControl, ModuleHardware};

/// Bus shared by every servo on the base
pub type SharedBus = Arc<Mutex<FeetechBus>>;

fn lock(bus: &SharedBus) -> Result<MutexGuard<'_, FeetechBus>, ActuatorError> {
    bus.lock().map_err(|_| ActuatorError::Poisoned)
}

/// One servo on the shared bus
pub struct FeetechActuator {
    bus: SharedBus,
    id: u8,
}

impl FeetechActuator {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

impl Actuator for FeetechActuator {
    fn read_position(&mut self) -> Result<Option<f64>, ActuatorError> {
        match lock(&self.bus)?.get_position(self.id) {
            Ok(ticks) => Ok(Some(ticks as f64)),
            Err(FeetechError::Timeout { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn command_position(&mut self, ticks: f64) -> Result<(), ActuatorError> {
        lock(&self.bus)?.set_position(self.id, ticks.round() as i64)?;
        Ok(())
    }

    fn command_speed(&mut self, command: SpeedCommand) -> Result<(), ActuatorError> {
        // The servo has no open-loop path here, a duty cycle maps onto its velocity range
        let velocity = match command {
            SpeedCommand::Velocity(v) => v,
            SpeedCommand::DutyCycle(d) => d * MAX_VELOCITY as f64,
        };
        let raw = velocity
            .round()
            .clamp(-(MAX_VELOCITY as f64), MAX_VELOCITY as f64) as i16;
        lock(&self.bus)?.set_velocity(self.id, raw)?;
        Ok(())
    }
}

/// Servo ids of the swerve base, in module order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorIds {
    pub steer: [u8; MODULE_COUNT],
    pub drive: [u8; MODULE_COUNT],
}

impl MotorIds {
    pub fn all(&self) -> impl Iterator<Item = u8> + '_ {
        self.steer.iter().chain(self.drive.iter()).copied()
    }
}

/// The eight servos of the base on one serial bus
pub struct SwerveHardware {
    bus: SharedBus,
    ids: MotorIds,
}

impl SwerveHardware {
    pub fn open(port: &str, ids: MotorIds) -> Result<Self, ActuatorError> {
        info!("Opening motor bus on {}", port);
        let bus = FeetechBus::open(port)?;
        Ok(Self {
            bus: Arc::new(Mutex::new(bus)),
            ids,
        })
    }

    /// Ping every servo and put it in the operating mode the modules need
    ///
    /// Steer servos use position mode when the servo closes the azimuth loop
    /// itself and velocity mode otherwise; drive servos always use velocity mode.
    ///
    /// In position mode the servo runs its own PID, so only the cruise velocity
    /// and acceleration of `gains` reach it, as its running speed and ramp.
    pub fn initialize(&self, azimuth: AzimuthControl, gains: &Gains) -> Result<(), ActuatorError> {
        info!("Initializing swerve servos {:?}", self.ids);
        let mut bus = lock(&self.bus)?;

        for id in self.ids.all() {
            if bus.ping(id)? {
                debug!("Motor {} responding", id);
            } else {
                warn!("Motor {} not responding to ping", id);
                return Err(FeetechError::Timeout { id }.into());
            }
        }

        for id in self.ids.all() {
            bus.disable_torque(id)?;
        }

        let steer_mode = match azimuth {
            AzimuthControl::Onboard => OperatingMode::Position,
            AzimuthControl::Host => OperatingMode::Velocity,
        };
        for &id in &self.ids.steer {
            bus.set_operating_mode(id, steer_mode)?;
        }
        if azimuth == AzimuthControl::Onboard {
            let (acceleration, speed) = position_profile(gains.cruise_velocity, gains.acceleration);
            debug!("Steer profile: speed {} acceleration {}", speed, acceleration);
            for &id in &self.ids.steer {
                bus.set_position_profile(id, acceleration, speed)?;
            }
        }
        for &id in &self.ids.drive {
            bus.set_operating_mode(id, OperatingMode::Velocity)?;
        }

        for id in self.ids.all() {
            bus.enable_torque(id)?;
        }

        info!("Swerve servos initialized ({:?} azimuth control)", azimuth);
        Ok(())
    }

    /// Steer and drive actuators for each module, in module order
    pub fn modules(&self) -> Vec<ModuleHardware> {
        self.ids
            .steer
            .iter()
            .zip(&self.ids.drive)
            .map(|(&steer, &drive)| ModuleHardware {
                steer: Box::new(FeetechActuator::new(Arc::clone(&self.bus), steer)),
                drive: Box::new(FeetechActuator::new(Arc::clone(&self.bus), drive)),
            })
            .collect()
    }

    /// Let every wheel turn freely
    pub fn disable_torque(&self) -> Result<(), ActuatorError> {
        info!("Disabling torque on all swerve servos");
        let mut bus = lock(&self.bus)?;
        for id in self.ids.all() {
            bus.disable_torque(id)?;
        }
        Ok(())
    }

    /// Zero all drive velocities with a single bus write
    pub fn stop_drives(&self) -> Result<(), ActuatorError> {
        let data: Vec<(u8, i16)> = self.ids.drive.iter().map(|&id| (id, 0)).collect();
        lock(&self.bus)?.sync_set_velocity(&data)?;
        Ok(())
    }
}

impl Drop for SwerveHardware {
    fn drop(&mut self) {
        if let Err(e) = self.stop_drives() {
            warn!("Failed to stop drive motors on drop: {}", e);
        }
    }
}

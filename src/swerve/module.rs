// One swerve module: steer + drive actuator, azimuth sensor and zero offset

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::angle::{degrees_to_ticks, delta, sensor_to_angle};
use super::azimuth::{AzimuthLoop, Gains};
use super::calibration::{CalibrationError, CalibrationStore};
use super::geometry::{ModuleGeometry, ModulePosition};
use super::kinematics::ModuleState;
use crate::motor::{Actuator, ActuatorError, SpeedCommand};

/// Where the azimuth position loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzimuthControl {
    /// PID + motion profile in this process, velocity commands to the steer motor
    Host,
    /// Position commands, the steer motor closes the loop
    Onboard,
}

/// How the drive motor is commanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Duty cycle proportional to the wheel speed
    OpenLoop,
    /// Velocity setpoint in drive sensor ticks/s
    ClosedLoop,
}

/// Motors belonging to one module
pub struct ModuleHardware {
    pub steer: Box<dyn Actuator>,
    pub drive: Box<dyn Actuator>,
}

/// Settings shared by every module
#[derive(Debug, Clone, Copy)]
pub struct ModuleSettings {
    /// Azimuth sensor ticks per wheel revolution
    pub ticks_per_revolution: f64,
    /// Wheel speed (m/s) that maps to full drive output
    pub max_speed: f64,
    /// Drive velocity (ticks/s) at full output, closed loop only
    pub drive_setpoint_max: f64,
    pub drive_mode: DriveMode,
    pub azimuth_control: AzimuthControl,
    pub gains: Gains,
}

/// Per-module wiring corrections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleInversion {
    /// Drive motor spins backwards for a positive command
    pub drive: bool,
    /// Steer motor turns clockwise for a positive velocity (host azimuth control)
    pub steer: bool,
    /// Azimuth sensor counts clockwise
    pub sensor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    /// No target received since construction or the last stop
    Idle,
    Tracking,
}

pub struct SwerveModule {
    geometry: ModuleGeometry,
    settings: ModuleSettings,
    inversion: ModuleInversion,
    steer: Box<dyn Actuator>,
    drive: Box<dyn Actuator>,
    azimuth: AzimuthLoop,
    mode: ModuleMode,
    offset_ticks: f64,
    last_raw: Option<f64>,
    angle: f64,
    target: ModuleState,
    sensor_fault: bool,
}

impl SwerveModule {
    /// Create a module, loading its zero offset from `store` (0 if absent)
    pub fn new(
        geometry: ModuleGeometry,
        settings: ModuleSettings,
        inversion: ModuleInversion,
        hardware: ModuleHardware,
        store: &dyn CalibrationStore,
    ) -> Self {
        let key = geometry.position.key();
        let offset_ticks = match store.load(key) {
            Ok(Some(offset)) if offset.is_finite() => {
                info!("{}: loaded azimuth offset {}", key, offset);
                offset
            }
            Ok(Some(offset)) => {
                warn!("{}: ignoring stored azimuth offset {}", key, offset);
                0.0
            }
            Ok(None) => {
                debug!("{}: no stored azimuth offset", key);
                0.0
            }
            Err(e) => {
                warn!("{}: could not load azimuth offset: {}", key, e);
                0.0
            }
        };

        Self {
            geometry,
            settings,
            inversion,
            steer: hardware.steer,
            drive: hardware.drive,
            azimuth: AzimuthLoop::new(settings.gains),
            mode: ModuleMode::Idle,
            offset_ticks,
            last_raw: None,
            angle: 0.0,
            target: ModuleState::default(),
            sensor_fault: false,
        }
    }

    pub fn position(&self) -> ModulePosition {
        self.geometry.position
    }

    pub fn geometry(&self) -> &ModuleGeometry {
        &self.geometry
    }

    pub fn mode(&self) -> ModuleMode {
        self.mode
    }

    /// Last measured angle, (-180, 180]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Last accepted target
    pub fn target(&self) -> ModuleState {
        self.target
    }

    pub fn offset_ticks(&self) -> f64 {
        self.offset_ticks
    }

    /// Raw azimuth reading, counter-clockwise positive
    fn read_azimuth(&mut self) -> Result<Option<f64>, ActuatorError> {
        let raw = self.steer.read_position()?;
        Ok(raw.map(|ticks| self.sensor_ticks(ticks)))
    }

    /// Convert between device ticks and counter-clockwise ticks (its own inverse)
    fn sensor_ticks(&self, ticks: f64) -> f64 {
        if self.inversion.sensor { -ticks } else { ticks }
    }

    /// Read the azimuth sensor and update the measured angle
    ///
    /// When the sensor gives nothing the previous angle is kept.
    pub fn measure(&mut self) -> f64 {
        match self.read_azimuth() {
            Ok(Some(raw)) => {
                if self.sensor_fault {
                    info!("{}: azimuth sensor recovered", self.position());
                    self.sensor_fault = false;
                }
                self.last_raw = Some(raw);
                self.angle = sensor_to_angle(
                    raw,
                    self.offset_ticks,
                    self.settings.ticks_per_revolution,
                );
            }
            Ok(None) => self.sensor_failed("no data"),
            Err(e) => self.sensor_failed(&e.to_string()),
        }
        self.angle
    }

    fn sensor_failed(&mut self, reason: &str) {
        if !self.sensor_fault {
            warn!(
                "{}: azimuth read failed ({}), holding {:.1} deg",
                self.position(),
                reason,
                self.angle
            );
            self.sensor_fault = true;
        }
    }

    /// Drive toward an optimized target
    ///
    /// # Arguments
    /// * `state` - Normalized angle and signed wheel speed (m/s)
    /// * `dt` - Seconds since the previous tick
    pub fn set_target(&mut self, state: ModuleState, dt: f64) {
        self.mode = ModuleMode::Tracking;
        self.target = state;

        let error_deg = delta(self.angle, state.angle);
        let error_ticks = degrees_to_ticks(error_deg, self.settings.ticks_per_revolution);

        let steer_result = match self.settings.azimuth_control {
            AzimuthControl::Host => {
                let mut velocity = self.azimuth.update(error_ticks, dt);
                if self.inversion.steer {
                    velocity = -velocity;
                }
                self.steer.command_speed(SpeedCommand::Velocity(velocity))
            }
            AzimuthControl::Onboard => match self.last_raw {
                Some(raw) if !self.azimuth.within_tolerance(error_ticks) => {
                    let goal = self.sensor_ticks(raw + error_ticks);
                    self.steer.command_position(goal)
                }
                _ => Ok(()),
            },
        };
        if let Err(e) = steer_result {
            warn!("{}: steer command failed: {}", self.position(), e);
        }

        let command = self.drive_command(state.speed);
        if let Err(e) = self.drive.command_speed(command) {
            warn!("{}: drive command failed: {}", self.position(), e);
        }
    }

    fn drive_command(&self, speed: f64) -> SpeedCommand {
        let mut output = (speed / self.settings.max_speed).clamp(-1.0, 1.0);
        if self.inversion.drive {
            output = -output;
        }
        match self.settings.drive_mode {
            DriveMode::OpenLoop => SpeedCommand::DutyCycle(output),
            DriveMode::ClosedLoop => {
                SpeedCommand::Velocity(output * self.settings.drive_setpoint_max)
            }
        }
    }

    /// Zero both motors and go back to idle
    pub fn stop(&mut self) {
        self.mode = ModuleMode::Idle;
        self.azimuth.reset();
        self.target.speed = 0.0;

        if self.settings.azimuth_control == AzimuthControl::Host {
            if let Err(e) = self.steer.command_speed(SpeedCommand::Velocity(0.0)) {
                warn!("{}: failed to stop steer motor: {}", self.position(), e);
            }
        }
        let command = self.drive_command(0.0);
        if let Err(e) = self.drive.command_speed(command) {
            warn!("{}: failed to stop drive motor: {}", self.position(), e);
        }
    }

    /// Make the current wheel direction the new zero (memory only)
    ///
    /// # Returns
    /// The new offset, or `None` when no sensor reading is available
    pub fn zero_azimuth(&mut self) -> Option<f64> {
        let raw = match self.read_azimuth() {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(_) => {
                warn!("{}: cannot zero azimuth without a fresh reading", self.position());
                return None;
            }
        };

        self.offset_ticks = raw;
        self.last_raw = Some(raw);
        self.angle = 0.0;
        // Keep an idle wheel where it is instead of turning to the old target
        self.target = ModuleState::new(0.0, 0.0);
        self.azimuth.reset();

        info!("{}: azimuth zeroed at {} ticks", self.position(), raw);
        Some(raw)
    }

    /// Write the current zero offset to durable storage
    pub fn persist_azimuth_offset(
        &self,
        store: &mut dyn CalibrationStore,
    ) -> Result<(), CalibrationError> {
        store.store(self.position().key(), self.offset_ticks)?;
        info!(
            "{}: saved azimuth offset {}",
            self.position(),
            self.offset_ticks
        );
        Ok(())
    }
}

// Timeouts, topics, platform configuration
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::MotorIds;
use crate::swerve::azimuth::{Gains, GainsError};
use crate::swerve::geometry::{MODULE_COUNT, ModuleGeometry, ModulePosition, rectangular};
use crate::swerve::module::{AzimuthControl, DriveMode, ModuleInversion, ModuleSettings};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_CHASSIS: &str = "swerve/cmd/chassis"; // driver commands
pub const TOPIC_CMD_OPERATOR: &str = "swerve/cmd/operator"; // calibration buttons
pub const TOPIC_HEADING: &str = "swerve/state/heading"; // gyro yaw in
pub const TOPIC_TELEMETRY: &str = "swerve/state/telemetry"; // per-tick snapshot
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the Feetech servo bus
pub const MOTOR_PORT: &str = "/dev/ttyACM0";

// Enable hardware motor control (false runs against simulated actuators)
pub const MOTOR_ENABLED: bool = true;

// Default platform: 0.5334 m wheel base, 0.4826 m track width
const WHEEL_BASE: f64 = 0.5334;
const TRACK_WIDTH: f64 = 0.4826;
const STEER_IDS: [u8; MODULE_COUNT] = [5, 6, 7, 8];
const DRIVE_IDS: [u8; MODULE_COUNT] = [1, 2, 3, 4];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Expected {expected} swerve modules, found {found}")]
    ModuleCount { expected: usize, found: usize },

    #[error("Module {index} must be {expected}, found {found}")]
    ModuleOrder {
        index: usize,
        expected: ModulePosition,
        found: ModulePosition,
    },

    #[error("Invalid module geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid {name}: {value}")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("Invalid gains: {0}")]
    InvalidGains(#[from] GainsError),

    #[error("Motor id {0} is used more than once")]
    DuplicateMotorId(u8),

    #[error("Expected hardware for {expected} modules, got {found}")]
    HardwareCount { expected: usize, found: usize },

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One module entry of the platform config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub position: ModulePosition,
    /// Forward offset from robot center (m)
    pub x: f64,
    /// Leftward offset from robot center (m)
    pub y: f64,
    pub steer_id: u8,
    pub drive_id: u8,
    #[serde(default)]
    pub drive_inverted: bool,
    #[serde(default)]
    pub steer_inverted: bool,
    #[serde(default)]
    pub sensor_inverted: bool,
}

impl ModuleConfig {
    pub fn inversion(&self) -> ModuleInversion {
        ModuleInversion {
            drive: self.drive_inverted,
            steer: self.steer_inverted,
            sensor: self.sensor_inverted,
        }
    }
}

/// Platform description, loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwerveConfig {
    /// Front-left, front-right, back-left, back-right
    pub modules: Vec<ModuleConfig>,
    /// Fastest wheel speed, and the chassis speed at full forward/strafe (m/s)
    pub max_speed: f64,
    /// Chassis rotation rate at full rotation command (rad/s)
    pub max_angular_rate: f64,
    /// Extra cap on wheel speed, (0, 1]
    pub speed_limit: f64,
    pub ticks_per_revolution: f64,
    /// Drive velocity at full speed (ticks/s)
    pub drive_setpoint_max: f64,
    pub drive_mode: DriveMode,
    pub azimuth_control: AzimuthControl,
    /// Set for gyros that count clockwise positive
    pub gyro_inverted: bool,
    pub gains: Gains,
    pub calibration_path: PathBuf,
}

impl Default for SwerveConfig {
    fn default() -> Self {
        let modules = rectangular(WHEEL_BASE, TRACK_WIDTH)
            .iter()
            .enumerate()
            .map(|(i, m)| ModuleConfig {
                position: m.position,
                x: m.x,
                y: m.y,
                steer_id: STEER_IDS[i],
                drive_id: DRIVE_IDS[i],
                drive_inverted: false,
                steer_inverted: false,
                sensor_inverted: false,
            })
            .collect();

        Self {
            modules,
            max_speed: 3.5,
            max_angular_rate: std::f64::consts::TAU,
            speed_limit: 1.0,
            ticks_per_revolution: 4096.0,
            drive_setpoint_max: 3000.0,
            drive_mode: DriveMode::ClosedLoop,
            azimuth_control: AzimuthControl::Host,
            gyro_inverted: false,
            gains: Gains::default(),
            calibration_path: PathBuf::from("swerve_calibration.json"),
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit { name, value })
    }
}

impl SwerveConfig {
    pub fn parse_json(text: &str) -> Result<Self, ConfigError> {
        let config: SwerveConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Refuse any setting the drive cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_modules()?;

        positive("max_speed", self.max_speed)?;
        positive("max_angular_rate", self.max_angular_rate)?;
        positive("ticks_per_revolution", self.ticks_per_revolution)?;
        positive("drive_setpoint_max", self.drive_setpoint_max)?;
        if !(self.speed_limit > 0.0 && self.speed_limit <= 1.0) {
            return Err(ConfigError::InvalidLimit {
                name: "speed_limit",
                value: self.speed_limit,
            });
        }

        self.gains.validate()?;

        let mut seen = Vec::with_capacity(2 * MODULE_COUNT);
        for id in self
            .modules
            .iter()
            .flat_map(|m| [m.steer_id, m.drive_id])
        {
            if seen.contains(&id) {
                return Err(ConfigError::DuplicateMotorId(id));
            }
            seen.push(id);
        }

        Ok(())
    }

    fn check_modules(&self) -> Result<(), ConfigError> {
        if self.modules.len() != MODULE_COUNT {
            return Err(ConfigError::ModuleCount {
                expected: MODULE_COUNT,
                found: self.modules.len(),
            });
        }

        for (index, (module, expected)) in self.modules.iter().zip(ModulePosition::ALL).enumerate() {
            if module.position != expected {
                return Err(ConfigError::ModuleOrder {
                    index,
                    expected,
                    found: module.position,
                });
            }
            if !module.x.is_finite() || !module.y.is_finite() {
                return Err(ConfigError::InvalidGeometry(format!(
                    "{} offset ({}, {}) is not finite",
                    module.position, module.x, module.y
                )));
            }
        }

        for (i, a) in self.modules.iter().enumerate() {
            for b in &self.modules[i + 1..] {
                if a.x == b.x && a.y == b.y {
                    return Err(ConfigError::InvalidGeometry(format!(
                        "{} and {} share the offset ({}, {})",
                        a.position, b.position, a.x, a.y
                    )));
                }
            }
        }

        Ok(())
    }

    /// Module offsets in module order
    pub fn geometry(&self) -> Result<[ModuleGeometry; MODULE_COUNT], ConfigError> {
        self.check_modules()?;
        Ok(std::array::from_fn(|i| {
            let m = &self.modules[i];
            ModuleGeometry::new(m.position, m.x, m.y)
        }))
    }

    /// Servo ids in module order
    pub fn motor_ids(&self) -> Result<MotorIds, ConfigError> {
        self.check_modules()?;
        Ok(MotorIds {
            steer: std::array::from_fn(|i| self.modules[i].steer_id),
            drive: std::array::from_fn(|i| self.modules[i].drive_id),
        })
    }

    pub fn module_settings(&self) -> ModuleSettings {
        ModuleSettings {
            ticks_per_revolution: self.ticks_per_revolution,
            max_speed: self.max_speed,
            drive_setpoint_max: self.drive_setpoint_max,
            drive_mode: self.drive_mode,
            azimuth_control: self.azimuth_control,
            gains: self.gains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SwerveConfig::default();
        config.validate().unwrap();
        assert_eq!(config.modules.len(), MODULE_COUNT);
        let geometry = config.geometry().unwrap();
        assert!((geometry[0].x - WHEEL_BASE / 2.0).abs() < 1e-12);
        assert!((geometry[0].y - TRACK_WIDTH / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SwerveConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(SwerveConfig::parse_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SwerveConfig::parse_json(r#"{"max_speed": 2.0, "drive_mode": "open_loop"}"#)
            .unwrap();
        assert_eq!(config.max_speed, 2.0);
        assert_eq!(config.drive_mode, DriveMode::OpenLoop);
        assert_eq!(config.modules, SwerveConfig::default().modules);
    }

    #[test]
    fn test_inversion_flags_default_off() {
        let config = SwerveConfig::parse_json(
            r#"{"modules": [
                {"position": "front_left", "x": 0.25, "y": 0.25, "steer_id": 5, "drive_id": 1,
                 "steer_inverted": true},
                {"position": "front_right", "x": 0.25, "y": -0.25, "steer_id": 6, "drive_id": 2,
                 "sensor_inverted": true, "drive_inverted": true},
                {"position": "back_left", "x": -0.25, "y": 0.25, "steer_id": 7, "drive_id": 3},
                {"position": "back_right", "x": -0.25, "y": -0.25, "steer_id": 8, "drive_id": 4}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            config.modules[0].inversion(),
            ModuleInversion {
                drive: false,
                steer: true,
                sensor: false
            }
        );
        assert_eq!(
            config.modules[1].inversion(),
            ModuleInversion {
                drive: true,
                steer: false,
                sensor: true
            }
        );
        assert_eq!(config.modules[2].inversion(), ModuleInversion::default());
    }

    #[test]
    fn test_wrong_module_count() {
        let mut config = SwerveConfig::default();
        config.modules.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ModuleCount { expected: 4, found: 3 })
        ));
        assert!(config.geometry().is_err());
    }

    #[test]
    fn test_wrong_module_order() {
        let mut config = SwerveConfig::default();
        config.modules.swap(0, 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ModuleOrder { index: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_geometry() {
        let mut config = SwerveConfig::default();
        config.modules[3].x = config.modules[2].x;
        config.modules[3].y = config.modules[2].y;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_invalid_limits_and_gains() {
        let mut config = SwerveConfig::default();
        config.speed_limit = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit { name: "speed_limit", .. })
        ));

        let mut config = SwerveConfig::default();
        config.max_speed = 0.0;
        assert!(config.validate().is_err());

        let mut config = SwerveConfig::default();
        config.gains.cruise_velocity = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidGains(_))));
    }

    #[test]
    fn test_duplicate_motor_id() {
        let mut config = SwerveConfig::default();
        config.modules[2].drive_id = config.modules[0].steer_id;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateMotorId(5))
        ));
    }
}

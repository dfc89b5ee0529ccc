// Swerve drive coordinator
//
// Once per control tick:
// 1. Apply queued operator commands (zero heading, zero/save azimuths, speed limit)
// 2. Read heading and every module's azimuth
// 3. Kinematics -> shortest-path optimization -> speed desaturation
// 4. Hand each module its target

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::angle::optimize;
use super::calibration::CalibrationStore;
use super::geometry::MODULE_COUNT;
use super::heading::{Gyro, Heading};
use super::kinematics::{ChassisSpeeds, ChassisVelocity, ModuleState, SwerveKinematics};
use super::module::{ModuleHardware, SwerveModule};
use super::normalizer::{clamp_speed_limit, desaturate};
use crate::config::{ConfigError, LOOP_HZ, SwerveConfig};
use crate::messages::{ModuleTelemetry, OperatorCommand, Telemetry};

/// Cloneable handle for queueing operator commands from anywhere
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<OperatorCommand>,
}

impl CommandSender {
    /// Queue a command for the next tick; `false` if the drive is gone
    pub fn send(&self, command: OperatorCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

pub struct SwerveDrive {
    kinematics: SwerveKinematics,
    modules: [SwerveModule; MODULE_COUNT],
    gyro: Box<dyn Gyro>,
    heading: Heading,
    gyro_fault: bool,
    store: Box<dyn CalibrationStore>,
    commands_tx: mpsc::UnboundedSender<OperatorCommand>,
    commands_rx: mpsc::UnboundedReceiver<OperatorCommand>,
    max_speed: f64,
    max_angular_rate: f64,
    speed_limit: f64,
    dt: f64,
    warnings: Vec<String>,
}

impl SwerveDrive {
    /// Build the drive; refuses invalid configuration
    ///
    /// `hardware` must hold one entry per module, in module order.
    pub fn new(
        config: &SwerveConfig,
        hardware: Vec<ModuleHardware>,
        gyro: Box<dyn Gyro>,
        store: Box<dyn CalibrationStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let found = hardware.len();
        if found != MODULE_COUNT {
            return Err(ConfigError::HardwareCount {
                expected: MODULE_COUNT,
                found,
            });
        }

        let geometry = config.geometry()?;
        let settings = config.module_settings();

        let modules: Vec<SwerveModule> = geometry
            .iter()
            .zip(&config.modules)
            .zip(hardware)
            .map(|((g, m), hw)| SwerveModule::new(*g, settings, m.inversion(), hw, &*store))
            .collect();
        let modules: [SwerveModule; MODULE_COUNT] =
            modules
                .try_into()
                .map_err(|_| ConfigError::HardwareCount {
                    expected: MODULE_COUNT,
                    found,
                })?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        info!(
            "Swerve drive ready: max speed {} m/s, max rotation {} rad/s",
            config.max_speed, config.max_angular_rate
        );

        Ok(Self {
            kinematics: SwerveKinematics::new(geometry),
            modules,
            gyro,
            heading: Heading::new(config.gyro_inverted),
            gyro_fault: false,
            store,
            commands_tx,
            commands_rx,
            max_speed: config.max_speed,
            max_angular_rate: config.max_angular_rate,
            speed_limit: config.speed_limit,
            dt: 1.0 / LOOP_HZ as f64,
            warnings: Vec::new(),
        })
    }

    /// Handle for queueing operator commands
    pub fn commands(&self) -> CommandSender {
        CommandSender {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn modules(&self) -> &[SwerveModule; MODULE_COUNT] {
        &self.modules
    }

    /// Heading used by the last tick (deg)
    pub fn heading(&self) -> f64 {
        self.heading.degrees()
    }

    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    /// Run the whole pipeline once
    ///
    /// # Arguments
    /// * `velocity` - Normalized chassis command; out-of-range axes are clamped
    /// * `field_relative` - Interpret translation relative to the field instead of the robot
    pub fn drive_tick(&mut self, velocity: ChassisVelocity, field_relative: bool) -> Telemetry {
        self.drain_commands();

        let cmd = velocity.clamped();
        let heading = self.read_heading();
        for module in self.modules.iter_mut() {
            module.measure();
        }

        let requested = ChassisSpeeds::new(
            cmd.forward * self.max_speed,
            cmd.strafe * self.max_speed,
            cmd.rotation * self.max_angular_rate,
        );
        let speeds = if field_relative {
            ChassisSpeeds::from_field_relative(requested, heading)
        } else {
            requested
        };

        let previous = self.modules.each_ref().map(|m| m.target());
        let mut states = self.kinematics.to_module_states(speeds, &previous);
        for (state, module) in states.iter_mut().zip(&self.modules) {
            let (angle, speed) = optimize(state.angle, module.angle(), state.speed);
            *state = ModuleState::new(angle, speed);
        }
        desaturate(&mut states, self.max_speed, self.speed_limit);

        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_target(state, self.dt);
        }

        Telemetry {
            forward: cmd.forward,
            strafe: cmd.strafe,
            rotation: cmd.rotation,
            heading,
            field_relative,
            speed_limit: self.speed_limit,
            modules: self
                .modules
                .iter()
                .map(|m| ModuleTelemetry {
                    name: m.position().key().to_string(),
                    angle: m.angle(),
                    target_angle: m.target().angle,
                    speed: m.target().speed,
                })
                .collect(),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            debug!("Applying operator command {:?}", command);
            self.apply(command);
        }
    }

    fn apply(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::ZeroHeading => self.zero_heading(),
            OperatorCommand::ZeroAzimuths => self.zero_all_azimuths(),
            OperatorCommand::SaveAzimuths => self.persist_all_azimuths(),
            OperatorCommand::SetSpeedLimit { limit } => self.set_speed_limit(limit),
        }
    }

    fn read_heading(&mut self) -> f64 {
        match self.gyro.angle() {
            Ok(raw) => {
                if self.gyro_fault {
                    info!("Gyro readings resumed");
                    self.gyro_fault = false;
                }
                self.heading.update(raw)
            }
            Err(e) => {
                if !self.gyro_fault {
                    warn!("Gyro read failed ({}), holding heading {:.1}", e, self.heading.degrees());
                    self.gyro_fault = true;
                }
                self.heading.degrees()
            }
        }
    }

    /// Current robot orientation becomes field "forward"
    pub fn zero_heading(&mut self) {
        match self.gyro.angle() {
            Ok(raw) => {
                self.heading.zero(raw);
                info!("Heading zeroed at gyro angle {:.1}", raw);
            }
            Err(e) => {
                warn!("Cannot zero heading: {}", e);
                self.warnings.push(format!("zero heading failed: {}", e));
            }
        }
    }

    /// Current wheel directions become azimuth zero, in memory only
    pub fn zero_all_azimuths(&mut self) {
        for module in self.modules.iter_mut() {
            if module.zero_azimuth().is_none() {
                self.warnings
                    .push(format!("{}: zero azimuth failed, no sensor reading", module.position()));
            }
        }
    }

    /// Save every module's zero offset
    ///
    /// A failed write leaves the in-memory offset in use and is reported as a warning.
    pub fn persist_all_azimuths(&mut self) {
        for module in &self.modules {
            if let Err(e) = module.persist_azimuth_offset(self.store.as_mut()) {
                warn!("{}: could not save azimuth offset: {}", module.position(), e);
                self.warnings
                    .push(format!("{}: save azimuth offset failed: {}", module.position(), e));
            }
        }
    }

    pub fn set_speed_limit(&mut self, limit: f64) {
        let clamped = clamp_speed_limit(limit);
        if clamped != limit {
            warn!("Speed limit {} out of range, using {}", limit, clamped);
        }
        info!("Speed limit set to {}", clamped);
        self.speed_limit = clamped;
    }

    /// Zero every motor output and idle the modules
    pub fn stop(&mut self) {
        for module in self.modules.iter_mut() {
            module.stop();
        }
    }
}

impl Drop for SwerveDrive {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{SimActuator, SimActuatorState, SpeedCommand};
    use crate::swerve::calibration::{CalibrationError, MemoryStore};
    use crate::swerve::heading::SimGyro;
    use crate::swerve::module::ModuleMode;
    use std::sync::{Arc, Mutex};

    const TPR: f64 = 4096.0;

    /// Store the test can look into after handing it to the drive
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl CalibrationStore for SharedStore {
        fn load(&self, key: &str) -> Result<Option<f64>, CalibrationError> {
            self.0.lock().unwrap().load(key)
        }

        fn store(&mut self, key: &str, value: f64) -> Result<(), CalibrationError> {
            self.0.lock().unwrap().store(key, value)
        }
    }

    struct Rig {
        drive: SwerveDrive,
        gyro: SimGyro,
        store: SharedStore,
        steer: Vec<Arc<Mutex<SimActuatorState>>>,
        drives: Vec<Arc<Mutex<SimActuatorState>>>,
    }

    fn rig_with(config: &SwerveConfig, steer_ticks: [f64; MODULE_COUNT]) -> Rig {
        let dt = 1.0 / LOOP_HZ as f64;
        let gyro = SimGyro::new(0.0);
        let store = SharedStore::default();
        let mut steer = Vec::new();
        let mut drives = Vec::new();
        let hardware = steer_ticks
            .iter()
            .map(|&ticks| {
                let s = SimActuator::at(ticks, dt, 3000.0);
                let d = SimActuator::new(dt, 3000.0);
                steer.push(s.handle());
                drives.push(d.handle());
                ModuleHardware {
                    steer: Box::new(s),
                    drive: Box::new(d),
                }
            })
            .collect();
        let drive = SwerveDrive::new(
            config,
            hardware,
            Box::new(gyro.clone()),
            Box::new(store.clone()),
        )
        .unwrap();
        Rig {
            drive,
            gyro,
            store,
            steer,
            drives,
        }
    }

    fn rig() -> Rig {
        rig_with(&SwerveConfig::default(), [0.0; MODULE_COUNT])
    }

    #[test]
    fn test_forward_all_modules_straight() {
        let mut r = rig();
        let t = r.drive.drive_tick(ChassisVelocity::new(1.0, 0.0, 0.0), false);
        assert_eq!(t.modules.len(), MODULE_COUNT);
        for m in &t.modules {
            assert!(m.target_angle.abs() < 1e-9);
            assert!((m.speed - 3.5).abs() < 1e-9);
        }
        for d in &r.drives {
            assert_eq!(d.lock().unwrap().last_speed, Some(SpeedCommand::Velocity(3000.0)));
        }
    }

    #[test]
    fn test_rotation_equal_speeds() {
        let mut r = rig();
        let t = r.drive.drive_tick(ChassisVelocity::new(0.0, 0.0, 0.5), false);
        let first = t.modules[0].speed.abs();
        assert!(first > 0.0);
        for m in &t.modules {
            assert!((m.speed.abs() - first).abs() < 1e-9);
        }
    }

    #[test]
    fn test_field_relative_matches_rotated_robot_command() {
        let mut field = rig();
        field.gyro.set(Some(90.0));
        let a = field.drive.drive_tick(ChassisVelocity::new(1.0, 0.0, 0.0), true);

        let mut robot = rig();
        let b = robot.drive.drive_tick(ChassisVelocity::new(0.0, -1.0, 0.0), false);

        for (x, y) in a.modules.iter().zip(&b.modules) {
            assert!((x.target_angle - y.target_angle).abs() < 1e-9);
            assert!((x.speed - y.speed).abs() < 1e-9);
        }
    }

    #[test]
    fn test_out_of_range_command_clamped() {
        let mut r = rig();
        let t = r.drive.drive_tick(ChassisVelocity::new(5.0, 0.0, 0.0), false);
        assert_eq!(t.forward, 1.0);
        for m in &t.modules {
            assert!((m.speed - 3.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_combined_motion_desaturated() {
        let mut r = rig();
        let t = r.drive.drive_tick(ChassisVelocity::new(1.0, 1.0, 1.0), false);
        let fastest = t.modules.iter().map(|m| m.speed.abs()).fold(0.0, f64::max);
        assert!((fastest - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_wheel_behind_target_flips() {
        // Front-left wheel currently points backwards (180 deg)
        let mut r = rig_with(&SwerveConfig::default(), [TPR / 2.0, 0.0, 0.0, 0.0]);
        let t = r.drive.drive_tick(ChassisVelocity::new(0.5, 0.0, 0.0), false);
        assert_eq!(t.modules[0].target_angle, 180.0);
        assert!(t.modules[0].speed < 0.0);
        assert!(t.modules[1].speed > 0.0);
    }

    #[test]
    fn test_stopped_wheels_hold_angle() {
        let mut r = rig();
        r.drive.drive_tick(ChassisVelocity::new(0.0, 0.6, 0.0), false);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), false);
        for m in &t.modules {
            assert!((m.target_angle - 90.0).abs() < 1e-9);
            assert_eq!(m.speed, 0.0);
        }
    }

    #[test]
    fn test_zero_heading_is_queued_until_next_tick() {
        let mut r = rig();
        r.gyro.set(Some(30.0));
        r.drive.drive_tick(ChassisVelocity::zero(), true);
        assert_eq!(r.drive.heading(), 30.0);

        assert!(r.drive.commands().send(OperatorCommand::ZeroHeading));
        // Nothing happens until the drive ticks
        assert_eq!(r.drive.heading(), 30.0);

        let t = r.drive.drive_tick(ChassisVelocity::zero(), true);
        assert_eq!(t.heading, 0.0);

        r.gyro.set(Some(75.0));
        let t = r.drive.drive_tick(ChassisVelocity::zero(), true);
        assert_eq!(t.heading, 45.0);
    }

    #[test]
    fn test_zero_heading_leaves_module_angles() {
        let mut r = rig_with(&SwerveConfig::default(), [512.0; MODULE_COUNT]);
        r.gyro.set(Some(30.0));
        r.drive.commands().send(OperatorCommand::ZeroHeading);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), true);
        for m in &t.modules {
            assert_eq!(m.angle, 45.0);
        }
    }

    #[test]
    fn test_zero_and_save_azimuths() {
        let ticks = [100.0, 200.0, 300.0, 400.0];
        let mut r = rig_with(&SwerveConfig::default(), ticks);

        r.drive.commands().send(OperatorCommand::ZeroAzimuths);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), false);
        assert!(t.modules.iter().all(|m| m.angle == 0.0));
        // Zeroing alone does not persist
        assert!(r.store.0.lock().unwrap().values.is_empty());

        r.drive.commands().send(OperatorCommand::SaveAzimuths);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), false);
        assert!(t.warnings.is_empty());
        let store = r.store.0.lock().unwrap();
        assert_eq!(store.values.get("front_left"), Some(&100.0));
        assert_eq!(store.values.get("back_right"), Some(&400.0));
    }

    #[test]
    fn test_saved_offsets_used_after_restart() {
        let store = SharedStore::default();
        store.0.lock().unwrap().values.insert("front_right".to_string(), 1024.0);

        let dt = 1.0 / LOOP_HZ as f64;
        let hardware = (0..MODULE_COUNT)
            .map(|_| ModuleHardware {
                steer: Box::new(SimActuator::at(1024.0, dt, 3000.0)),
                drive: Box::new(SimActuator::new(dt, 3000.0)),
            })
            .collect();
        let mut drive = SwerveDrive::new(
            &SwerveConfig::default(),
            hardware,
            Box::new(SimGyro::new(0.0)),
            Box::new(store),
        )
        .unwrap();

        let t = drive.drive_tick(ChassisVelocity::zero(), false);
        assert_eq!(t.modules[0].angle, 90.0);
        assert_eq!(t.modules[1].angle, 0.0);
    }

    #[test]
    fn test_save_failure_becomes_warning() {
        let mut r = rig_with(&SwerveConfig::default(), [100.0; MODULE_COUNT]);
        r.store.0.lock().unwrap().fail_writes = true;

        r.drive.commands().send(OperatorCommand::ZeroAzimuths);
        r.drive.commands().send(OperatorCommand::SaveAzimuths);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), false);

        assert_eq!(t.warnings.len(), MODULE_COUNT);
        // In-memory offsets still apply
        assert!(t.modules.iter().all(|m| m.angle == 0.0));
        assert!(r.drive.modules().iter().all(|m| m.offset_ticks() == 100.0));

        // Warnings are reported once
        let t = r.drive.drive_tick(ChassisVelocity::zero(), false);
        assert!(t.warnings.is_empty());
    }

    #[test]
    fn test_sensor_failure_isolated_to_one_module() {
        let mut r = rig_with(&SwerveConfig::default(), [512.0; MODULE_COUNT]);
        r.drive.drive_tick(ChassisVelocity::zero(), false);

        r.steer[2].lock().unwrap().fail_reads = true;
        let t = r.drive.drive_tick(ChassisVelocity::new(0.5, 0.0, 0.0), false);
        assert_eq!(t.modules[2].angle, 45.0);
        for d in &r.drives {
            assert!(d.lock().unwrap().last_speed.is_some());
        }
    }

    #[test]
    fn test_gyro_failure_holds_heading() {
        let mut r = rig();
        r.gyro.set(Some(20.0));
        r.drive.drive_tick(ChassisVelocity::zero(), true);
        r.gyro.set(None);
        let t = r.drive.drive_tick(ChassisVelocity::zero(), true);
        assert_eq!(t.heading, 20.0);
    }

    #[test]
    fn test_speed_limit_command() {
        let mut r = rig();
        r.drive
            .commands()
            .send(OperatorCommand::SetSpeedLimit { limit: 0.5 });
        let t = r.drive.drive_tick(ChassisVelocity::new(1.0, 0.0, 0.0), false);
        assert_eq!(t.speed_limit, 0.5);
        for m in &t.modules {
            assert!((m.speed - 1.75).abs() < 1e-9);
        }

        r.drive
            .commands()
            .send(OperatorCommand::SetSpeedLimit { limit: -2.0 });
        r.drive.drive_tick(ChassisVelocity::zero(), false);
        assert_eq!(r.drive.speed_limit(), 1.0);
    }

    #[test]
    fn test_rejects_wrong_hardware_count() {
        let dt = 1.0 / LOOP_HZ as f64;
        let hardware = (0..3)
            .map(|_| ModuleHardware {
                steer: Box::new(SimActuator::new(dt, 3000.0)),
                drive: Box::new(SimActuator::new(dt, 3000.0)),
            })
            .collect();
        let result = SwerveDrive::new(
            &SwerveConfig::default(),
            hardware,
            Box::new(SimGyro::new(0.0)),
            Box::new(MemoryStore::new()),
        );
        assert!(matches!(
            result,
            Err(ConfigError::HardwareCount { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = SwerveConfig::default();
        config.gains.acceleration = 0.0;
        let dt = 1.0 / LOOP_HZ as f64;
        let hardware = (0..MODULE_COUNT)
            .map(|_| ModuleHardware {
                steer: Box::new(SimActuator::new(dt, 3000.0)),
                drive: Box::new(SimActuator::new(dt, 3000.0)),
            })
            .collect();
        let result = SwerveDrive::new(
            &config,
            hardware,
            Box::new(SimGyro::new(0.0)),
            Box::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(ConfigError::InvalidGains(_))));
    }

    #[test]
    fn test_stop_idles_modules() {
        let mut r = rig();
        r.drive.drive_tick(ChassisVelocity::new(1.0, 0.0, 0.0), false);
        r.drive.stop();
        assert!(r.drive.modules().iter().all(|m| m.mode() == ModuleMode::Idle));
        for d in &r.drives {
            assert_eq!(d.lock().unwrap().last_speed, Some(SpeedCommand::Velocity(0.0)));
        }
    }
}

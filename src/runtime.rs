// 50 Hz swerve loop with watchdog
// If teleop stops sending chassis commands for CMD_TIMEOUT the wheels are
// commanded to zero speed until commands resume.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, MOTOR_ENABLED, TOPIC_CMD_CHASSIS, TOPIC_CMD_OPERATOR, TOPIC_HEADING,
    TOPIC_HEALTH, TOPIC_TELEMETRY, SwerveConfig,
};
use crate::messages::{ChassisCommand, OperatorCommand, RuntimeHealth};
use crate::motor::{SimActuator, SwerveHardware, feetech};
use crate::swerve::{
    ChassisVelocity, CommandSender, FeedGyro, JsonFileStore, MODULE_COUNT, ModuleHardware,
    SwerveDrive,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the runtime binary was asked to run
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub config: SwerveConfig,
    pub port: String,
    /// Run against simulated actuators instead of the servo bus
    pub sim: bool,
}

pub struct Runtime {
    latest_cmd: Option<ChassisCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    fn on_command(&mut self, cmd: ChassisCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Command for this tick, zero velocity when stale
    fn compute_command(&mut self) -> ChassisCommand {
        let cmd_age = self.cmd_received_at.elapsed();

        match &self.latest_cmd {
            Some(cmd) if cmd_age <= CMD_TIMEOUT => {
                if self.health != RuntimeHealth::Ok {
                    info!("Commands received, driving");
                }
                self.health = RuntimeHealth::Ok;
                cmd.clone()
            }
            latest => {
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:?} old), stopping wheels", cmd_age);
                }
                self.health = RuntimeHealth::CmdStale;
                // Keep the last frame
                ChassisCommand {
                    field_relative: latest.as_ref().is_none_or(|c| c.field_relative),
                    ..ChassisCommand::default()
                }
            }
        }
    }
}

/// Feetech servos when enabled, simulated actuators otherwise
fn open_hardware(
    options: &RuntimeOptions,
) -> Result<(Option<SwerveHardware>, Vec<ModuleHardware>), BoxError> {
    if options.sim || !MOTOR_ENABLED {
        info!("Running with simulated actuators");
        let dt = 1.0 / LOOP_HZ as f64;
        let max_velocity = feetech::MAX_VELOCITY as f64;
        let modules = (0..MODULE_COUNT)
            .map(|_| ModuleHardware {
                steer: Box::new(SimActuator::new(dt, max_velocity)),
                drive: Box::new(SimActuator::new(dt, max_velocity)),
            })
            .collect();
        return Ok((None, modules));
    }

    let hardware = SwerveHardware::open(&options.port, options.config.motor_ids()?)?;
    hardware.initialize(options.config.azimuth_control, &options.config.gains)?;
    let modules = hardware.modules();
    Ok((Some(hardware), modules))
}

fn forward_operator_command(commands: &CommandSender, payload: &[u8]) {
    match serde_json::from_slice::<OperatorCommand>(payload) {
        Ok(cmd) => {
            info!("Operator command: {:?}", cmd);
            if !commands.send(cmd) {
                warn!("Drive is gone, dropping operator command");
            }
        }
        Err(e) => warn!("Failed to parse operator command: {}", e),
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    options.config.validate()?;

    // Declared before the drive so it is dropped after it
    let (hardware, modules) = open_hardware(&options)?;
    let (gyro_tx, gyro) = FeedGyro::channel();
    let store = JsonFileStore::open(&options.config.calibration_path);
    info!("Calibration file: {}", store.path().display());

    let mut drive = SwerveDrive::new(&options.config, modules, Box::new(gyro), Box::new(store))?;
    let commands = drive.commands();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_chassis = session.declare_subscriber(TOPIC_CMD_CHASSIS).await?;
    let sub_operator = session.declare_subscriber(TOPIC_CMD_OPERATOR).await?;
    let sub_heading = session.declare_subscriber(TOPIC_HEADING).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!(
        "Subscribed to: {}, {}, {}",
        TOPIC_CMD_CHASSIS, TOPIC_CMD_OPERATOR, TOPIC_HEADING
    );
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }

        // 1. Drain pending inputs (non-blocking), keep latest chassis command
        while let Ok(Some(sample)) = sub_chassis.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ChassisCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_operator.try_recv() {
            forward_operator_command(&commands, &sample.payload().to_bytes());
        }
        while let Ok(Some(sample)) = sub_heading.try_recv() {
            match serde_json::from_slice::<f64>(&sample.payload().to_bytes()) {
                Ok(yaw) => feed_heading(&gyro_tx, yaw),
                Err(e) => warn!("Failed to parse heading: {}", e),
            }
        }

        // 2. Watchdog, then the drive pipeline
        let cmd = runtime.compute_command();
        let telemetry = drive.drive_tick(ChassisVelocity::from(&cmd), cmd.field_relative);

        // 3. Publish telemetry and health
        let telemetry_json = serde_json::to_string(&telemetry)?;
        pub_telemetry.put(telemetry_json).await?;

        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;
    }

    drive.stop();
    drop(drive);
    if let Some(hardware) = &hardware {
        if let Err(e) = hardware.disable_torque() {
            warn!("Failed to disable torque: {}", e);
        }
    }
    info!("Runtime stopped");
    Ok(())
}

fn feed_heading(gyro_tx: &watch::Sender<Option<f64>>, yaw: f64) {
    if yaw.is_finite() {
        gyro_tx.send_replace(Some(yaw));
    } else {
        warn!("Ignoring non-finite heading {}", yaw);
    }
}

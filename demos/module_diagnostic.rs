// Module diagnostic: READ-ONLY check of the eight swerve servos
//
// Pings every steer and drive servo, then prints raw azimuth ticks and the
// calibrated wheel angle using the saved zero offsets. Nothing is written to
// the motors.
//
// Usage: cargo run --example module_diagnostic -- [--port PORT] [--config FILE]

use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

use swerve_zenoh_runtime::config::{MOTOR_PORT, SwerveConfig};
use swerve_zenoh_runtime::motor::feetech::{FeetechBus, POSITION_RESOLUTION, Register};
use swerve_zenoh_runtime::swerve::angle::sensor_to_angle;
use swerve_zenoh_runtime::swerve::{CalibrationStore, JsonFileStore};

#[derive(Parser, Debug)]
#[command(about = "Read-only swerve servo diagnostic")]
struct Args {
    /// Serial port of the servo bus
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    /// Platform config (JSON); built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SwerveConfig::load(path)?,
        None => SwerveConfig::default(),
    };
    let store = JsonFileStore::open(&config.calibration_path);

    println!("Swerve module diagnostic (READ-ONLY)");
    println!();
    println!("Serial port:      {}", args.port);
    println!("Calibration file: {}", store.path().display());
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&args.port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut all_found = true;
    for module in &config.modules {
        for (role, id) in [("steer", module.steer_id), ("drive", module.drive_id)] {
            print!("  {} {} (ID {}): ", module.position, role, id);
            io::stdout().flush()?;
            match bus.ping(id) {
                Ok(true) => println!("✓ RESPONDING"),
                Ok(false) => {
                    println!("✗ NO RESPONSE");
                    all_found = false;
                }
                Err(e) => {
                    println!("✗ ERROR: {}", e);
                    all_found = false;
                }
            }
        }
    }
    println!();
    if !all_found {
        println!("⚠ WARNING: Not all servos responded, check power, ids and wiring");
        println!();
    }

    println!("Step 3: Reading azimuths...");
    println!();
    for module in &config.modules {
        let key = module.position.key();
        println!("  === {} (steer ID {}) ===", module.position, module.steer_id);

        match bus.read_u8(module.steer_id, Register::OperatingMode) {
            Ok(mode) => {
                let name = match mode {
                    0 => "Position",
                    1 => "Velocity",
                    2 => "PWM",
                    3 => "Step",
                    _ => "Unknown",
                };
                println!("    Operating Mode: {} ({})", mode, name);
            }
            Err(e) => println!("    Operating Mode: ERROR - {}", e),
        }

        match bus.read_u8(module.steer_id, Register::TorqueEnable) {
            Ok(val) => {
                let status = if val == 1 { "ENABLED" } else { "disabled" };
                println!("    Torque Enable:  {} ({})", val, status);
            }
            Err(e) => println!("    Torque Enable:  ERROR - {}", e),
        }

        let offset = match store.load(key) {
            Ok(Some(offset)) => {
                println!("    Zero offset:    {} ticks", offset);
                offset
            }
            Ok(None) => {
                println!("    Zero offset:    not calibrated (using 0)");
                0.0
            }
            Err(e) => {
                println!("    Zero offset:    ERROR - {}", e);
                0.0
            }
        };

        match bus.get_position(module.steer_id) {
            Ok(raw) => {
                let ticks = if module.sensor_inverted { -(raw as f64) } else { raw as f64 };
                let angle = sensor_to_angle(ticks, offset, POSITION_RESOLUTION as f64);
                println!("    Raw position:   {}", raw);
                println!("    Wheel angle:    {:.1}°", angle);
            }
            Err(e) => println!("    Raw position:   ERROR - {}", e),
        }

        match bus.get_velocity(module.drive_id) {
            Ok(vel) => println!("    Drive velocity: {} (raw)", vel),
            Err(e) => println!("    Drive velocity: ERROR - {}", e),
        }

        println!();
    }

    println!("Diagnostic complete.");
    println!("Wheels pointing straight forward should read close to 0°.");
    println!("If not, zero the azimuths from teleop and save them.");

    Ok(())
}

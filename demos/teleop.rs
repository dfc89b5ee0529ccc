// Keyboard teleop
// WASD move, Z/X rotate, R/F speed, O field-relative toggle,
// G zero heading, B zero azimuths, P save azimuths, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use swerve_zenoh_runtime::config::{TOPIC_CMD_CHASSIS, TOPIC_CMD_OPERATOR};
use swerve_zenoh_runtime::input::deadband;
use swerve_zenoh_runtime::messages::{ChassisCommand, OperatorCommand};

const SPEEDS: [f64; 3] = [0.25, 0.5, 1.0]; // fraction of full translation
const ROTATION_SPEEDS: [f64; 3] = [0.2, 0.4, 0.8]; // fraction of full rotation
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_chassis = session.declare_publisher(TOPIC_CMD_CHASSIS).await?;
    let pub_operator = session.declare_publisher(TOPIC_CMD_OPERATOR).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, O=field-relative, Q=quit");
    info!("Calibration: G=zero heading, B=zero azimuths, P=save azimuths");
    info!("Speed: LOW, field-relative: ON");

    enable_raw_mode()?;
    let result = run_teleop(&pub_chassis, &pub_operator).await;
    disable_raw_mode()?;

    result
}

async fn send_operator(
    publisher: &zenoh::pubsub::Publisher<'_>,
    command: OperatorCommand,
) -> Result<(), BoxError> {
    info!("Sending {:?}", command);
    publisher.put(serde_json::to_string(&command)?).await?;
    Ok(())
}

async fn run_teleop(
    pub_chassis: &zenoh::pubsub::Publisher<'_>,
    pub_operator: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;
    let mut field_relative = true;

    // Persistent velocity state
    let mut forward = 0.0;
    let mut strafe = 0.0;
    let mut rotation = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let first_press = kind == KeyEventKind::Press;

                match code {
                    // Translation
                    KeyCode::Char('w') if pressed => {
                        forward = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        forward = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        strafe = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        strafe = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation, counterclockwise positive
                    KeyCode::Char('z') if pressed => {
                        rotation = ROTATION_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        rotation = -ROTATION_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('o') if first_press => {
                        field_relative = !field_relative;
                        info!("Field-relative: {}", if field_relative { "ON" } else { "OFF" });
                    }

                    // Operator commands, once per press
                    KeyCode::Char('g') if first_press => {
                        send_operator(pub_operator, OperatorCommand::ZeroHeading).await?;
                    }
                    KeyCode::Char('b') if first_press => {
                        warn!("Zeroing azimuths: wheels should point straight forward");
                        send_operator(pub_operator, OperatorCommand::ZeroAzimuths).await?;
                    }
                    KeyCode::Char('p') if first_press => {
                        send_operator(pub_operator, OperatorCommand::SaveAzimuths).await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            forward = 0.0;
            strafe = 0.0;
            rotation = 0.0;
        }

        // Always publish at ~50Hz
        let cmd = ChassisCommand {
            forward: deadband(forward),
            strafe: deadband(strafe),
            rotation: deadband(rotation),
            field_relative,
        };
        pub_chassis.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}

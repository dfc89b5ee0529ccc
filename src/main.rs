use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::{MOTOR_PORT, SwerveConfig};
use swerve_zenoh_runtime::runtime::{self, RuntimeOptions};

#[derive(Parser, Debug)]
#[command(about = "Swerve drive runtime over zenoh")]
struct Args {
    /// Platform config (JSON); built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the servo bus
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    /// Run against simulated actuators
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            SwerveConfig::load(path)
        }
        None => Ok(SwerveConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    let options = RuntimeOptions {
        config,
        port: args.port,
        sim: args.sim,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

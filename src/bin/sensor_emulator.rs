//! Sensor Node Emulator Binary
//!
//! Stands in for the sensor node during local runs.
//!
//! Usage:
//!   sensor_emulator --bind 127.0.0.1:8080
//!   sensor_emulator --fixed "TEMP:36.6|HUM:48|HR:72|SPO2:98"
//!
//! Environment:
//!   SENSOR_EMULATOR_BIND - Listen address (default: 127.0.0.1:8080)
//!   SENSOR_EMULATOR_COMMAND - Poll command to answer (default: READ_ALL)

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use sensorlink_backend::emulator::{ResponseMode, SensorEmulator};
use sensorlink_backend::telemetry::decode;

#[derive(Parser, Debug)]
#[command(name = "sensor_emulator")]
#[command(about = "Emulated sensor node speaking the SensorLink wire protocol")]
struct Args {
    /// Listen address
    #[arg(long, env = "SENSOR_EMULATOR_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Poll command to answer
    #[arg(long, env = "SENSOR_EMULATOR_COMMAND", default_value = "READ_ALL")]
    command: String,

    /// Always answer with this response line instead of random readings
    #[arg(long)]
    fixed: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mode = match &args.fixed {
        Some(line) => {
            let sample = decode(line.as_bytes());
            if sample.is_empty() {
                bail!("--fixed line carries no readable field: {:?}", line);
            }
            ResponseMode::Fixed(sample)
        }
        None => ResponseMode::Random,
    };

    let emulator = SensorEmulator::bind(args.bind, &args.command, mode)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let (handle, task) = emulator.spawn();
    info!("Answering {:?} on {}", args.command, handle.local_addr());

    tokio::select! {
        _ = task => {
            info!("Emulator exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, served {} replies", handle.served());
        }
    }

    Ok(())
}

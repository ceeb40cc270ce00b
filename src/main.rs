//! SensorLink Daemon
//!
//! Polls a sensor node, keeps rolling histories, tracks link connectivity and
//! logs a routing decision snapshot every decision interval. Serves a
//! read-only status API and optionally appends snapshots to a JSON-lines file.
//!
//! Usage:
//!   sensorlink --config sensorlink.toml --host 192.168.4.1
//!
//! Environment Variables:
//!   SENSORLINK_CONFIG - Path to TOML config file
//!   SENSORLINK_LOG_LEVEL - Log level (default: info)
//!   SENSORLINK_HOST, SENSORLINK_PORT, SENSORLINK_POLL_MS, ... - see config.rs

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensorlink_backend::api::{self, AppState};
use sensorlink_backend::config::SensorLinkConfig;
use sensorlink_backend::telemetry::{AuditLog, IngestionState, PollScheduler};

#[derive(Parser, Debug)]
#[command(name = "sensorlink")]
#[command(about = "Sensor telemetry ingestion with connectivity tracking and routing decisions")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "SENSORLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Sensor node host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Sensor node port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Poll period in milliseconds (overrides config)
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Status API bind address (overrides config)
    #[arg(long)]
    api_bind: Option<SocketAddr>,

    /// Disable the status API
    #[arg(long)]
    no_api: bool,

    /// Append decision snapshots to this JSON-lines file
    #[arg(long, env = "SENSORLINK_AUDIT_PATH")]
    audit_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SENSORLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut SensorLinkConfig) {
        if let Some(host) = &self.host {
            config.endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(ms) = self.poll_ms {
            config.schedule.poll_interval = Duration::from_millis(ms);
        }
        if let Some(bind) = self.api_bind {
            config.api.bind = bind;
        }
        if self.no_api {
            config.api.enabled = false;
        }
        if let Some(path) = &self.audit_path {
            config.audit.path = Some(path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("Starting SensorLink");

    let mut config = SensorLinkConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!("  Sensor node: {}", config.endpoint.address());
    info!(
        "  Poll: {}ms  Decision: {}ms  Timeout: {}ms",
        config.schedule.poll_interval.as_millis(),
        config.schedule.decision_interval.as_millis(),
        config.endpoint.request_timeout.as_millis()
    );
    info!("  History capacity: {}", config.history.capacity);

    let state = Arc::new(IngestionState::from_config(&config));
    let scheduler = PollScheduler::new(&config, state.clone());
    let rules = scheduler.rules();

    let audit_task = config.audit.path.as_ref().map(|path| {
        let audit = AuditLog::new(path.clone());
        let rx = scheduler.subscribe();
        tokio::spawn(async move {
            if let Err(e) = audit.run(rx).await {
                error!("Audit log stopped: {}", e);
            }
        })
    });

    if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(config.api.bind)
            .await
            .with_context(|| format!("failed to bind status API on {}", config.api.bind))?;
        let app = api::router(AppState {
            state: state.clone(),
            rules,
        });
        info!("Status API available at http://{}/status", config.api.bind);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Status API exited: {}", e);
            }
        });
    }

    let handle = scheduler.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");
    handle.stop().await;

    // the audit log sees a closed channel once the scheduler drops its sender
    if let Some(task) = audit_task {
        if let Err(e) = task.await {
            error!("Audit task failed: {}", e);
        }
    }

    let packets = state.packet_counts();
    let cycles = state.cycle_stats();
    info!(
        "Session totals: packets={} cycles={} succeeded={} failed={}",
        packets.total, cycles.attempted, cycles.succeeded, cycles.failed
    );
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sensorlink_backend={}", level, level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_env() {
    if dotenv().is_ok() {
        return;
    }
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        if let Err(e) = dotenv::from_path(&manifest_env) {
            // tracing is not installed yet
            eprintln!("warning: failed to load {}: {}", manifest_env.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "sensorlink",
            "--host",
            "192.168.4.1",
            "--port",
            "8081",
            "--poll-ms",
            "500",
            "--no-api",
        ]);
        let mut config = SensorLinkConfig::default();
        args.apply(&mut config);

        assert_eq!(config.endpoint.address(), "192.168.4.1:8081");
        assert_eq!(config.schedule.poll_interval, Duration::from_millis(500));
        assert!(!config.api.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = Args::parse_from(["sensorlink"]);
        let mut config = SensorLinkConfig::default();
        args.apply(&mut config);
        assert_eq!(config.endpoint.port, 8080);
        assert!(config.api.enabled);
    }
}

//! SensorLink Configuration
//!
//! Layered configuration for the ingestion pipeline:
//! - compiled-in reference defaults
//! - optional TOML file
//! - `SENSORLINK_*` environment overrides
//!
//! Durations are expressed in milliseconds in both TOML and the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the sensor link
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorLinkConfig {
    /// Sensor node endpoint and exchange parameters
    pub endpoint: EndpointConfig,

    /// Poll and decision cadence
    pub schedule: ScheduleConfig,

    /// Rolling history sizing
    pub history: HistoryConfig,

    /// Connectivity hysteresis
    pub connectivity: ConnectivityConfig,

    /// Decision engine thresholds
    pub thresholds: DecisionThresholds,

    /// Read-only HTTP status surface
    pub api: ApiConfig,

    /// Snapshot audit sink
    pub audit: AuditConfig,
}

impl SensorLinkConfig {
    /// Load configuration: defaults, then the TOML file (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `SENSORLINK_*` environment overrides.
    ///
    /// Unparseable or non-positive numeric values are ignored and the current value is kept.
    pub fn apply_env(&mut self) {
        if let Ok(host) = env::var("SENSORLINK_HOST") {
            if !host.trim().is_empty() {
                self.endpoint.host = host.trim().to_string();
            }
        }
        if let Some(port) = env_parse::<u16>("SENSORLINK_PORT").filter(|&p| p > 0) {
            self.endpoint.port = port;
        }
        if let Ok(command) = env::var("SENSORLINK_COMMAND") {
            if !command.trim().is_empty() {
                self.endpoint.command = command.trim().to_string();
            }
        }
        if let Some(ms) = env_millis("SENSORLINK_TIMEOUT_MS") {
            self.endpoint.request_timeout = ms;
        }
        if let Some(ms) = env_millis("SENSORLINK_POLL_MS") {
            self.schedule.poll_interval = ms;
        }
        if let Some(ms) = env_millis("SENSORLINK_DECISION_MS") {
            self.schedule.decision_interval = ms;
        }
        if let Some(capacity) = env_parse::<usize>("SENSORLINK_HISTORY_CAPACITY").filter(|&c| c > 0) {
            self.history.capacity = capacity;
        }
        if let Some(ms) = env_millis("SENSORLINK_CONNECTIVITY_TIMEOUT_MS") {
            self.connectivity.timeout = ms;
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint.host must not be empty".into()));
        }
        if self.endpoint.command.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint.command must not be empty".into()));
        }
        if self.endpoint.read_buffer_bytes == 0 {
            return Err(ConfigError::Invalid("endpoint.read_buffer_bytes must be > 0".into()));
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid("history.capacity must be > 0".into()));
        }

        let durations = [
            ("endpoint.request_timeout", self.endpoint.request_timeout),
            ("schedule.poll_interval", self.schedule.poll_interval),
            ("schedule.decision_interval", self.schedule.decision_interval),
            ("connectivity.timeout", self.connectivity.timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        let thresholds = [
            ("thresholds.spo2_low", self.thresholds.spo2_low),
            ("thresholds.heart_rate_high", self.thresholds.heart_rate_high),
            ("thresholds.temperature_high", self.thresholds.temperature_high),
            ("thresholds.humidity_high", self.thresholds.humidity_high),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be finite", name)));
            }
        }

        if self.connectivity.streaming_window > self.connectivity.timeout {
            return Err(ConfigError::Invalid(
                "connectivity.streaming_window must not exceed connectivity.timeout".into(),
            ));
        }

        Ok(())
    }
}

/// Sensor node endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Hostname or IP of the sensor node
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Poll command (newline is appended on the wire)
    pub command: String,
    /// Bound on the whole connect/send/read exchange
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Maximum bytes read from a single response
    pub read_buffer_bytes: usize,
}

impl EndpointConfig {
    /// `host:port` string used for connecting and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            command: "READ_ALL".into(),
            request_timeout: Duration::from_secs(3),
            read_buffer_bytes: 1024,
        }
    }
}

/// Poll and decision cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Network probe period
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// Decision re-evaluation and snapshot period
    #[serde(with = "duration_serde")]
    pub decision_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            decision_interval: Duration::from_secs(2),
        }
    }
}

/// Rolling history sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum retained values per metric
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 250 }
    }
}

/// Connectivity hysteresis windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Time since last success after which a connected link is declared lost
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Below this age a connected link is reported as streaming
    #[serde(with = "duration_serde")]
    pub streaming_window: Duration,
    /// Below this age a disconnected link is reported as still being checked
    #[serde(with = "duration_serde")]
    pub connecting_window: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            streaming_window: Duration::from_secs(5),
            connecting_window: Duration::from_secs(2),
        }
    }
}

/// Decision thresholds (strict comparisons)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    /// SpO2 below this is hypoxic (%)
    pub spo2_low: f64,
    /// Heart rate above this is tachycardic (BPM)
    pub heart_rate_high: f64,
    /// Temperature above this is febrile (°C)
    pub temperature_high: f64,
    /// Relative humidity above this is out of range (%)
    pub humidity_high: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            spo2_low: 95.0,
            heart_rate_high: 120.0,
            temperature_high: 38.0,
            humidity_high: 85.0,
        }
    }
}

/// HTTP status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// Snapshot audit sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines file receiving one snapshot record per decision interval
    pub path: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            Self::Parse(msg) => write!(f, "invalid config syntax: {}", msg),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}

// Serde helper for Duration (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

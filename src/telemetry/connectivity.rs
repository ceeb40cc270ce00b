//! Connectivity Monitor
//!
//! Three-state link tracker driven by time since the last successful exchange
//! rather than by the outcome of the latest attempt. A single dropped poll over
//! a lossy link therefore never toggles the reported state.
//!
//! ```text
//!                 attempt                 success
//! Disconnected ----------> Connecting ------------> Connected
//!      ^   ^                   |                        |
//!      |   +---- failure ------+                        |
//!      +------------ now - last_success > timeout ------+
//! ```
//! A success from `Disconnected` also reconnects directly.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::ConnectivityConfig;

/// Coarse link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer display bucket; does not feed back into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    /// Connected, data fresher than the streaming window
    Streaming,
    /// Connected, data older than the streaming window but within timeout
    Intermittent,
    /// Connected on paper but past the timeout (until the next tick demotes it)
    NoSignal,
    /// Not connected, last success within the connecting window
    Checking,
    /// Not connected and nothing recent
    Waiting,
}

impl LinkQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Intermittent => "intermittent",
            Self::NoSignal => "no_signal",
            Self::Checking => "checking",
            Self::Waiting => "waiting",
        }
    }
}

/// A state change reported to the caller for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Read-only view for consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConnectivityStatus {
    pub state: ConnectionState,
    pub quality: LinkQuality,
    #[serde(rename = "since_last_success_secs", serialize_with = "serialize_opt_secs")]
    pub since_last_success: Option<Duration>,
    pub transitions: u64,
}

/// Hysteresis state machine over exchange outcomes
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    config: ConnectivityConfig,
    state: ConnectionState,
    last_success: Option<Instant>,
    transitions: u64,
}

impl ConnectivityMonitor {
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            last_success: None,
            transitions: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// A probe attempt is starting
    pub fn on_attempt(&mut self) -> Option<Transition> {
        match self.state {
            ConnectionState::Disconnected => self.transition(ConnectionState::Connecting),
            _ => None,
        }
    }

    /// An exchange produced at least one reading
    pub fn on_success(&mut self, now: Instant) -> Option<Transition> {
        self.last_success = Some(now);
        match self.state {
            ConnectionState::Connected => None,
            _ => self.transition(ConnectionState::Connected),
        }
    }

    /// An exchange failed or yielded nothing usable. Never demotes `Connected`.
    pub fn on_failure(&mut self) -> Option<Transition> {
        match self.state {
            ConnectionState::Connecting => self.transition(ConnectionState::Disconnected),
            _ => None,
        }
    }

    /// Periodic evaluation, independent of the latest attempt's outcome
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        match self.since_last_success(now) {
            Some(elapsed) if elapsed <= self.config.timeout => None,
            _ => self.transition(ConnectionState::Disconnected),
        }
    }

    pub fn since_last_success(&self, now: Instant) -> Option<Duration> {
        self.last_success
            .map(|last| now.saturating_duration_since(last))
    }

    pub fn quality(&self, now: Instant) -> LinkQuality {
        let elapsed = self.since_last_success(now);
        let within = |window: Duration| elapsed.is_some_and(|e| e < window);

        match self.state {
            ConnectionState::Connected => {
                if within(self.config.streaming_window) {
                    LinkQuality::Streaming
                } else if within(self.config.timeout) {
                    LinkQuality::Intermittent
                } else {
                    LinkQuality::NoSignal
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                if within(self.config.connecting_window) {
                    LinkQuality::Checking
                } else {
                    LinkQuality::Waiting
                }
            }
        }
    }

    pub fn status(&self, now: Instant) -> ConnectivityStatus {
        ConnectivityStatus {
            state: self.state,
            quality: self.quality(now),
            since_last_success: self.since_last_success(now),
            transitions: self.transitions,
        }
    }

    fn transition(&mut self, to: ConnectionState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        self.transitions += 1;
        Some(Transition { from, to })
    }
}

fn serialize_opt_secs<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

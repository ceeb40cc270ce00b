//! Network Probe
//!
//! One request/response exchange per cycle over a fresh TCP connection:
//! connect, send the poll command, read once into a bounded buffer, close.
//! The whole exchange is bounded by the configured timeout and is never
//! retried within a cycle.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::connectivity::{ConnectionState, Transition};
use super::state::{CycleReport, IngestionState};
use super::wire::{decode_frame, encode_request};
use crate::config::EndpointConfig;

/// Failure of a single exchange. Recovered locally; the cycle is counted as failed.
#[derive(Debug)]
pub enum ProbeError {
    Connect(io::Error),
    Timeout(Duration),
    Io(io::Error),
}

impl ProbeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {}", e),
            Self::Timeout(d) => write!(f, "exchange timed out after {}ms", d.as_millis()),
            Self::Io(e) => write!(f, "exchange failed: {}", e),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Io(e) => Some(e),
            Self::Timeout(_) => None,
        }
    }
}

/// Raw result of a completed exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    pub raw: Vec<u8>,
    /// Connect to close, inclusive
    pub elapsed: Duration,
}

/// Result of one poll cycle
#[derive(Debug)]
pub enum ProbeOutcome {
    /// At least one reading was recorded
    Recorded(CycleReport),
    /// Exchange completed but carried no usable reading
    Empty,
    Failed(ProbeError),
}

impl ProbeOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

/// Sensor node prober; sole writer of the ingestion state
pub struct SensorProber {
    endpoint: EndpointConfig,
    request: Vec<u8>,
    state: Arc<IngestionState>,
}

impl SensorProber {
    pub fn new(endpoint: EndpointConfig, state: Arc<IngestionState>) -> Self {
        let request = encode_request(&endpoint.command);
        Self {
            endpoint,
            request,
            state,
        }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn state(&self) -> &Arc<IngestionState> {
        &self.state
    }

    /// Perform one bounded exchange without touching the ingestion state
    pub async fn exchange(&self) -> Result<Exchange, ProbeError> {
        let limit = self.endpoint.request_timeout;
        let addr = self.endpoint.address();
        let start = Instant::now();

        let result = timeout(limit, async {
            let mut stream = TcpStream::connect(&addr)
                .await
                .map_err(ProbeError::Connect)?;
            stream.set_nodelay(true).ok();

            stream
                .write_all(&self.request)
                .await
                .map_err(ProbeError::Io)?;

            let mut buf = vec![0u8; self.endpoint.read_buffer_bytes];
            let n = stream.read(&mut buf).await.map_err(ProbeError::Io)?;
            buf.truncate(n);

            // peer may already have closed; the response is in hand either way
            let _ = stream.shutdown().await;
            Ok::<_, ProbeError>(buf)
        })
        .await;

        match result {
            Ok(Ok(raw)) => Ok(Exchange {
                raw,
                elapsed: start.elapsed(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProbeError::Timeout(limit)),
        }
    }

    /// Run one poll cycle and commit its outcome
    pub async fn poll_once(&self) -> ProbeOutcome {
        log_transition(self.state.begin_attempt());

        let outcome = match self.exchange().await {
            Ok(exchange) => self.commit(exchange),
            Err(e) => {
                warn!(
                    "Poll of {} failed ({}): {}",
                    self.endpoint.address(),
                    e.kind(),
                    e
                );
                log_transition(self.state.record_failure(e.is_timeout()));
                ProbeOutcome::Failed(e)
            }
        };

        log_transition(self.state.tick(Instant::now()));
        outcome
    }

    fn commit(&self, exchange: Exchange) -> ProbeOutcome {
        let frame = decode_frame(&exchange.raw);
        for skipped in &frame.skipped {
            debug!("Skipped wire token: {}", skipped);
        }

        let report = self.state.record_exchange(
            Instant::now(),
            &frame.sample,
            exchange.raw.len(),
            exchange.elapsed,
            frame.rejected(),
        );
        log_transition(report.transition);

        match report.measurement {
            Some(m) => {
                debug!(
                    "Recorded {} fields latency={:.2}ms jitter={:?} throughput={:.0}bps",
                    report.fields_recorded, m.latency_ms, m.jitter_ms, m.throughput_bps
                );
                ProbeOutcome::Recorded(report)
            }
            None => {
                debug!(
                    "No usable data from {} ({} bytes)",
                    self.endpoint.address(),
                    exchange.raw.len()
                );
                ProbeOutcome::Empty
            }
        }
    }
}

fn log_transition(transition: Option<Transition>) {
    let Some(Transition { from, to }) = transition else {
        return;
    };
    match to {
        ConnectionState::Connected => info!("Sensor link {} -> {}", from, to),
        ConnectionState::Disconnected if from == ConnectionState::Connected => {
            warn!("Sensor link lost ({} -> {})", from, to)
        }
        _ => debug!("Sensor link {} -> {}", from, to),
    }
}

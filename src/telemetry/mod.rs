//! Sensor Telemetry Ingestion
//!
//! Polls a sensor node over a short-lived TCP exchange, keeps bounded rolling
//! histories of vital-sign readings and link metrics, tracks connectivity with
//! hysteresis and classifies the latest sample into a routing priority.
//!
//! Components:
//! - `wire`: poll command encoding and `KEY:VALUE|...` response decoding
//! - `history`: fixed-capacity FIFO per metric
//! - `state`: the single shared `IngestionState` (one writer, many readers)
//! - `prober`: one exchange per cycle, latency/jitter/throughput derivation
//! - `connectivity`: three-state link monitor plus display bucket
//! - `decision`: priority-ordered rule table
//! - `scheduler`: background poll and decision loop with a stop signal
//! - `audit`: snapshot records and the JSON-lines sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sensorlink_backend::config::SensorLinkConfig;
//! use sensorlink_backend::telemetry::{IngestionState, Metric, PollScheduler};
//!
//! let config = SensorLinkConfig::load(None)?;
//! let state = Arc::new(IngestionState::from_config(&config));
//! let handle = PollScheduler::new(&config, state.clone()).spawn();
//!
//! let recent_latency: Vec<f64> = state.window(Metric::Latency, 20).collect();
//! handle.stop().await;
//! ```

pub mod audit;
pub mod connectivity;
pub mod decision;
pub mod history;
pub mod metrics;
pub mod prober;
pub mod scheduler;
pub mod state;
pub mod wire;

pub use audit::*;
pub use connectivity::*;
pub use decision::*;
pub use history::*;
pub use prober::*;
pub use scheduler::*;
pub use state::*;
pub use wire::*;

//! Poll Scheduler
//!
//! One background task runs two loops side by side: the poll loop drives the
//! prober, the decision loop re-evaluates the decision engine and publishes a
//! snapshot. The decision loop never waits on an exchange, so snapshots keep
//! flowing while the node is unreachable. Cycle failures are logged and the
//! poll loop waits for the next tick. A watch channel carries the stop signal,
//! honored between cycles and while an exchange is in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::audit::SnapshotRecord;
use super::decision::{Classification, RuleTable};
use super::prober::SensorProber;
use super::state::IngestionState;
use crate::config::SensorLinkConfig;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Floor for both periods; `tokio::time::interval` panics on zero
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct PollScheduler {
    prober: SensorProber,
    rules: Arc<RuleTable>,
    poll_interval: Duration,
    decision_interval: Duration,
    snapshot_tx: broadcast::Sender<SnapshotRecord>,
}

impl PollScheduler {
    pub fn new(config: &SensorLinkConfig, state: Arc<IngestionState>) -> Self {
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            prober: SensorProber::new(config.endpoint.clone(), state),
            rules: Arc::new(RuleTable::from_thresholds(&config.thresholds)),
            poll_interval: config.schedule.poll_interval.max(MIN_INTERVAL),
            decision_interval: config.schedule.decision_interval.max(MIN_INTERVAL),
            snapshot_tx,
        }
    }

    pub fn rules(&self) -> Arc<RuleTable> {
        self.rules.clone()
    }

    pub fn state(&self) -> &Arc<IngestionState> {
        self.prober.state()
    }

    /// Receive every snapshot record emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotRecord> {
        self.snapshot_tx.subscribe()
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn decision_interval(&self) -> Duration {
        self.decision_interval
    }

    /// Run until the stop signal flips to `true` or its sender is dropped
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            "Starting poll scheduler for {} (poll={}ms decision={}ms)",
            self.prober.endpoint().address(),
            self.poll_interval.as_millis(),
            self.decision_interval.as_millis()
        );

        tokio::join!(
            self.poll_loop(shutdown.clone()),
            self.decision_loop(shutdown)
        );

        info!("Poll scheduler stopped");
    }

    async fn poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.prober.poll_once() => {}
                        _ = shutdown.changed() => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn decision_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.decision_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.decision_cycle();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate the latest sample and publish a snapshot record
    pub fn decision_cycle(&self) -> SnapshotRecord {
        let state = self.prober.state();
        state.tick(Instant::now());

        let sample = state.latest_sample();
        let decision = self.rules.evaluate(&sample);
        let record = SnapshotRecord {
            timestamp: Utc::now(),
            sample,
            decision,
            connection: state.connection_state(),
        };

        if decision.classification == Classification::InsufficientData {
            info!("Waiting for sensor data (missing: {:?})", sample.missing());
        } else {
            info!(
                "Decision: {} severity={:?} link={}",
                decision.classification, decision.severity, record.connection
            );
        }

        if self.snapshot_tx.send(record.clone()).is_err() {
            debug!("No snapshot subscribers");
        }
        record
    }
}

/// Handle to a spawned scheduler
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal stop and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Poll scheduler task failed: {}", e);
        }
    }
}

//! Shared Ingestion State
//!
//! Histories, packet counters, cycle statistics and the connectivity monitor
//! live behind one lock. The prober is the only writer and commits each poll
//! cycle in a single write section, so a reader observes either the state
//! before a cycle or after it, never a partially applied one.

use parking_lot::RwLock;
use serde::Serialize;
use std::time::{Duration, Instant};

use super::connectivity::{ConnectionState, ConnectivityMonitor, ConnectivityStatus, Transition};
use super::history::{Metric, MetricHistory, SeriesStats};
use super::wire::{Sample, SensorField};
use crate::config::{ConnectivityConfig, SensorLinkConfig};

/// Added to the elapsed seconds so sub-millisecond exchanges stay finite
pub const THROUGHPUT_EPSILON_SECS: f64 = 0.001;

/// Transport-derived network signals for one successful exchange
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkMeasurement {
    pub latency_ms: f64,
    /// Absent on the first successful exchange of a session
    pub jitter_ms: Option<f64>,
    pub throughput_bps: f64,
}

impl NetworkMeasurement {
    pub fn derive(response_bytes: usize, elapsed: Duration, previous_latency_ms: Option<f64>) -> Self {
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        Self {
            latency_ms,
            jitter_ms: previous_latency_ms.map(|prev| (latency_ms - prev).abs()),
            throughput_bps: throughput_bps(response_bytes, latency_ms),
        }
    }
}

/// Response bits over elapsed seconds (plus epsilon)
pub fn throughput_bps(response_bytes: usize, latency_ms: f64) -> f64 {
    let secs = latency_ms.max(0.0) / 1000.0;
    (response_bytes as f64 * 8.0) / (secs + THROUGHPUT_EPSILON_SECS)
}

/// Per-field packet counts, monotonically increasing for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounts {
    pub temperature: u64,
    pub humidity: u64,
    pub heart_rate: u64,
    pub spo2: u64,
    pub total: u64,
}

impl PacketCounts {
    fn increment(&mut self, field: SensorField) {
        match field {
            SensorField::Temperature => self.temperature += 1,
            SensorField::Humidity => self.humidity += 1,
            SensorField::HeartRate => self.heart_rate += 1,
            SensorField::Spo2 => self.spo2 += 1,
        }
        self.total += 1;
    }

    pub fn get(&self, field: SensorField) -> u64 {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::HeartRate => self.heart_rate,
            SensorField::Spo2 => self.spo2,
        }
    }
}

/// Poll cycle outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub attempted: u64,
    /// At least one reading recorded
    pub succeeded: u64,
    /// Exchange completed but nothing decodable
    pub empty: u64,
    /// Connect, I/O or timeout failure
    pub failed: u64,
    /// Subset of `failed`
    pub timeouts: u64,
    /// Malformed tokens skipped by the decoder
    pub rejected_tokens: u64,
}

/// What one committed cycle changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub fields_recorded: usize,
    pub measurement: Option<NetworkMeasurement>,
    pub transition: Option<Transition>,
}

/// Point-in-time view of the whole state, taken under one read lock
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSnapshot {
    pub latest: Sample,
    pub network: Option<NetworkMeasurement>,
    pub packets: PacketCounts,
    pub cycles: CycleStats,
    pub connectivity: ConnectivityStatus,
}

/// Latest value and retained-window statistics of one metric
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSummary {
    pub metric: Metric,
    pub latest: Option<f64>,
    pub stats: Option<SeriesStats>,
}

/// Owned snapshot of the last `n` values of a metric, oldest first.
///
/// Taken at call time; later appends are not observed.
#[derive(Debug, Clone)]
pub struct MetricWindow {
    values: std::vec::IntoIter<f64>,
}

impl Iterator for MetricWindow {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.values.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.values.size_hint()
    }
}

impl DoubleEndedIterator for MetricWindow {
    fn next_back(&mut self) -> Option<f64> {
        self.values.next_back()
    }
}

impl ExactSizeIterator for MetricWindow {}

struct IngestionInner {
    history: MetricHistory,
    packets: PacketCounts,
    cycles: CycleStats,
    previous_latency_ms: Option<f64>,
    last_measurement: Option<NetworkMeasurement>,
    connectivity: ConnectivityMonitor,
}

/// Single-writer, multi-reader ingestion state
pub struct IngestionState {
    inner: RwLock<IngestionInner>,
}

impl IngestionState {
    pub fn new(capacity: usize, connectivity: ConnectivityConfig) -> Self {
        Self {
            inner: RwLock::new(IngestionInner {
                history: MetricHistory::new(capacity),
                packets: PacketCounts::default(),
                cycles: CycleStats::default(),
                previous_latency_ms: None,
                last_measurement: None,
                connectivity: ConnectivityMonitor::new(connectivity),
            }),
        }
    }

    pub fn from_config(config: &SensorLinkConfig) -> Self {
        Self::new(config.history.capacity, config.connectivity.clone())
    }

    // ------------------------------------------------------------------
    // Writer side (prober / scheduler)
    // ------------------------------------------------------------------

    /// A poll attempt is starting
    pub fn begin_attempt(&self) -> Option<Transition> {
        let mut inner = self.inner.write();
        inner.cycles.attempted += 1;
        inner.connectivity.on_attempt()
    }

    /// Commit a completed exchange: histories, counters, network signals and
    /// connectivity in that order, under one write lock.
    pub fn record_exchange(
        &self,
        now: Instant,
        sample: &Sample,
        response_bytes: usize,
        elapsed: Duration,
        rejected_tokens: usize,
    ) -> CycleReport {
        let mut inner = self.inner.write();
        inner.cycles.rejected_tokens += rejected_tokens as u64;

        let mut fields_recorded = 0;
        for (field, value) in sample.present() {
            inner.history.append(Metric::from(field), value);
            inner.packets.increment(field);
            fields_recorded += 1;
        }

        if fields_recorded == 0 {
            inner.cycles.empty += 1;
            let transition = inner.connectivity.on_failure();
            return CycleReport {
                fields_recorded,
                measurement: None,
                transition,
            };
        }

        let measurement =
            NetworkMeasurement::derive(response_bytes, elapsed, inner.previous_latency_ms);
        inner.history.append(Metric::Latency, measurement.latency_ms);
        if let Some(jitter) = measurement.jitter_ms {
            inner.history.append(Metric::Jitter, jitter);
        }
        inner.history.append(Metric::Throughput, measurement.throughput_bps);
        inner.previous_latency_ms = Some(measurement.latency_ms);
        inner.last_measurement = Some(measurement);
        inner.cycles.succeeded += 1;

        let transition = inner.connectivity.on_success(now);

        CycleReport {
            fields_recorded,
            measurement: Some(measurement),
            transition,
        }
    }

    /// Commit a failed exchange
    pub fn record_failure(&self, timed_out: bool) -> Option<Transition> {
        let mut inner = self.inner.write();
        inner.cycles.failed += 1;
        if timed_out {
            inner.cycles.timeouts += 1;
        }
        inner.connectivity.on_failure()
    }

    /// Time-driven connectivity evaluation
    pub fn tick(&self, now: Instant) -> Option<Transition> {
        self.inner.write().connectivity.tick(now)
    }

    // ------------------------------------------------------------------
    // Reader side
    // ------------------------------------------------------------------

    pub fn capacity(&self) -> usize {
        self.inner.read().history.capacity()
    }

    pub fn latest(&self, metric: Metric) -> Option<f64> {
        self.inner.read().history.latest(metric)
    }

    pub fn window(&self, metric: Metric, n: usize) -> MetricWindow {
        let values: Vec<f64> = self.inner.read().history.window(metric, n).collect();
        MetricWindow {
            values: values.into_iter(),
        }
    }

    pub fn stats(&self, metric: Metric) -> Option<SeriesStats> {
        self.inner.read().history.stats(metric)
    }

    /// Most recent value of each sensor history, composed into one sample
    /// Window and whole-series statistics read under the same guard
    pub fn window_with_stats(&self, metric: Metric, n: usize) -> (MetricWindow, Option<SeriesStats>) {
        let inner = self.inner.read();
        let values: Vec<f64> = inner.history.window(metric, n).collect();
        (
            MetricWindow {
                values: values.into_iter(),
            },
            inner.history.stats(metric),
        )
    }

    pub fn latest_sample(&self) -> Sample {
        latest_sample(&self.inner.read().history)
    }

    pub fn last_measurement(&self) -> Option<NetworkMeasurement> {
        self.inner.read().last_measurement
    }

    pub fn packet_counts(&self) -> PacketCounts {
        self.inner.read().packets
    }

    pub fn cycle_stats(&self) -> CycleStats {
        self.inner.read().cycles
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.read().connectivity.state()
    }

    pub fn connection_status(&self, now: Instant) -> ConnectivityStatus {
        self.inner.read().connectivity.status(now)
    }

    pub fn snapshot(&self, now: Instant) -> IngestionSnapshot {
        snapshot_of(&self.inner.read(), now)
    }

    /// Snapshot plus a summary of every metric, all from one cycle boundary
    pub fn snapshot_with_summaries(&self, now: Instant) -> (IngestionSnapshot, Vec<MetricSummary>) {
        let inner = self.inner.read();
        let summaries = Metric::ALL
            .into_iter()
            .map(|metric| MetricSummary {
                metric,
                latest: inner.history.latest(metric),
                stats: inner.history.stats(metric),
            })
            .collect();
        (snapshot_of(&inner, now), summaries)
    }
}

fn snapshot_of(inner: &IngestionInner, now: Instant) -> IngestionSnapshot {
    IngestionSnapshot {
        latest: latest_sample(&inner.history),
        network: inner.last_measurement,
        packets: inner.packets,
        cycles: inner.cycles,
        connectivity: inner.connectivity.status(now),
    }
}

fn latest_sample(history: &MetricHistory) -> Sample {
    Sample {
        temperature: history.latest(Metric::Temperature),
        humidity: history.latest(Metric::Humidity),
        heart_rate: history.latest(Metric::HeartRate),
        spo2: history.latest(Metric::Spo2),
    }
}

impl Default for IngestionState {
    fn default() -> Self {
        Self::from_config(&SensorLinkConfig::default())
    }
}

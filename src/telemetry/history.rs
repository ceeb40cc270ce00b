//! Rolling Metric History
//!
//! One bounded FIFO per metric. Appending past capacity evicts from the head,
//! so the retained window is always the most recent `capacity` values in
//! arrival order.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::wire::SensorField;

/// Default retained values per metric
pub const DEFAULT_HISTORY_CAPACITY: usize = 250;

const METRIC_COUNT: usize = 7;

/// Every series kept by the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    HeartRate,
    Spo2,
    Latency,
    Jitter,
    Throughput,
}

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::HeartRate,
        Metric::Spo2,
        Metric::Latency,
        Metric::Jitter,
        Metric::Throughput,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::HeartRate => "heart_rate",
            Self::Spo2 => "spo2",
            Self::Latency => "latency",
            Self::Jitter => "jitter",
            Self::Throughput => "throughput",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "celsius",
            Self::Humidity | Self::Spo2 => "percent",
            Self::HeartRate => "bpm",
            Self::Latency | Self::Jitter => "ms",
            Self::Throughput => "bps",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl From<SensorField> for Metric {
    fn from(field: SensorField) -> Self {
        match field {
            SensorField::Temperature => Self::Temperature,
            SensorField::Humidity => Self::Humidity,
            SensorField::HeartRate => Self::HeartRate,
            SensorField::Spo2 => Self::Spo2,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-capacity history for all metrics.
///
/// Not synchronized; [`IngestionState`](super::state::IngestionState) owns it behind a lock.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    capacity: usize,
    series: [VecDeque<f64>; METRIC_COUNT],
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            series: std::array::from_fn(|_| VecDeque::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push to the tail, then evict from the head while over capacity
    pub fn append(&mut self, metric: Metric, value: f64) {
        let series = &mut self.series[metric.index()];
        series.push_back(value);
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    pub fn latest(&self, metric: Metric) -> Option<f64> {
        self.series[metric.index()].back().copied()
    }

    pub fn len(&self, metric: Metric) -> usize {
        self.series[metric.index()].len()
    }

    pub fn is_empty(&self, metric: Metric) -> bool {
        self.series[metric.index()].is_empty()
    }

    /// Last `n` values of a metric, oldest first
    pub fn window(
        &self,
        metric: Metric,
        n: usize,
    ) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator + '_ {
        let series = &self.series[metric.index()];
        let skip = series.len().saturating_sub(n);
        series.iter().skip(skip).copied()
    }

    /// Summary statistics over the retained window
    pub fn stats(&self, metric: Metric) -> Option<SeriesStats> {
        SeriesStats::from_values(self.series[metric.index()].iter().copied())
    }
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Descriptive statistics for one retained series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p99: f64,
}

impl SeriesStats {
    pub fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.collect();
        let last = *values.last()?;
        let count = values.len();

        let mean = values.iter().sum::<f64>() / count as f64;
        let stddev = if count < 2 {
            0.0
        } else {
            let variance = values
                .iter()
                .map(|&x| {
                    let diff = x - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        };

        let mut sorted = values;
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));

        Some(Self {
            count,
            last,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            stddev,
            p50: percentile(&sorted, 50.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_never_exceeds_capacity() {
        let capacity = 5;
        let mut history = MetricHistory::new(capacity);

        for n in 1..=23 {
            history.append(Metric::Latency, n as f64);
            assert!(history.len(Metric::Latency) <= capacity);

            // oldest survivor is the (n - capacity + 1)-th value once full
            let oldest = history.window(Metric::Latency, capacity).next().unwrap();
            let expected = if n > capacity { (n - capacity + 1) as f64 } else { 1.0 };
            assert_eq!(oldest, expected);
        }

        assert_eq!(history.latest(Metric::Latency), Some(23.0));
    }

    #[test]
    fn test_metrics_are_independent() {
        let mut history = MetricHistory::new(3);
        history.append(Metric::Temperature, 36.5);
        history.append(Metric::HeartRate, 70.0);
        history.append(Metric::HeartRate, 71.0);

        assert_eq!(history.len(Metric::Temperature), 1);
        assert_eq!(history.len(Metric::HeartRate), 2);
        assert!(history.is_empty(Metric::Jitter));
        assert_eq!(history.latest(Metric::Jitter), None);
    }

    #[test]
    fn test_window_is_oldest_first_and_bounded() {
        let mut history = MetricHistory::new(10);
        for v in [1.0, 2.0, 3.0, 4.0] {
            history.append(Metric::Humidity, v);
        }

        let last_two: Vec<f64> = history.window(Metric::Humidity, 2).collect();
        assert_eq!(last_two, vec![3.0, 4.0]);

        let all: Vec<f64> = history.window(Metric::Humidity, 100).collect();
        assert_eq!(all, vec![1.0, 2.0, 3.0, 4.0]);

        assert_eq!(history.window(Metric::Humidity, 0).count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = MetricHistory::new(0);
        history.append(Metric::Spo2, 97.0);
        history.append(Metric::Spo2, 98.0);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.window(Metric::Spo2, 5).collect::<Vec<_>>(), vec![98.0]);
    }

    #[test]
    fn test_stats() {
        let mut history = MetricHistory::new(10);
        assert!(history.stats(Metric::Latency).is_none());

        for v in [10.0, 20.0, 30.0, 40.0] {
            history.append(Metric::Latency, v);
        }
        let stats = history.stats(Metric::Latency).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.last, 40.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 40.0);
        assert_eq!(stats.mean, 25.0);
        assert_eq!(stats.p50, 20.0);
        assert_eq!(stats.p99, 30.0);
        assert!((stats.stddev - 12.909944).abs() < 1e-5);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::from_name("heart_rate"), Some(Metric::HeartRate));
        assert_eq!(Metric::from_name("bogus"), None);
        assert_eq!(Metric::from(SensorField::Spo2), Metric::Spo2);
    }
}

//! Prometheus text exposition of the ingestion state

use std::fmt::Write;
use std::time::Instant;

use super::connectivity::{ConnectionState, LinkQuality};
use super::history::{Metric, SeriesStats};
use super::state::IngestionState;
use super::wire::SensorField;

impl IngestionState {
    /// Render counters, connectivity and latest values in Prometheus text format
    pub fn to_prometheus(&self, now: Instant) -> String {
        let (snapshot, summaries) = self.snapshot_with_summaries(now);
        let mut output = String::new();

        output.push_str("# HELP sensorlink_packets_total Readings recorded per sensor field\n");
        output.push_str("# TYPE sensorlink_packets_total counter\n");
        for field in SensorField::ALL {
            let _ = writeln!(
                output,
                "sensorlink_packets_total{{field=\"{}\"}} {}",
                field,
                snapshot.packets.get(field)
            );
        }

        output.push_str("\n# HELP sensorlink_poll_cycles_total Poll cycles by outcome\n");
        output.push_str("# TYPE sensorlink_poll_cycles_total counter\n");
        let cycles = snapshot.cycles;
        for (outcome, count) in [
            ("attempted", cycles.attempted),
            ("succeeded", cycles.succeeded),
            ("empty", cycles.empty),
            ("failed", cycles.failed),
            ("timeout", cycles.timeouts),
        ] {
            let _ = writeln!(
                output,
                "sensorlink_poll_cycles_total{{outcome=\"{}\"}} {}",
                outcome, count
            );
        }

        output.push_str("\n# HELP sensorlink_rejected_tokens_total Malformed wire tokens skipped\n");
        output.push_str("# TYPE sensorlink_rejected_tokens_total counter\n");
        let _ = writeln!(output, "sensorlink_rejected_tokens_total {}", cycles.rejected_tokens);

        output.push_str("\n# HELP sensorlink_connection_state Current link state (1 = active)\n");
        output.push_str("# TYPE sensorlink_connection_state gauge\n");
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            let _ = writeln!(
                output,
                "sensorlink_connection_state{{state=\"{}\"}} {}",
                state,
                (snapshot.connectivity.state == state) as u8
            );
        }

        output.push_str("\n# HELP sensorlink_link_quality Display bucket (1 = active)\n");
        output.push_str("# TYPE sensorlink_link_quality gauge\n");
        for quality in [
            LinkQuality::Streaming,
            LinkQuality::Intermittent,
            LinkQuality::NoSignal,
            LinkQuality::Checking,
            LinkQuality::Waiting,
        ] {
            let _ = writeln!(
                output,
                "sensorlink_link_quality{{quality=\"{}\"}} {}",
                quality.as_str(),
                (snapshot.connectivity.quality == quality) as u8
            );
        }

        output.push_str("\n# HELP sensorlink_connection_transitions_total Link state changes\n");
        output.push_str("# TYPE sensorlink_connection_transitions_total counter\n");
        let _ = writeln!(
            output,
            "sensorlink_connection_transitions_total {}",
            snapshot.connectivity.transitions
        );

        if let Some(elapsed) = snapshot.connectivity.since_last_success {
            output.push_str("\n# HELP sensorlink_seconds_since_last_success Age of the last usable exchange\n");
            output.push_str("# TYPE sensorlink_seconds_since_last_success gauge\n");
            let _ = writeln!(
                output,
                "sensorlink_seconds_since_last_success {:.3}",
                elapsed.as_secs_f64()
            );
        }

        output.push_str("\n# HELP sensorlink_latest Most recent value per metric\n");
        output.push_str("# TYPE sensorlink_latest gauge\n");
        for summary in &summaries {
            if let Some(value) = summary.latest {
                let _ = writeln!(
                    output,
                    "sensorlink_latest{{metric=\"{}\",unit=\"{}\"}} {}",
                    summary.metric,
                    summary.metric.unit(),
                    value
                );
            }
        }

        let network: Vec<(Metric, SeriesStats)> = summaries
            .iter()
            .filter(|s| matches!(s.metric, Metric::Latency | Metric::Jitter | Metric::Throughput))
            .filter_map(|s| s.stats.map(|stats| (s.metric, stats)))
            .collect();

        output.push_str("\n# HELP sensorlink_window_mean Mean over the retained window\n");
        output.push_str("# TYPE sensorlink_window_mean gauge\n");
        for (metric, stats) in &network {
            let _ = writeln!(
                output,
                "sensorlink_window_mean{{metric=\"{}\"}} {:.3}",
                metric, stats.mean
            );
        }

        output.push_str("\n# HELP sensorlink_window_p99 99th percentile over the retained window\n");
        output.push_str("# TYPE sensorlink_window_p99 gauge\n");
        for (metric, stats) in &network {
            let _ = writeln!(
                output,
                "sensorlink_window_p99{{metric=\"{}\"}} {:.3}",
                metric, stats.p99
            );
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::wire::Sample;
    use std::time::Duration;

    #[test]
    fn test_empty_state_exposition() {
        let state = IngestionState::default();
        let text = state.to_prometheus(Instant::now());

        assert!(text.contains("sensorlink_packets_total{field=\"temperature\"} 0"));
        assert!(text.contains("sensorlink_connection_state{state=\"disconnected\"} 1"));
        assert!(text.contains("sensorlink_link_quality{quality=\"waiting\"} 1"));
        assert!(!text.contains("sensorlink_latest{"));
        assert!(!text.contains("sensorlink_seconds_since_last_success "));
    }

    #[test]
    fn test_exposition_after_exchange() {
        let state = IngestionState::default();
        let now = Instant::now();
        state.begin_attempt();
        state.record_exchange(now, &Sample::new(36.5, 40.0, 72.0, 98.0), 30, Duration::from_millis(8), 2);

        let text = state.to_prometheus(now);
        assert!(text.contains("sensorlink_packets_total{field=\"spo2\"} 1"));
        assert!(text.contains("sensorlink_poll_cycles_total{outcome=\"succeeded\"} 1"));
        assert!(text.contains("sensorlink_rejected_tokens_total 2"));
        assert!(text.contains("sensorlink_connection_state{state=\"connected\"} 1"));
        assert!(text.contains("sensorlink_latest{metric=\"temperature\",unit=\"celsius\"} 36.5"));
        assert!(text.contains("sensorlink_window_mean{metric=\"latency\"}"));
        assert!(text.contains("# TYPE sensorlink_window_mean gauge\n"));
        assert!(text.contains("# TYPE sensorlink_window_p99 gauge\n"));
        assert!(text.contains("sensorlink_window_p99{metric=\"throughput\"}"));
        assert!(text.contains("sensorlink_connection_transitions_total 2"));
    }

    #[test]
    fn test_every_family_is_declared_once() {
        let state = IngestionState::default();
        let now = Instant::now();
        state.record_exchange(now, &Sample::new(36.5, 40.0, 72.0, 98.0), 30, Duration::from_millis(8), 0);
        state.record_exchange(now, &Sample::new(36.7, 41.0, 75.0, 97.0), 30, Duration::from_millis(9), 0);
        let text = state.to_prometheus(now);

        let mut declared = Vec::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("# TYPE ") {
                let family = rest.split_whitespace().next().unwrap().to_string();
                assert!(!declared.contains(&family), "{} declared twice", family);
                assert!(text.contains(&format!("# HELP {} ", family)));
                declared.push(family);
            }
        }

        for line in text.lines().filter(|l| !l.is_empty() && !l.starts_with('#')) {
            let family = line.split(|c| c == '{' || c == ' ').next().unwrap();
            assert!(
                declared.iter().any(|d| d == family),
                "sample {} has no TYPE line",
                line
            );
        }
    }

    #[test]
    fn test_latest_matches_counters_under_writes() {
        let state = std::sync::Arc::new(IngestionState::default());
        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                let now = Instant::now();
                for i in 1..=500u64 {
                    let v = i as f64;
                    state.record_exchange(now, &Sample::new(v, v, v, v), 16, Duration::from_millis(1), 0);
                }
            })
        };

        for _ in 0..200 {
            let text = state.to_prometheus(Instant::now());
            let packets = text
                .lines()
                .find_map(|l| l.strip_prefix("sensorlink_packets_total{field=\"temperature\"} "))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap();
            let latest = text
                .lines()
                .find_map(|l| l.strip_prefix("sensorlink_latest{metric=\"temperature\",unit=\"celsius\"} "))
                .and_then(|v| v.parse::<f64>().ok());
            match latest {
                Some(value) => assert_eq!(value, packets as f64),
                None => assert_eq!(packets, 0),
            }
        }

        writer.join().unwrap();
    }
}

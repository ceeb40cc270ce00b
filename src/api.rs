//! Read-only HTTP status surface
//!
//! # Endpoints
//!
//! - `GET /health` - liveness
//! - `GET /status` - connectivity, counters, latest sample and current decision
//! - `GET /history/:metric?n=` - last `n` values of a metric, oldest first
//! - `GET /metrics` - Prometheus text exposition

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::telemetry::{
    ConnectivityStatus, CycleStats, Evaluation, IngestionState, Metric, NetworkMeasurement,
    PacketCounts, RuleTable, Sample, SeriesStats,
};

/// Shared state for the status API
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<IngestionState>,
    pub rules: Arc<RuleTable>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub connectivity: ConnectivityStatus,
    pub packets: PacketCounts,
    pub cycles: CycleStats,
    pub latest: Sample,
    pub network: Option<NetworkMeasurement>,
    pub decision: Evaluation,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub metric: Metric,
    pub unit: &'static str,
    pub values: Vec<f64>,
    pub stats: Option<SeriesStats>,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(get_status))
        .route("/history/:metric", get(get_history))
        .route("/metrics", get(get_metrics))
        .with_state(app_state)
}

async fn get_status(State(app): State<AppState>) -> Json<StatusReport> {
    let snapshot = app.state.snapshot(Instant::now());
    let decision = app.rules.evaluate(&snapshot.latest);
    Json(StatusReport {
        connectivity: snapshot.connectivity,
        packets: snapshot.packets,
        cycles: snapshot.cycles,
        latest: snapshot.latest,
        network: snapshot.network,
        decision,
    })
}

async fn get_history(
    State(app): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(metric) = Metric::from_name(&metric) else {
        let body = serde_json::json!({ "error": format!("unknown metric: {}", metric) });
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    let n = query.n.unwrap_or_else(|| app.state.capacity());
    let (window, stats) = app.state.window_with_stats(metric, n);
    Json(HistoryResponse {
        metric,
        unit: metric.unit(),
        values: window.collect(),
        stats,
    })
    .into_response()
}

async fn get_metrics(State(app): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.state.to_prometheus(Instant::now()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with_samples(samples: &[Sample]) -> Router {
        let state = Arc::new(IngestionState::default());
        let now = Instant::now();
        for sample in samples {
            state.record_exchange(now, sample, 32, Duration::from_millis(10), 0);
        }
        router(AppState {
            state,
            rules: Arc::new(RuleTable::default()),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app_with_samples(&[])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_status_reports_decision() {
        let app = app_with_samples(&[Sample::new(39.0, 50.0, 80.0, 98.0)]);
        let (status, json) = get_json(app, "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["decision"]["classification"], "alert_routing");
        assert_eq!(json["decision"]["field_states"]["temperature"], "high");
        assert_eq!(json["packets"]["total"], 4);
        assert_eq!(json["connectivity"]["state"], "connected");
        assert_eq!(json["latest"]["temperature"], 39.0);
    }

    #[tokio::test]
    async fn test_status_without_data() {
        let (_, json) = get_json(app_with_samples(&[]), "/status").await;
        assert_eq!(json["decision"]["classification"], "insufficient_data");
        assert_eq!(json["connectivity"]["state"], "disconnected");
        assert!(json["network"].is_null());
    }

    #[tokio::test]
    async fn test_history_window() {
        let app = app_with_samples(&[
            Sample::new(36.1, 50.0, 70.0, 98.0),
            Sample::new(36.2, 50.0, 70.0, 98.0),
            Sample::new(36.3, 50.0, 70.0, 98.0),
        ]);

        let (status, json) = get_json(app.clone(), "/history/temperature?n=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metric"], "temperature");
        assert_eq!(json["values"], serde_json::json!([36.2, 36.3]));
        assert_eq!(json["stats"]["count"], 3);

        let (_, json) = get_json(app, "/history/jitter").await;
        assert_eq!(json["values"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_unknown_metric() {
        let (status, json) = get_json(app_with_samples(&[]), "/history/pressure").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("pressure"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = app_with_samples(&[Sample::new(36.5, 50.0, 70.0, 98.0)])
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("sensorlink_packets_total{field=\"heart_rate\"} 1"));
    }
}

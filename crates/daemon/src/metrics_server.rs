//! Metrics HTTP server
//!
//! Exposes the latest snapshot at `GET /metrics` for dashboards and
//! monitoring tools.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::{MetricsSnapshot, SharedMetrics};

/// Errors that can occur when running the metrics server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /metrics endpoint
async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<MetricsSnapshot> {
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with metrics endpoint
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

/// Parse a `host:port` bind address.
pub fn parse_bind_addr(bind: &str) -> Result<SocketAddr, ServerError> {
    bind.parse().map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress {
        addr: bind.to_string(),
        reason: e.to_string(),
    })
}

/// Serve metrics on `bind` until `shutdown` fires.
pub async fn run_metrics_server(
    metrics: SharedMetrics,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = parse_bind_addr(bind)?;
    let app = create_metrics_router(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::metrics::{new_shared_metrics, JobMetrics, SystemMetrics};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn fetch(metrics: SharedMetrics) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = create_metrics_router(metrics)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, body.to_vec())
    }

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let metrics = new_shared_metrics();
        {
            let mut snapshot = metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.workers = 2;
            snapshot.busy_workers = 1;
            snapshot.queue_len = 5;
            snapshot.running_jobs = 1;
            snapshot.completed_jobs = 42;
            snapshot.failed_jobs = 2;
            snapshot.analyses = 50;
            snapshot.system = SystemMetrics {
                cpu_usage_percent: 85.2,
                mem_usage_percent: 42.1,
                load_avg_1: 3.5,
                load_avg_5: 2.8,
                load_avg_15: 2.2,
            };
            snapshot.jobs.push(JobMetrics {
                id: "job-001".to_string(),
                video_analysis_id: "analysis-001".to_string(),
                input_path: "/media/video.mkv".to_string(),
                output_path: "/media/optimized/video_optimized.mkv".to_string(),
                status: JobStatus::Running,
                progress: 45.0,
                attempts: 1,
                started_at: Some(1701388700000),
            });
        }

        let (status, content_type, body) = fetch(metrics).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().contains("application/json"));

        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.timestamp_unix_ms, 1701388800000);
        assert_eq!(snapshot.queue_len, 5);
        assert_eq!(snapshot.completed_jobs, 42);
        assert_eq!(snapshot.analyses, 50);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].id, "job-001");
        assert_eq!(snapshot.jobs[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_get_metrics_empty_snapshot() {
        let (status, _, body) = fetch(new_shared_metrics()).await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["timestamp_unix_ms"], 0);
        assert_eq!(json["jobs"].as_array().map(|a| a.len()), Some(0));
        for field in ["queue_len", "running_jobs", "workers", "busy_workers", "analyses"] {
            assert_eq!(json[field], 0, "field {}", field);
        }
        assert!(json["system"]["load_avg_15"].is_number());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = create_metrics_router(new_shared_metrics())
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_parse_bind_addr() {
        assert_eq!(
            parse_bind_addr("127.0.0.1:7879").unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 7879))
        );
        assert!(matches!(
            parse_bind_addr("localhost"),
            Err(ServerError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_metrics_server(
            new_shared_metrics(),
            "127.0.0.1:0",
            shutdown.clone(),
        ));
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

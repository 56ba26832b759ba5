//! Drowsiness Monitor Host
//!
//! Wires the camera, detector, frame pipeline and alarm tone together and
//! serves a read-only status API for display clients.

use alerting::ToneNotifier;
use axum::Router;
use frame_pipeline::{CycleReport, PipelineCounters};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod monitor;
mod routes;

pub use crate::config::{AppConfig, DetectorConfig, LogConfig, ServerConfig};

/// Application state shared across handlers
pub struct AppState {
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
    /// Latest successful detection cycle
    pub reports: watch::Receiver<CycleReport>,
    /// Frame accounting of the running pipeline
    pub pipeline: Arc<PipelineCounters>,
    pub alarm: Arc<ToneNotifier>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        reports: watch::Receiver<CycleReport>,
        pipeline: Arc<PipelineCounters>,
        alarm: Arc<ToneNotifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            reports,
            pipeline,
            alarm,
            metrics,
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", axum::routing::get(routes::health::get_health))
        .route("/api/v1/status", axum::routing::get(routes::status::get_status))
        .route("/api/v1/counters", axum::routing::get(routes::status::get_counters))
        .route("/metrics", axum::routing::get(routes::metrics::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))?;

    info!("Logging initialized at level {}", config.level);
    Ok(())
}

/// Serve the status API until `shutdown` flips to true
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("Status API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::ToneConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use dms::DrowsinessCounters;
    use frame_pipeline::PipelineSnapshot;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Fixture {
        state: Arc<AppState>,
        reports: watch::Sender<CycleReport>,
    }

    fn fixture() -> Fixture {
        let (reports, rx) = watch::channel(CycleReport::default());
        let (alarm, _playback) = ToneNotifier::spawn(ToneConfig::default());
        let state = AppState::new(rx, Arc::new(PipelineCounters::default()), Arc::new(alarm), None);
        Fixture {
            state: Arc::new(state),
            reports,
        }
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();
        let (status, body) = get(f.state, "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["cycles"], 0);
    }

    #[tokio::test]
    async fn test_status_returns_latest_report() {
        let f = fixture();
        f.reports.send_replace(CycleReport {
            cycle: 7,
            sequence: 42,
            image_width: 480,
            image_height: 640,
            counters: DrowsinessCounters {
                eyes_closed_frame_count: 2,
                eyes_closed_count: 1,
                alarm_count: 0,
            },
            ..CycleReport::default()
        });

        let (status, body) = get(f.state, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycle"], 7);
        assert_eq!(body["sequence"], 42);
        assert_eq!(body["image_width"], 480);
        assert_eq!(body["counters"]["eyes_closed_count"], 1);
    }

    #[tokio::test]
    async fn test_counters() {
        let f = fixture();
        f.reports.send_replace(CycleReport {
            counters: DrowsinessCounters {
                eyes_closed_frame_count: 3,
                eyes_closed_count: 9,
                alarm_count: 2,
            },
            ..CycleReport::default()
        });

        let (status, body) = get(f.state, "/api/v1/counters").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["drowsiness"]["alarm_count"], 2);
        assert_eq!(body["eye_state"], "AccumulatingClosed");
        assert_eq!(body["alarm"]["playing"], false);
        assert_eq!(body["alarm"]["triggered"], 0);

        let pipeline: PipelineSnapshot = serde_json::from_value(body["pipeline"].clone()).unwrap();
        assert_eq!(pipeline, PipelineSnapshot::default());
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let f = fixture();
        let (status, _) = get(f.state, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let f = fixture();
        let (status, _) = get(f.state, "/api/v1/sensors/live").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

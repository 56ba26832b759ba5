//! Monitor lifecycle: start every component, run until Ctrl-C, tear down in order

use alerting::ToneNotifier;
use anyhow::Context;
use camera_capture::{BufferPool, SyntheticCamera};
use dms::SimulatedFaceDetector;
use frame_pipeline::{CycleReport, FramePipeline};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{serve, AppConfig, AppState};

/// Upper bound on waiting for an in-flight detection at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the monitor until Ctrl-C
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = if config.server.metrics {
        Some(install_metrics()?)
    } else {
        None
    };

    let pool = Arc::new(BufferPool::new(
        config.camera.buffer_count,
        config.camera.frame_size(),
    ));
    let mut camera = SyntheticCamera::new(config.camera.clone(), Arc::clone(&pool))?;
    let detector = Arc::new(SimulatedFaceDetector::new(
        config.detector.options.clone(),
        config.detector.simulation.clone(),
    )?);
    let (alarm, playback) = ToneNotifier::spawn(config.alert.clone());
    let alarm = Arc::new(alarm);

    let (pipeline, reports) = FramePipeline::start(
        config.pipeline.clone(),
        config.dms.clone(),
        Arc::clone(&detector),
        Arc::clone(&pool),
        alarm.clone(),
    )?;
    let pipeline = Arc::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let capture = {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { camera.run(|frame| pipeline.submit(frame), shutdown).await })
    };

    let reporter = tokio::spawn(log_reports(reports.clone()));

    let server = if config.server.enabled {
        let state = Arc::new(AppState::new(
            reports,
            pipeline.counters_handle(),
            Arc::clone(&alarm),
            metrics,
        ));
        let addr = config.server.bind_addr.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move { serve(&addr, state, shutdown).await }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    let capture_stats = capture.await.context("Camera task panicked")?;

    pipeline.stop();
    if !pipeline.wait_idle(DRAIN_TIMEOUT).await {
        warn!("Detection still in flight after {:?}", DRAIN_TIMEOUT);
    }
    let snapshot = pipeline.counters();

    let counters = match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => Some(pipeline.join().await?),
        Err(_) => {
            warn!("Pipeline still shared at shutdown, skipping join");
            None
        }
    };

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!("Status API failed: {e:#}"),
            Err(e) => error!("Status API task panicked: {e}"),
            Ok(Ok(())) => {}
        }
    }
    let _ = reporter.await;

    pool.close();
    drop(alarm);
    if tokio::time::timeout(DRAIN_TIMEOUT, playback).await.is_err() {
        warn!("Tone playback task did not exit");
    }

    info!(
        "Camera: delivered={}, skipped={}",
        capture_stats.delivered, capture_stats.skipped
    );
    info!(
        "Pipeline: submitted={}, accepted={}, dropped={}, completed={}, failed={}, release_failures={}",
        snapshot.submitted,
        snapshot.accepted,
        snapshot.dropped,
        snapshot.completed,
        snapshot.failed,
        snapshot.release_failures
    );
    if let Some(counters) = counters {
        info!(
            "Drowsiness: closures={}, alarms={}",
            counters.eyes_closed_count, counters.alarm_count
        );
    }
    info!("Detector calls: {}", detector.calls());
    Ok(())
}

fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Log each cycle at debug and every alarm at warn until the pipeline is joined
async fn log_reports(mut reports: watch::Receiver<CycleReport>) {
    while reports.changed().await.is_ok() {
        let report = reports.borrow_and_update().clone();
        if report.alarms_raised > 0 {
            warn!(
                cycle = report.cycle,
                alarm_count = report.counters.alarm_count,
                "Drowsiness alarm raised"
            );
        } else {
            debug!(
                cycle = report.cycle,
                faces = report.faces.len(),
                fps = report.latency.frames_per_second,
                frame_latency_ms = report.latency.frame_latency_ms,
                "Detection cycle"
            );
        }
    }
}

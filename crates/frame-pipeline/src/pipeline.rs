//! Frame Pipeline Implementation

use alerting::AlertNotifier;
use camera_capture::{Frame, FrameMetadata, FrameRelease};
use chrono::Utc;
use dms::{
    DmsConfig, DmsError, DrowsinessCounters, DrowsinessStateMachine, FaceDetector, FaceObservation,
};
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::ScopedTaskRunner;
use crate::report::CycleReport;
use crate::stats::{CycleTiming, LatencyTracker, PipelineCounters, PipelineSnapshot};
use crate::{PipelineConfig, PipelineError};

/// Occupied in-flight slot. Dropping it frees the slot.
struct InFlightTicket(Arc<AtomicBool>);

impl InFlightTicket {
    fn acquire(slot: &Arc<AtomicBool>) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(slot)))
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State only ever touched from the completion worker
struct CompletionContext {
    machine: DrowsinessStateMachine<Arc<dyn AlertNotifier>>,
    latency: LatencyTracker,
    reports: watch::Sender<CycleReport>,
    counters: Arc<PipelineCounters>,
    cycles: u64,
}

impl CompletionContext {
    fn complete(
        &mut self,
        metadata: FrameMetadata,
        timing: CycleTiming,
        result: Result<Vec<FaceObservation>, DmsError>,
    ) {
        let latency = self.latency.record(&timing);
        histogram!("pipeline_frame_latency_ms").record(latency.frame_latency_ms as f64);
        histogram!("pipeline_detector_latency_ms").record(latency.detector_latency_ms as f64);
        gauge!("pipeline_frames_per_second").set(latency.frames_per_second as f64);

        let faces = match result {
            Ok(faces) => faces,
            Err(e) => {
                PipelineCounters::bump(&self.counters.failed);
                counter!("pipeline_detection_failures_total").increment(1);
                error!(sequence = metadata.sequence, error = %e, "Face detection failed");
                return;
            }
        };

        let alarms_raised = self.machine.update(&faces, latency.frames_per_second);
        if alarms_raised > 0 {
            counter!("dms_alarms_total").increment(alarms_raised as u64);
        }
        PipelineCounters::bump(&self.counters.completed);
        self.cycles += 1;

        let counters = self.machine.counters();
        debug!(
            sequence = metadata.sequence,
            faces = faces.len(),
            fps = latency.frames_per_second,
            frame_latency_ms = latency.frame_latency_ms,
            eyes_closed_count = counters.eyes_closed_count,
            "Detection cycle complete"
        );

        let (image_width, image_height) = metadata.upright_dimensions();
        self.reports.send_replace(CycleReport {
            cycle: self.cycles,
            sequence: metadata.sequence,
            completed_at: Some(Utc::now()),
            image_width,
            image_height,
            faces,
            latency,
            counters,
            alarms_raised,
        });
    }
}

/// Feeds frames to the detector, one detection at a time.
///
/// Frames submitted while a detection is running are released straight
/// back to the source. Every frame is released exactly once. Completed
/// detections are applied to the drowsiness state machine on a single
/// worker, and nothing is applied once the pipeline is stopped. Dropping
/// the pipeline stops it.
pub struct FramePipeline<D: FaceDetector, S> {
    detector: Arc<D>,
    source: Arc<S>,
    notifier: Arc<dyn AlertNotifier>,
    runtime: Handle,
    runner: ScopedTaskRunner<CompletionContext>,
    worker: Option<JoinHandle<CompletionContext>>,
    in_flight: Arc<AtomicBool>,
    stopped: AtomicBool,
    counters: Arc<PipelineCounters>,
}

impl<D, S> FramePipeline<D, S>
where
    D: FaceDetector + 'static,
    S: FrameRelease + 'static,
{
    /// Start the pipeline on the current tokio runtime.
    ///
    /// Returns the pipeline and a receiver holding the latest [`CycleReport`].
    pub fn start(
        config: PipelineConfig,
        dms_config: DmsConfig,
        detector: Arc<D>,
        source: Arc<S>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Result<(Self, watch::Receiver<CycleReport>), PipelineError> {
        config.validate()?;
        dms_config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        info!("Starting frame pipeline with config: {:?}", config);

        let counters = Arc::new(PipelineCounters::default());
        let (reports, report_rx) = watch::channel(CycleReport::default());
        let context = CompletionContext {
            machine: DrowsinessStateMachine::new(dms_config, Arc::clone(&notifier)),
            latency: LatencyTracker::new(Duration::from_millis(config.fps_window_ms)),
            reports,
            counters: Arc::clone(&counters),
            cycles: 0,
        };
        let (runner, worker) = ScopedTaskRunner::spawn_on(&runtime, context);

        let pipeline = Self {
            detector,
            source,
            notifier,
            runtime,
            runner,
            worker: Some(worker),
            in_flight: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            counters,
        };
        Ok((pipeline, report_rx))
    }

    /// Hand a frame to the pipeline. Never blocks.
    ///
    /// Starts a detection if none is running; otherwise the frame is
    /// released immediately. Callable from any thread.
    pub fn submit(&self, frame: Frame) {
        PipelineCounters::bump(&self.counters.submitted);
        counter!("pipeline_frames_submitted_total").increment(1);

        if self.stopped.load(Ordering::Acquire) {
            self.drop_frame(frame, "pipeline stopped");
            return;
        }
        let Some(ticket) = InFlightTicket::acquire(&self.in_flight) else {
            self.drop_frame(frame, "detection in flight");
            return;
        };
        PipelineCounters::bump(&self.counters.accepted);

        let submitted_at = Instant::now();
        let detector = Arc::clone(&self.detector);
        let source = Arc::clone(&self.source);
        let runner = self.runner.clone();
        let counters = Arc::clone(&self.counters);

        self.runtime.spawn(async move {
            let dispatched_at = Instant::now();
            let result = detector.detect(&frame).await;
            let timing = CycleTiming {
                submitted_at,
                dispatched_at,
                completed_at: Instant::now(),
            };

            let metadata = *frame.metadata();
            release_frame(source.as_ref(), frame, &counters);

            let dispatched = runner.submit(move |context: &mut CompletionContext| {
                context.complete(metadata, timing, result)
            });
            if !dispatched {
                debug!(sequence = metadata.sequence, "Pipeline stopped, completion discarded");
            }

            // Freed last so the next completion queues behind this one
            drop(ticket);
        });
    }

    /// Stop the pipeline. Idempotent.
    ///
    /// A running detection is not cancelled; its frame is still released
    /// when it finishes, but its result is discarded.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping frame pipeline");
        self.runner.shutdown();
        self.detector.close();
        self.notifier.stop();
    }

    /// Stop and wait for the completion worker. Returns the final counters.
    pub async fn join(mut self) -> Result<DrowsinessCounters, PipelineError> {
        self.stop();
        let Some(worker) = self.worker.take() else {
            return Err(PipelineError::Worker("completion worker already joined".into()));
        };
        let context = worker
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

        let counters = context.machine.counters();
        info!(
            alarm_count = counters.alarm_count,
            cycles = context.cycles,
            "Frame pipeline stopped"
        );
        Ok(counters)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True when no detection is in flight
    pub fn is_idle(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no detection is in flight. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while !self.is_idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn counters(&self) -> PipelineSnapshot {
        self.counters.snapshot()
    }

    /// Shared handle to the live counters
    pub fn counters_handle(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    fn drop_frame(&self, frame: Frame, reason: &'static str) {
        PipelineCounters::bump(&self.counters.dropped);
        counter!("pipeline_frames_dropped_total").increment(1);
        debug!(sequence = frame.sequence(), reason, "Dropping frame");
        release_frame(self.source.as_ref(), frame, &self.counters);
    }
}

impl<D: FaceDetector, S> Drop for FramePipeline<D, S> {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.runner.shutdown();
            self.detector.close();
            self.notifier.stop();
        }
    }
}

/// A failed release is logged; the caller's other obligations still run
fn release_frame<S: FrameRelease + ?Sized>(source: &S, frame: Frame, counters: &PipelineCounters) {
    let sequence = frame.sequence();
    if let Err(e) = source.release(frame) {
        PipelineCounters::bump(&counters.release_failures);
        counter!("pipeline_release_failures_total").increment(1);
        warn!(sequence, error = %e, "Failed to release frame buffer");
    }
}

//! Driver Monitoring System (DMS)
//!
//! Drowsiness detection from per-frame eye-openness probabilities:
//! - Face observation model and the external detector contract
//! - Simulated detector for running without a model
//! - Debounced closed-eyes / alarm state machine

pub mod config;
pub mod detector;
pub mod state;

pub use config::DmsConfig;
pub use detector::{
    BoundingBox, Contour, ContourKind, DetectorOptions, FaceDetector, FaceObservation, Landmark,
    LandmarkKind, PerformanceMode, PointF, SimulatedFaceDetector, SimulationConfig,
};
pub use state::{DrowsinessCounters, EyeState};

use alerting::AlertNotifier;
use thiserror::Error;
use tracing::{debug, info};

/// DMS error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmsError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Detector has been closed")]
    DetectorClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Debounces noisy eye-openness probabilities into confirmed closures and alarms.
///
/// Counters are shared by every face observed in a cycle; faces are applied
/// in observation order. Inputs are not validated: any probability compares
/// against the threshold as-is.
pub struct DrowsinessStateMachine<N> {
    config: DmsConfig,
    counters: DrowsinessCounters,
    notifier: N,
}

impl<N: AlertNotifier> DrowsinessStateMachine<N> {
    pub fn new(config: DmsConfig, notifier: N) -> Self {
        info!("Creating drowsiness state machine with config: {:?}", config);
        Self {
            config,
            counters: DrowsinessCounters::default(),
            notifier,
        }
    }

    /// Apply one completed detection cycle. Returns the number of alarms raised.
    ///
    /// The required frame count is only compared when a closed frame is
    /// counted. A cycle without a classified face leaves the counters alone,
    /// even if the rate dropped below what the pending count was built under;
    /// the next closed frame then confirms the closure.
    pub fn update(&mut self, faces: &[FaceObservation], frames_per_second: u32) -> u32 {
        let required = self.config.required_closed_frames(frames_per_second);
        let threshold = self.config.eyes_closed_threshold;
        let mut alarms = 0;

        for face in faces {
            let Some((left, right)) = face.eye_open_probabilities() else {
                continue;
            };

            if left < threshold && right < threshold {
                self.counters.eyes_closed_frame_count += 1;
                if self.counters.eyes_closed_frame_count >= required {
                    self.counters.eyes_closed_frame_count = 0;
                    if self.confirm_closure() {
                        alarms += 1;
                    }
                }
            } else {
                self.counters.eyes_closed_frame_count = 0;
            }
        }

        alarms
    }

    /// Returns true when the closure raised an alarm
    fn confirm_closure(&mut self) -> bool {
        self.counters.eyes_closed_count += 1;
        debug!(
            eyes_closed_count = self.counters.eyes_closed_count,
            "Eye closure confirmed"
        );

        if self.counters.eyes_closed_count >= self.config.alarm_count_threshold {
            self.counters.alarm_count += 1;
            self.counters.eyes_closed_count = 0;
            info!(alarm_count = self.counters.alarm_count, "Drowsiness alarm raised");
            self.notifier.trigger();
            return true;
        }
        false
    }

    /// Frames of closed eyes needed for one closure at the given rate
    pub fn required_closed_frames(&self, frames_per_second: u32) -> u32 {
        self.config.required_closed_frames(frames_per_second)
    }

    pub fn counters(&self) -> DrowsinessCounters {
        self.counters
    }

    pub fn eye_state(&self) -> EyeState {
        self.counters.eye_state()
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        triggers: AtomicU32,
    }

    impl AlertNotifier for RecordingNotifier {
        fn trigger(&self) {
            self.triggers.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {}
    }

    fn face(left: Option<f32>, right: Option<f32>) -> FaceObservation {
        FaceObservation {
            left_eye_open_probability: left,
            right_eye_open_probability: right,
            ..Default::default()
        }
    }

    fn closed() -> FaceObservation {
        face(Some(0.2), Some(0.3))
    }

    fn machine() -> DrowsinessStateMachine<RecordingNotifier> {
        DrowsinessStateMachine::new(DmsConfig::default(), RecordingNotifier::default())
    }

    #[test]
    fn test_ten_closed_frames_confirm_one_closure() {
        let mut machine = machine();
        for _ in 0..10 {
            machine.update(&[closed()], 20);
        }

        let counters = machine.counters();
        assert_eq!(counters.eyes_closed_count, 1);
        assert_eq!(counters.eyes_closed_frame_count, 0);
        assert_eq!(machine.eye_state(), EyeState::EyesOpen);
    }

    #[test]
    fn test_open_eye_resets_accumulation() {
        let mut machine = machine();
        for _ in 0..9 {
            machine.update(&[closed()], 20);
        }
        assert_eq!(machine.eye_state(), EyeState::AccumulatingClosed);

        machine.update(&[face(Some(0.2), Some(0.9))], 20);

        let counters = machine.counters();
        assert_eq!(counters.eyes_closed_frame_count, 0);
        assert_eq!(counters.eyes_closed_count, 0);
    }

    #[test]
    fn test_hundred_closed_frames_raise_one_alarm() {
        let mut machine = machine();
        let mut raised = 0;
        for cycle in 1..=100 {
            raised += machine.update(&[closed()], 20);
            if cycle < 100 && cycle % 10 == 0 {
                assert_eq!(machine.counters().eyes_closed_count, cycle / 10);
            }
        }

        assert_eq!(raised, 1);
        assert_eq!(
            machine.counters(),
            DrowsinessCounters {
                eyes_closed_frame_count: 0,
                eyes_closed_count: 0,
                alarm_count: 1,
            }
        );
        assert_eq!(machine.notifier().triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_probability_is_ignored() {
        let mut machine = machine();
        for _ in 0..50 {
            machine.update(&[face(Some(0.1), None)], 20);
        }
        assert_eq!(machine.counters(), DrowsinessCounters::default());
    }

    #[test]
    fn test_missing_probability_does_not_reset() {
        let mut machine = machine();
        machine.update(&[closed()], 20);
        machine.update(&[face(None, Some(0.9))], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 1);
    }

    #[test]
    fn test_zero_fps_confirms_every_closed_frame() {
        let mut machine = machine();
        machine.update(&[closed()], 0);
        assert_eq!(machine.counters().eyes_closed_count, 1);
    }

    #[test]
    fn test_faces_share_counters_in_order() {
        let mut machine = machine();

        machine.update(&[closed(), closed()], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 2);

        // The open face comes last and wins
        machine.update(&[closed(), face(Some(0.8), Some(0.8))], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 0);

        machine.update(&[face(Some(0.8), Some(0.8)), closed()], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 1);
    }

    #[test]
    fn test_out_of_range_probabilities_accepted() {
        let mut machine = machine();
        machine.update(&[face(Some(-0.5), Some(-3.0))], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 1);

        machine.update(&[face(Some(1.7), Some(0.1))], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut machine = machine();
        machine.update(&[face(Some(0.5), Some(0.1))], 20);
        assert_eq!(machine.counters().eyes_closed_frame_count, 0);
    }

    #[test]
    fn test_rate_drop_confirms_on_next_closed_frame() {
        let mut machine = machine();
        machine.update(&[closed()], 20);
        machine.update(&[closed()], 20);

        // Nothing classified: the pending count survives the lower rate
        machine.update(&[], 0);
        machine.update(&[face(None, Some(0.1))], 0);
        assert_eq!(machine.counters().eyes_closed_frame_count, 2);
        assert_eq!(machine.counters().eyes_closed_count, 0);

        machine.update(&[closed()], 0);
        let counters = machine.counters();
        assert_eq!(counters.eyes_closed_frame_count, 0);
        assert_eq!(counters.eyes_closed_count, 1);
    }

    fn probability() -> impl Strategy<Value = Option<f32>> {
        prop::option::weighted(0.9, 0.0f32..1.0)
    }

    proptest! {
        #[test]
        fn prop_counters_stay_below_thresholds(
            cycles in prop::collection::vec(
                (prop::collection::vec((probability(), probability()), 0..3), 0u32..60),
                0..400,
            )
        ) {
            let mut machine = machine();
            let mut raised = 0;
            // Required count of the last cycle that classified a face
            let mut bound = 1;

            for (faces, fps) in cycles {
                let faces: Vec<_> = faces.into_iter().map(|(l, r)| face(l, r)).collect();
                raised += machine.update(&faces, fps);
                if faces.iter().any(|f| f.eye_open_probabilities().is_some()) {
                    bound = machine.required_closed_frames(fps);
                }

                let counters = machine.counters();
                prop_assert!(counters.eyes_closed_frame_count < bound);
                prop_assert!(counters.eyes_closed_count < machine.config().alarm_count_threshold);
            }

            let triggers = machine.notifier().triggers.load(Ordering::SeqCst);
            prop_assert_eq!(triggers, machine.counters().alarm_count);
            prop_assert_eq!(raised, machine.counters().alarm_count);
        }
    }
}

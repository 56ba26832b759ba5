//! Latency, FPS and frame accounting

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Latency and rate of the most recent completed detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Submission to completion (milliseconds)
    pub frame_latency_ms: u64,
    /// Detector dispatch to completion (milliseconds)
    pub detector_latency_ms: u64,
    /// Completed detections in the trailing window, per second
    pub frames_per_second: u32,
}

/// Timestamps of one detection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    pub submitted_at: Instant,
    pub dispatched_at: Instant,
    pub completed_at: Instant,
}

impl CycleTiming {
    pub fn frame_latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.submitted_at)
    }

    pub fn detector_latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.dispatched_at)
    }
}

/// Rolling latency and FPS over completed detections
#[derive(Debug)]
pub struct LatencyTracker {
    window: Duration,
    completions: VecDeque<Instant>,
    latest: LatencyStats,
}

impl LatencyTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            completions: VecDeque::new(),
            latest: LatencyStats::default(),
        }
    }

    /// Account for one completed detection and return the updated stats
    pub fn record(&mut self, timing: &CycleTiming) -> LatencyStats {
        let now = timing.completed_at;
        self.completions.push_back(now);
        while let Some(&oldest) = self.completions.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.completions.pop_front();
            } else {
                break;
            }
        }

        let window_ms = self.window.as_millis().max(1) as u64;
        let per_second = self.completions.len() as u64 * 1000 / window_ms;

        self.latest = LatencyStats {
            frame_latency_ms: timing.frame_latency().as_millis() as u64,
            detector_latency_ms: timing.detector_latency().as_millis() as u64,
            frames_per_second: per_second.min(u32::MAX as u64) as u32,
        };
        self.latest
    }

    pub fn latest(&self) -> LatencyStats {
        self.latest
    }
}

/// Frame accounting shared between the submit path and the completion context
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) release_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Frames handed to `submit`
    pub submitted: u64,
    /// Frames that started a detection
    pub accepted: u64,
    /// Frames released without detection
    pub dropped: u64,
    /// Detections applied to the state machine
    pub completed: u64,
    /// Detections that reported an error
    pub failed: u64,
    /// Frame buffers the source refused to take back
    pub release_failures: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn timing(
        base: Instant,
        submitted_ms: u64,
        dispatched_ms: u64,
        completed_ms: u64,
    ) -> CycleTiming {
        CycleTiming {
            submitted_at: base + Duration::from_millis(submitted_ms),
            dispatched_at: base + Duration::from_millis(dispatched_ms),
            completed_at: base + Duration::from_millis(completed_ms),
        }
    }

    #[test]
    fn test_latencies() {
        let base = Instant::now();
        let mut tracker = LatencyTracker::new(Duration::from_secs(1));

        let stats = tracker.record(&timing(base, 0, 5, 85));
        assert_eq!(stats.frame_latency_ms, 85);
        assert_eq!(stats.detector_latency_ms, 80);
        assert_eq!(stats.frames_per_second, 1);
        assert_eq!(tracker.latest(), stats);
    }

    #[test]
    fn test_fps_counts_trailing_window() {
        let base = Instant::now();
        let mut tracker = LatencyTracker::new(Duration::from_secs(1));

        // 20 completions 50ms apart fill exactly one second
        let mut stats = LatencyStats::default();
        for i in 0..20 {
            stats = tracker.record(&timing(base, i * 50, i * 50, i * 50));
        }
        assert_eq!(stats.frames_per_second, 20);

        // After a long stall only the new completion is in the window
        let stats = tracker.record(&timing(base, 5000, 5000, 5000));
        assert_eq!(stats.frames_per_second, 1);
    }

    #[test]
    fn test_fps_scales_to_per_second() {
        let base = Instant::now();
        let mut tracker = LatencyTracker::new(Duration::from_millis(500));

        let mut stats = LatencyStats::default();
        for i in 0..5 {
            stats = tracker.record(&timing(base, i * 100, i * 100, i * 100));
        }
        assert_eq!(stats.frames_per_second, 10);
    }

    #[test]
    fn test_snapshot() {
        let counters = PipelineCounters::default();
        PipelineCounters::bump(&counters.submitted);
        PipelineCounters::bump(&counters.submitted);
        PipelineCounters::bump(&counters.dropped);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.accepted, 0);
    }

    proptest! {
        #[test]
        fn prop_fps_bounded_by_window(gaps in prop::collection::vec(0u64..400, 1..200)) {
            let base = Instant::now();
            let mut tracker = LatencyTracker::new(Duration::from_secs(1));
            let mut at = 0;
            let mut completions = Vec::new();

            for gap in gaps {
                at += gap;
                completions.push(at);
                let stats = tracker.record(&timing(base, at, at, at));

                let expected = completions.iter().filter(|&&c| at - c < 1000).count();
                prop_assert_eq!(stats.frames_per_second as usize, expected);
            }
        }
    }
}

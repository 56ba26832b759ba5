//! Frame Detection Pipeline
//!
//! Feeds camera frames to the face detector with at most one detection in
//! flight, drops frames that arrive while busy, tracks latency and FPS, and
//! applies completed detections to the drowsiness state machine on a single
//! completion context.

mod executor;
mod pipeline;
mod report;
mod stats;

pub use executor::ScopedTaskRunner;
pub use pipeline::FramePipeline;
pub use report::CycleReport;
pub use stats::{CycleTiming, LatencyStats, LatencyTracker, PipelineCounters, PipelineSnapshot};

use dms::DmsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors while setting up or tearing down the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Frame pipeline must be started inside a tokio runtime")]
    NoRuntime,
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Dms(#[from] DmsError),
    #[error("Completion worker failed: {0}")]
    Worker(String),
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing window of completed detections used for FPS (milliseconds)
    pub fps_window_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps_window_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.fps_window_ms == 0 {
            return Err(PipelineError::Config("fps_window_ms must be positive".into()));
        }
        Ok(())
    }
}

//! Per-cycle report pushed to display consumers

use chrono::{DateTime, Utc};
use dms::{DrowsinessCounters, FaceObservation};
use serde::{Deserialize, Serialize};

use crate::stats::LatencyStats;

/// Everything a display needs about the latest successful detection cycle.
///
/// Consumers only read it; nothing flows back into the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Successful cycles since start (0 before the first one)
    pub cycle: u64,
    /// Sequence number of the frame this cycle analysed
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Upright image size the face geometry refers to
    pub image_width: u32,
    pub image_height: u32,
    pub faces: Vec<FaceObservation>,
    pub latency: LatencyStats,
    pub counters: DrowsinessCounters,
    /// Alarms raised by this cycle
    pub alarms_raised: u32,
}

//! DMS configuration

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// DMS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Both eye-open probabilities must fall below this for a frame to count as closed
    pub eyes_closed_threshold: f32,

    /// Confirmed closures needed to sound the alarm
    pub alarm_count_threshold: u32,

    /// Sustained closure that confirms one closure (milliseconds).
    /// Converted to a frame count using the pipeline's measured FPS.
    pub closed_eyes_window_ms: u64,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            eyes_closed_threshold: 0.50,
            alarm_count_threshold: 10,
            closed_eyes_window_ms: 500,
        }
    }
}

impl DmsConfig {
    /// Create strict config (alarm sooner)
    pub fn strict() -> Self {
        Self {
            alarm_count_threshold: 5,
            closed_eyes_window_ms: 400,
            ..Default::default()
        }
    }

    /// Create lenient config (alarm later)
    pub fn lenient() -> Self {
        Self {
            eyes_closed_threshold: 0.35,
            alarm_count_threshold: 15,
            closed_eyes_window_ms: 700,
        }
    }

    /// Frames of closed eyes that confirm one closure at the given rate, never less than one
    pub fn required_closed_frames(&self, frames_per_second: u32) -> u32 {
        let frames = frames_per_second as u64 * self.closed_eyes_window_ms / 1000;
        frames.clamp(1, u32::MAX as u64) as u32
    }

    pub fn validate(&self) -> Result<(), DmsError> {
        if self.alarm_count_threshold == 0 {
            return Err(DmsError::Config("alarm_count_threshold must be positive".into()));
        }
        if !self.eyes_closed_threshold.is_finite() {
            return Err(DmsError::Config("eyes_closed_threshold must be finite".into()));
        }
        Ok(())
    }
}

//! Drowsiness counters

use serde::{Deserialize, Serialize};

/// Debounce counters shared by every face in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrowsinessCounters {
    /// Consecutive closed-eye frames toward the next confirmed closure
    pub eyes_closed_frame_count: u32,
    /// Confirmed closures toward the next alarm
    pub eyes_closed_count: u32,
    /// Alarms raised since start
    pub alarm_count: u32,
}

/// Eye state derived from the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeState {
    /// No closed-eye frames pending
    EyesOpen,
    /// Closed-eye frames accumulating toward a confirmed closure
    AccumulatingClosed,
}

impl DrowsinessCounters {
    pub fn eye_state(&self) -> EyeState {
        if self.eyes_closed_frame_count == 0 {
            EyeState::EyesOpen
        } else {
            EyeState::AccumulatingClosed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_state() {
        let mut counters = DrowsinessCounters::default();
        assert_eq!(counters.eye_state(), EyeState::EyesOpen);

        counters.eyes_closed_frame_count = 3;
        assert_eq!(counters.eye_state(), EyeState::AccumulatingClosed);
    }
}

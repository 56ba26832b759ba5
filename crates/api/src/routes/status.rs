//! Detection status endpoints

use axum::{extract::State, response::IntoResponse, Json};
use dms::{DrowsinessCounters, EyeState};
use frame_pipeline::{CycleReport, PipelineSnapshot};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Latest cycle report: faces, latency, FPS and counters
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<CycleReport> {
    Json(state.reports.borrow().clone())
}

#[derive(Debug, Serialize)]
pub struct AlarmStatus {
    pub playing: bool,
    pub triggered: u64,
}

#[derive(Debug, Serialize)]
pub struct CountersResponse {
    pub drowsiness: DrowsinessCounters,
    pub eye_state: EyeState,
    pub pipeline: PipelineSnapshot,
    pub alarm: AlarmStatus,
}

pub async fn get_counters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let drowsiness = state.reports.borrow().counters;

    Json(CountersResponse {
        drowsiness,
        eye_state: drowsiness.eye_state(),
        pipeline: state.pipeline.snapshot(),
        alarm: AlarmStatus {
            playing: state.alarm.is_playing(),
            triggered: state.alarm.trigger_count(),
        },
    })
}

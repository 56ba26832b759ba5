//! Face observations and the detector contract

use camera_capture::Frame;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::DmsError;

/// Point in upright image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

/// Face bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center(&self) -> PointF {
        PointF {
            x: self.left + self.width / 2.0,
            y: self.top + self.height / 2.0,
        }
    }
}

/// Facial landmark types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftCheek,
    RightCheek,
    NoseBase,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub position: PointF,
}

/// Facial contour types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContourKind {
    Face,
    LeftEyebrowTop,
    RightEyebrowTop,
    LeftEye,
    RightEye,
    UpperLipTop,
    LowerLipBottom,
    NoseBridge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub kind: ContourKind,
    pub points: Vec<PointF>,
}

/// One face reported by the detector for a single frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: BoundingBox,
    /// Stable id across frames when tracking is enabled
    pub tracking_id: Option<u32>,
    /// Probability (0-1) that the left eye is open
    pub left_eye_open_probability: Option<f32>,
    /// Probability (0-1) that the right eye is open
    pub right_eye_open_probability: Option<f32>,
    pub landmarks: Vec<Landmark>,
    pub contours: Vec<Contour>,
}

impl FaceObservation {
    /// Both eye probabilities, if the detector classified both eyes
    pub fn eye_open_probabilities(&self) -> Option<(f32, f32)> {
        match (self.left_eye_open_probability, self.right_eye_open_probability) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

/// External face detector.
///
/// Runs asynchronously; callers must not assume the future completes
/// synchronously. A detector is invoked at most once per frame.
pub trait FaceDetector: Send + Sync {
    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DmsError>> + Send + 'a;

    /// Release model resources. Idempotent.
    fn close(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    #[default]
    Fast,
    Accurate,
}

/// Options forwarded to the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    /// Report facial landmarks
    pub landmarks: bool,
    /// Report facial contours
    pub contours: bool,
    /// Classify eye openness
    pub classification: bool,
    pub performance_mode: PerformanceMode,
    /// Smallest face to report, as a fraction of the image width
    pub min_face_size: f32,
    /// Assign tracking ids across frames
    pub tracking: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            landmarks: true,
            contours: true,
            classification: true,
            performance_mode: PerformanceMode::Fast,
            min_face_size: 0.1,
            tracking: false,
        }
    }
}

/// Behaviour of the simulated detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time a single detection takes (milliseconds)
    pub latency_ms: u64,
    /// Faces reported per frame
    pub faces: u32,
    /// Detection cycles with open eyes before each closed stretch
    pub open_cycles: u32,
    /// Detection cycles with closed eyes
    pub closed_cycles: u32,
    /// Fail every N-th detection (0 = never)
    pub fail_every: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 60,
            faces: 1,
            open_cycles: 40,
            closed_cycles: 80,
            fail_every: 0,
        }
    }
}

const OPEN_PROBABILITIES: (f32, f32) = (0.92, 0.88);
const CLOSED_PROBABILITIES: (f32, f32) = (0.08, 0.12);

/// Detector that fabricates observations on a fixed open/closed schedule
pub struct SimulatedFaceDetector {
    options: DetectorOptions,
    simulation: SimulationConfig,
    calls: AtomicU64,
    closed: AtomicBool,
}

impl SimulatedFaceDetector {
    pub fn new(options: DetectorOptions, simulation: SimulationConfig) -> Result<Self, DmsError> {
        if !(0.0..=1.0).contains(&options.min_face_size) {
            return Err(DmsError::Config(format!(
                "min_face_size {} outside [0, 1]",
                options.min_face_size
            )));
        }
        info!("Simulated face detector options: {:?}", options);
        Ok(Self {
            options,
            simulation,
            calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of detections started so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Simulated cost of one detection; accurate mode takes twice as long
    pub fn detection_latency(&self) -> Duration {
        let base = Duration::from_millis(self.simulation.latency_ms);
        match self.options.performance_mode {
            PerformanceMode::Fast => base,
            PerformanceMode::Accurate => base * 2,
        }
    }

    fn eyes_closed_at(&self, call: u64) -> bool {
        let period = (self.simulation.open_cycles + self.simulation.closed_cycles) as u64;
        period > 0 && call % period >= self.simulation.open_cycles as u64
    }

    fn observe(&self, frame: &Frame, call: u64) -> Vec<FaceObservation> {
        let (width, height) = frame.metadata().upright_dimensions();
        let (width, height) = (width as f32, height as f32);
        let (left_p, right_p) = if self.eyes_closed_at(call) {
            CLOSED_PROBABILITIES
        } else {
            OPEN_PROBABILITIES
        };

        let slots = self.simulation.faces.max(1) as f32;
        let face_width = (width / slots) * 0.6;
        if face_width < width * self.options.min_face_size {
            return Vec::new();
        }

        (0..self.simulation.faces)
            .map(|i| {
                let bounding_box = BoundingBox {
                    left: (width / slots) * i as f32 + face_width / 3.0,
                    top: height * 0.2,
                    width: face_width,
                    height: height * 0.5,
                };
                self.face(bounding_box, i, left_p, right_p)
            })
            .collect()
    }

    fn face(
        &self,
        bounding_box: BoundingBox,
        index: u32,
        left_p: f32,
        right_p: f32,
    ) -> FaceObservation {
        let BoundingBox {
            left,
            top,
            width,
            height,
        } = bounding_box;
        let at = |fx: f32, fy: f32| PointF {
            x: left + width * fx,
            y: top + height * fy,
        };

        let landmarks = if self.options.landmarks {
            [
                (LandmarkKind::LeftEye, at(0.3, 0.35)),
                (LandmarkKind::RightEye, at(0.7, 0.35)),
                (LandmarkKind::NoseBase, at(0.5, 0.6)),
                (LandmarkKind::MouthBottom, at(0.5, 0.85)),
            ]
            .into_iter()
            .map(|(kind, position)| Landmark { kind, position })
            .collect()
        } else {
            Vec::new()
        };

        let contours = if self.options.contours {
            vec![Contour {
                kind: ContourKind::Face,
                points: vec![at(0.0, 0.0), at(1.0, 0.0), at(1.0, 1.0), at(0.0, 1.0)],
            }]
        } else {
            Vec::new()
        };

        let (left_eye_open_probability, right_eye_open_probability) =
            if self.options.classification {
                (Some(left_p), Some(right_p))
            } else {
                (None, None)
            };

        FaceObservation {
            bounding_box,
            tracking_id: self.options.tracking.then_some(index),
            left_eye_open_probability,
            right_eye_open_probability,
            landmarks,
            contours,
        }
    }
}

impl FaceDetector for SimulatedFaceDetector {
    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DmsError>> + Send + 'a {
        async move {
            if self.is_closed() {
                return Err(DmsError::DetectorClosed);
            }
            if frame.data().is_empty() {
                return Err(DmsError::InvalidFrame(format!(
                    "frame {} has no pixel data",
                    frame.sequence()
                )));
            }
            let call = self.calls.fetch_add(1, Ordering::Relaxed);

            let latency = self.detection_latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let fail_every = self.simulation.fail_every as u64;
            if fail_every > 0 && (call + 1) % fail_every == 0 {
                return Err(DmsError::Inference(format!(
                    "simulated failure on frame {}",
                    frame.sequence()
                )));
            }

            let faces = self.observe(frame, call);
            debug!(sequence = frame.sequence(), faces = faces.len(), "Simulated detection");
            Ok(faces)
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Simulated face detector closed");
        }
    }
}

//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the frame side of the detection pipeline:
//! - Exclusively owned frames with capture metadata
//! - The release contract frames are handed back through
//! - A recycling buffer pool acting as the frame source
//! - A synthetic camera that drives the pipeline at a fixed cadence

pub mod frame;
pub mod pool;
pub mod synthetic;

pub use frame::{Frame, FrameMetadata, FrameRelease};
pub use pool::BufferPool;
pub use synthetic::SyntheticCamera;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Unsupported rotation: {0} degrees")]
    InvalidRotation(u16),

    #[error("Buffer does not belong to this pool: expected {expected} bytes, got {actual}")]
    ForeignBuffer { expected: usize, actual: usize },

    #[error("Buffer pool is closed")]
    PoolClosed,

    #[error("Buffer pool lock poisoned")]
    Poisoned,

    #[error("Invalid format: {0}")]
    Format(String),
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Sensor rotation relative to upright (0, 90, 180 or 270)
    pub rotation_degrees: u16,
    /// Number of buffers the source can have outstanding
    pub buffer_count: usize,
    /// Bytes per pixel of the delivered format
    pub bytes_per_pixel: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            rotation_degrees: 270,
            buffer_count: 4,
            bytes_per_pixel: 1,
        }
    }
}

impl CameraConfig {
    /// Size in bytes of one frame buffer
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CameraError> {
        frame::check_rotation(self.rotation_degrees)?;
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::Format(format!(
                "{}x{} is not a valid frame size",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(CameraError::Format("fps must be positive".into()));
        }
        if self.buffer_count == 0 {
            return Err(CameraError::Format("buffer_count must be positive".into()));
        }
        Ok(())
    }
}

//! Video frame types and the release contract

use serde::{Deserialize, Serialize};

use crate::CameraError;

/// Geometry and timing of one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Buffer width as delivered by the sensor
    pub width: u32,
    /// Buffer height as delivered by the sensor
    pub height: u32,
    /// Clockwise rotation needed to display the frame upright
    pub rotation_degrees: u16,
    /// Capture timestamp (nanoseconds)
    pub capture_timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u64,
}

impl FrameMetadata {
    /// Create metadata, rejecting rotations that are not a multiple of 90
    pub fn new(
        width: u32,
        height: u32,
        rotation_degrees: u16,
        capture_timestamp_ns: u64,
        sequence: u64,
    ) -> Result<Self, CameraError> {
        check_rotation(rotation_degrees)?;
        Ok(Self {
            width,
            height,
            rotation_degrees,
            capture_timestamp_ns,
            sequence,
        })
    }

    /// Dimensions of the frame once rotated upright.
    ///
    /// Sensors mounted sideways deliver landscape buffers for a portrait
    /// scene, so width and height swap for 90 and 270 degrees.
    pub fn upright_dimensions(&self) -> (u32, u32) {
        match self.rotation_degrees {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }
}

pub(crate) fn check_rotation(rotation_degrees: u16) -> Result<(), CameraError> {
    match rotation_degrees {
        0 | 90 | 180 | 270 => Ok(()),
        other => Err(CameraError::InvalidRotation(other)),
    }
}

/// A captured frame.
///
/// The buffer is owned by whoever holds the frame until it is handed back
/// through [`FrameRelease::release`], which consumes it.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    metadata: FrameMetadata,
}

impl Frame {
    pub fn new(data: Vec<u8>, metadata: FrameMetadata) -> Self {
        Self { data, metadata }
    }

    /// Raw pixel data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel data, for the source filling a recycled buffer
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn sequence(&self) -> u64 {
        self.metadata.sequence
    }

    /// Split into buffer and metadata
    pub fn into_parts(self) -> (Vec<u8>, FrameMetadata) {
        (self.data, self.metadata)
    }
}

/// Hands a frame buffer back to the source that produced it
pub trait FrameRelease: Send + Sync {
    fn release(&self, frame: Frame) -> Result<(), CameraError>;
}

impl<T: FrameRelease + ?Sized> FrameRelease for std::sync::Arc<T> {
    fn release(&self, frame: Frame) -> Result<(), CameraError> {
        (**self).release(frame)
    }
}

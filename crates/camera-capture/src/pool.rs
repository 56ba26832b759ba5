//! Recycling buffer pool

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::frame::{Frame, FrameMetadata, FrameRelease};
use crate::CameraError;

/// Fixed set of frame buffers shared between the camera and its consumer.
///
/// Buffers handed out by [`BufferPool::acquire`] come back through
/// [`FrameRelease::release`]. When every buffer is out, the camera has to
/// skip frames until one is returned.
pub struct BufferPool {
    /// Returned buffers ready for reuse
    free: Mutex<Vec<Vec<u8>>>,
    /// Size of every buffer in bytes
    buffer_size: usize,
    /// Number of buffers the pool manages
    capacity: usize,
    /// Buffers currently owned by a frame
    outstanding: AtomicUsize,
    /// Total successful releases (for statistics)
    total_released: AtomicUsize,
    closed: AtomicBool,
}

impl BufferPool {
    /// Create a pool of `capacity` zeroed buffers of `buffer_size` bytes
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        info!("Creating buffer pool: {} x {} bytes", capacity, buffer_size);
        let free = (0..capacity).map(|_| vec![0u8; buffer_size]).collect();
        Self {
            free: Mutex::new(free),
            buffer_size,
            capacity,
            outstanding: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Take a buffer for a new frame, or `None` if the pool is exhausted or closed
    pub fn acquire(&self, metadata: FrameMetadata) -> Option<Frame> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let buffer = self.free.lock().ok()?.pop()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(Frame::new(buffer, metadata))
    }

    /// Stop handing out buffers; later releases are rejected
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                "Buffer pool closed with {} buffers outstanding",
                self.outstanding()
            );
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently held by frames
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Buffers ready to be handed out
    pub fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// Total frames released back to the pool
    pub fn total_released(&self) -> usize {
        self.total_released.load(Ordering::Relaxed)
    }
}

impl FrameRelease for BufferPool {
    fn release(&self, frame: Frame) -> Result<(), CameraError> {
        let sequence = frame.sequence();
        let (buffer, _) = frame.into_parts();

        // The frame left the consumer either way; the buffer is no longer outstanding
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::PoolClosed);
        }
        if buffer.len() != self.buffer_size {
            return Err(CameraError::ForeignBuffer {
                expected: self.buffer_size,
                actual: buffer.len(),
            });
        }

        self.free
            .lock()
            .map_err(|_| CameraError::Poisoned)?
            .push(buffer);
        self.total_released.fetch_add(1, Ordering::Relaxed);
        debug!(sequence, "Frame buffer returned to pool");
        Ok(())
    }
}

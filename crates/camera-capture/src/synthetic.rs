//! Synthetic frame source
//!
//! Stands in for the camera layer: produces frames at the configured rate
//! from a [`BufferPool`] and hands each one to a sink. Frame capture and
//! lifecycle binding of a real device live outside this crate.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::frame::{Frame, FrameMetadata};
use crate::pool::BufferPool;
use crate::{CameraConfig, CameraError};

/// Delivery statistics for one capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed to the sink
    pub delivered: u64,
    /// Ticks skipped because no buffer was free
    pub skipped: u64,
}

/// Fixed-rate camera producing frames from a buffer pool
pub struct SyntheticCamera {
    config: CameraConfig,
    pool: Arc<BufferPool>,
    next_sequence: u64,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig, pool: Arc<BufferPool>) -> Result<Self, CameraError> {
        config.validate()?;
        if pool.buffer_size() != config.frame_size() {
            return Err(CameraError::Format(format!(
                "pool buffers are {} bytes, frames need {}",
                pool.buffer_size(),
                config.frame_size()
            )));
        }
        Ok(Self {
            config,
            pool,
            next_sequence: 0,
        })
    }

    /// Deliver frames to `sink` until `shutdown` flips to true or its sender is dropped
    pub async fn run<F>(&mut self, mut sink: F, mut shutdown: watch::Receiver<bool>) -> CaptureStats
    where
        F: FnMut(Frame),
    {
        let period = Duration::from_secs_f64(1.0 / self.config.fps as f64);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut stats = CaptureStats::default();
        info!(
            "Synthetic camera started: {}x{} @ {}fps",
            self.config.width, self.config.height, self.config.fps
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.capture(started) {
                        Some(frame) => {
                            stats.delivered += 1;
                            sink(frame);
                        }
                        None => {
                            stats.skipped += 1;
                            debug!("No free buffer, skipping capture");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Synthetic camera stopped: delivered={}, skipped={}",
            stats.delivered, stats.skipped
        );
        stats
    }

    fn capture(&mut self, started: Instant) -> Option<Frame> {
        let metadata = FrameMetadata {
            width: self.config.width,
            height: self.config.height,
            rotation_degrees: self.config.rotation_degrees,
            capture_timestamp_ns: started.elapsed().as_nanos() as u64,
            sequence: self.next_sequence,
        };
        let mut frame = self.pool.acquire(metadata)?;
        // Cheap moving pattern so consecutive frames differ
        frame.data_mut().fill(self.next_sequence as u8);
        self.next_sequence += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRelease;

    fn config() -> CameraConfig {
        CameraConfig {
            width: 4,
            height: 2,
            fps: 10,
            rotation_degrees: 0,
            buffer_count: 2,
            bytes_per_pixel: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_frames_until_stopped() {
        let config = config();
        let pool = Arc::new(BufferPool::new(config.buffer_count, config.frame_size()));
        let mut camera = SyntheticCamera::new(config, Arc::clone(&pool)).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut sequences = Vec::new();
        let sink_pool = Arc::clone(&pool);
        let stats = camera
            .run(
                |frame| {
                    sequences.push(frame.sequence());
                    sink_pool.release(frame).unwrap();
                    if sequences.len() == 5 {
                        let _ = stop_tx.send(true);
                    }
                },
                stop_rx,
            )
            .await;

        assert_eq!(stats.delivered, 5);
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_when_pool_exhausted() {
        let config = config();
        let pool = Arc::new(BufferPool::new(config.buffer_count, config.frame_size()));
        let mut camera = SyntheticCamera::new(config, Arc::clone(&pool)).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            let stats = camera.run(|frame| held.push(frame), stop_rx).await;
            (stats, held.len())
        });

        tokio::time::sleep(Duration::from_millis(550)).await;
        stop_tx.send(true).unwrap();
        let (stats, held) = handle.await.unwrap();

        assert_eq!(stats.delivered, 2);
        assert_eq!(held, 2);
        assert!(stats.skipped >= 3);
    }

    #[test]
    fn test_rejects_mismatched_pool() {
        let pool = Arc::new(BufferPool::new(1, 3));
        assert!(SyntheticCamera::new(config(), pool).is_err());
    }
}

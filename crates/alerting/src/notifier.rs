//! Alarm Notifier Implementation

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Sink for drowsiness alarms.
///
/// Both calls must return immediately; playback happens elsewhere.
pub trait AlertNotifier: Send + Sync {
    /// Sound the alarm
    fn trigger(&self);

    /// Silence the alarm. Idempotent.
    fn stop(&self);
}

impl<T: AlertNotifier + ?Sized> AlertNotifier for Arc<T> {
    fn trigger(&self) {
        (**self).trigger()
    }

    fn stop(&self) {
        (**self).stop()
    }
}

/// Tone configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// How long one alarm tone plays (milliseconds)
    pub tone_duration_ms: u64,
    /// Playback volume (0.0 to 1.0)
    pub volume: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            tone_duration_ms: 1500,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToneCommand {
    Play,
    Stop,
}

/// Single-stream alarm tone driven by a background playback task.
///
/// A trigger while the tone is playing restarts it.
pub struct ToneNotifier {
    commands: mpsc::UnboundedSender<ToneCommand>,
    playing: Arc<AtomicBool>,
    triggers: AtomicU64,
}

impl ToneNotifier {
    /// Start the playback task. Must be called within a tokio runtime.
    pub fn spawn(mut config: ToneConfig) -> (Self, JoinHandle<()>) {
        config.volume = config.volume.clamp(0.0, 1.0);
        info!("Creating tone notifier with config: {:?}", config);

        let (tx, rx) = mpsc::unbounded_channel();
        let playing = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(playback(rx, Arc::clone(&playing), config));

        let notifier = Self {
            commands: tx,
            playing,
            triggers: AtomicU64::new(0),
        };
        (notifier, handle)
    }

    /// Whether the tone is currently sounding
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Number of alarms triggered
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    fn send(&self, command: ToneCommand) {
        if self.commands.send(command).is_err() {
            warn!(?command, "Tone playback task is gone");
        }
    }
}

impl AlertNotifier for ToneNotifier {
    fn trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        self.send(ToneCommand::Play);
    }

    fn stop(&self) {
        self.send(ToneCommand::Stop);
    }
}

async fn playback(
    mut commands: mpsc::UnboundedReceiver<ToneCommand>,
    playing: Arc<AtomicBool>,
    config: ToneConfig,
) {
    let tone = Duration::from_millis(config.tone_duration_ms);

    loop {
        let command = if playing.load(Ordering::Acquire) {
            tokio::select! {
                command = commands.recv() => command,
                _ = sleep(tone) => {
                    playing.store(false, Ordering::Release);
                    debug!("Alarm tone finished");
                    continue;
                }
            }
        } else {
            commands.recv().await
        };

        match command {
            Some(ToneCommand::Play) => {
                playing.store(true, Ordering::Release);
                info!(volume = config.volume, "Playing alarm tone");
            }
            Some(ToneCommand::Stop) => {
                if playing.swap(false, Ordering::AcqRel) {
                    info!("Alarm tone stopped");
                }
            }
            None => break,
        }
    }

    playing.store(false, Ordering::Release);
    debug!("Tone playback task stopped");
}

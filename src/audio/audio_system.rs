//! The AudioSystem that owns the capture and playback threads.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with the async network worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use anyhow::Result;

use super::alsa_device;
use super::play::play_thread;
use super::record::record_thread;
use super::ring_buffer::RingBuffer;
use super::sample_buffer::SampleBuffer;
use crate::config::Config;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Desired capture sample rate (may be negotiated by hardware)
    pub sample_rate: u32,
    /// Desired capture channel count
    pub channels: u32,
    /// Length of the capture ring buffer in seconds
    pub monitor_seconds: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
    /// Clips that may wait for the playback thread
    pub playback_queue: usize,
}

impl From<&Config> for AudioConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            capture_device: cfg.capture_device.to_string(),
            playback_device: cfg.playback_device.to_string(),
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            monitor_seconds: cfg.monitor_seconds,
            playback_period_size: cfg.playback_period_size,
            playback_queue: cfg.playback_queue,
        }
    }
}

/// Control-side handle to the playback thread.
#[derive(Clone)]
pub struct AudioPlayer {
    tx: mpsc::Sender<SampleBuffer>,
}

impl AudioPlayer {
    pub fn new(tx: mpsc::Sender<SampleBuffer>) -> Self {
        Self { tx }
    }

    /// Queue a clip without blocking and return how long it will play.
    ///
    /// A clip that cannot be queued plays for zero time.
    pub fn play(&self, clip: SampleBuffer) -> Duration {
        let duration = clip.duration();
        match self.tx.try_send(clip) {
            Ok(()) => duration,
            Err(TrySendError::Full(_)) => {
                log::warn!("Playback queue full, dropping {:?} clip", duration);
                Duration::ZERO
            }
            Err(TrySendError::Closed(_)) => {
                log::error!("Playback thread is gone, dropping {:?} clip", duration);
                Duration::ZERO
            }
        }
    }
}

/// The audio system manages recording and playback in dedicated OS threads.
///
/// - Recording thread: ALSA capture → ring buffer
/// - Playback thread: `AudioPlayer` → ALSA playback
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    ring: Arc<RingBuffer>,
    record_handle: Option<JoinHandle<()>>,
    play_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Open the microphone and start both threads.
    ///
    /// The capture device is opened before anything is spawned so a missing
    /// microphone surfaces as [`crate::error::Error::CaptureUnavailable`].
    /// The ring buffer is sized from the negotiated rate and channel count.
    pub fn start(config: AudioConfig) -> Result<(Self, AudioPlayer)> {
        let (pcm, params) =
            alsa_device::open_capture(&config.capture_device, config.sample_rate, config.channels)?;

        let ring = Arc::new(RingBuffer::new(
            config.monitor_seconds,
            params.sample_rate,
            params.channels,
        ));
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "AudioSystem starting, capture: \"{}\", playback: \"{}\", rate: {}Hz, ch: {}, monitor: {}s",
            config.capture_device,
            config.playback_device,
            params.sample_rate,
            params.channels,
            config.monitor_seconds,
        );

        let record_handle = {
            let running = running.clone();
            let ring = ring.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    if let Err(e) = record_thread(pcm, params, ring, &running) {
                        log::error!("Recording thread error: {}", e);
                    }
                })?
        };

        let (clip_tx, clip_rx) = mpsc::channel::<SampleBuffer>(config.playback_queue.max(1));
        let play_handle = {
            let running = running.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(&config, clip_rx, &running) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok((
            Self {
                running,
                ring,
                record_handle: Some(record_handle),
                play_handle: Some(play_handle),
            },
            AudioPlayer::new(clip_tx),
        ))
    }

    pub fn ring(&self) -> Arc<RingBuffer> {
        self.ring.clone()
    }

    /// Signal threads to stop and wait for the recorder to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
        // Playback thread exits once every AudioPlayer is dropped.
        // We detach it here to avoid blocking on a clip in progress.
        self.play_handle.take();
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

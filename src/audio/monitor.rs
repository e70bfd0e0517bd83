//! Amplitude-based voice activity detection over the capture ring buffer.
//!
//! Each tick looks at the most recent window of frames, computes the mean
//! absolute amplitude and maps it onto a normalized [0, 1] level through a
//! configurable dB range. The voice gate compares the *linear* amplitude
//! against the threshold; the normalized level is for display only.

use std::sync::Arc;

use super::ring_buffer::RingBuffer;
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Frames inspected per tick
    pub window_frames: usize,
    /// Linear mean-absolute amplitude above which voice is present
    pub threshold: f32,
    /// Level 0.0 in dBFS
    pub floor_db: f32,
    /// Level 1.0 in dBFS
    pub ceiling_db: f32,
    /// Amplitudes at or below this are treated as silence
    pub epsilon: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_frames: 1024,
            threshold: 0.02,
            floor_db: -60.0,
            ceiling_db: 0.0,
            epsilon: 1e-4,
        }
    }
}

impl From<&Config> for MonitorConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            window_frames: cfg.vad_window_frames,
            threshold: cfg.vad_threshold,
            floor_db: cfg.vad_floor_db,
            ceiling_db: cfg.vad_ceiling_db,
            epsilon: cfg.vad_epsilon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceLevel {
    /// Mean absolute amplitude of the window
    pub amplitude: f32,
    /// dB-normalized level in [0, 1]
    pub level: f32,
    pub voice_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorReading {
    /// The cursor has not advanced a full window past the buffer start
    NotReady,
    Ready(VoiceLevel),
}

impl MonitorReading {
    pub fn voice_present(&self) -> bool {
        matches!(self, MonitorReading::Ready(level) if level.voice_present)
    }
}

pub struct AudioMonitor {
    ring: Arc<RingBuffer>,
    config: MonitorConfig,
    window: Vec<f32>,
}

impl AudioMonitor {
    pub fn new(ring: Arc<RingBuffer>, config: MonitorConfig) -> Self {
        let window_frames = config.window_frames.clamp(1, ring.capacity_frames());
        let window = vec![0.0; window_frames * ring.channels() as usize];
        Self {
            ring,
            config: MonitorConfig {
                window_frames,
                ..config
            },
            window,
        }
    }

    pub fn tick(&mut self) -> MonitorReading {
        let cursor = self.ring.cursor();
        if cursor < self.config.window_frames {
            return MonitorReading::NotReady;
        }
        self.ring
            .read_window(&mut self.window, cursor - self.config.window_frames);

        let amplitude = mean_abs_amplitude(&self.window);
        MonitorReading::Ready(VoiceLevel {
            amplitude,
            level: normalize_level(amplitude, &self.config),
            voice_present: amplitude > self.config.threshold,
        })
    }
}

pub(crate) fn mean_abs_amplitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

pub(crate) fn normalize_level(amplitude: f32, config: &MonitorConfig) -> f32 {
    if amplitude <= config.epsilon {
        return 0.0;
    }
    let span = config.ceiling_db - config.floor_db;
    if span <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * amplitude.log10();
    ((db - config.floor_db) / span).clamp(0.0, 1.0)
}

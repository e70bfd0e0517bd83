//! audio - capture ring buffer, voice detection, snippet extraction, PCM16
//! codec and ALSA playback.
//!
//! Capture and playback run on their own OS threads; everything the control
//! loop touches (monitor, extractor, codec) is non-blocking.

mod alsa_device;
mod audio_system;
mod monitor;
mod play;
mod record;
mod ring_buffer;
mod sample_buffer;
mod snippet;
pub mod wav_codec;

pub use audio_system::{AudioConfig, AudioPlayer, AudioSystem};
pub use monitor::{AudioMonitor, MonitorConfig, MonitorReading};
pub use ring_buffer::RingBuffer;
pub use sample_buffer::SampleBuffer;
pub use snippet::SnippetExtractor;
pub use wav_codec::{AudioEnvelope, PayloadFormat};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alsa::pcm::PCM;
use anyhow::Result;

use super::alsa_device::AlsaParams;
use super::ring_buffer::RingBuffer;
use super::wav_codec::dequantize;

/// Capture loop: ALSA S16LE periods → f32 → ring buffer.
///
/// The ring buffer is the only consumer-visible output; the control loop
/// reads it through the monitor and snippet extractor without locking.
pub fn record_thread(
    pcm: PCM,
    params: AlsaParams,
    ring: Arc<RingBuffer>,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels as usize;
    let io = pcm.io_i16()?;

    // ALSA read buffer (interleaved i16, one period)
    let mut read_buf = vec![0i16; params.period_size.max(1) * channels];
    let mut float_buf: Vec<f32> = Vec::with_capacity(read_buf.len());

    log::info!(
        "Recording started: rate={}, ch={}, period={}, ring={} frames",
        params.sample_rate,
        channels,
        params.period_size,
        ring.capacity_frames(),
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                float_buf.clear();
                float_buf.extend(read_buf[..frames * channels].iter().map(|&s| dequantize(s)));
                ring.push(&float_buf);
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

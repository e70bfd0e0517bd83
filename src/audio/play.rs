use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use anyhow::Result;

use super::alsa_device;
use super::audio_system::AudioConfig;
use super::sample_buffer::SampleBuffer;
use super::wav_codec::quantize;

/// 连续写入失败的最大恢复次数
const MAX_RECOVERY_RETRIES: u32 = 3;

pub fn play_thread(
    config: &AudioConfig,
    mut clip_rx: mpsc::Receiver<SampleBuffer>,
    running: &AtomicBool,
) -> Result<()> {
    log::info!("Playback ready on \"{}\"", config.playback_device);

    while running.load(Ordering::Relaxed) {
        // Block until the controller hands over a clip (or the channel closes)
        match clip_rx.blocking_recv() {
            Some(clip) => {
                if let Err(e) = play_clip(config, &clip) {
                    log::error!("Playback of {:?} clip failed: {:#}", clip.duration(), e);
                }
            }
            None => {
                log::info!("Playback channel closed");
                break;
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

/// Open the device shaped like the clip, write every frame, then drain.
fn play_clip(config: &AudioConfig, clip: &SampleBuffer) -> Result<()> {
    if clip.is_empty() {
        return Ok(());
    }

    let period_size_opt = if config.playback_period_size > 0 {
        Some(config.playback_period_size)
    } else {
        None
    };
    let (pcm, params) = alsa_device::open_playback(
        &config.playback_device,
        clip.sample_rate(),
        clip.channels() as u32,
        period_size_opt,
    )?;

    if params.sample_rate != clip.sample_rate() {
        log::warn!(
            "Device negotiated {}Hz for a {}Hz clip; playback speed will differ",
            params.sample_rate,
            clip.sample_rate()
        );
    }

    let quantized: Vec<i16> = clip.samples().iter().map(|&s| quantize(s)).collect();
    let pcm_data = convert_channels(&quantized, clip.channels() as usize, params.channels as usize);
    let out_channels = params.channels.max(1) as usize;

    let io = pcm.io_i16()?;

    // Write with retry loop to handle short writes and XRUN recovery.
    let total_frames = pcm_data.len() / out_channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * out_channels;
        match io.writei(&pcm_data[offset..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;

                pcm.prepare()?;

                // 底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                if retry_count >= MAX_RECOVERY_RETRIES {
                    log::error!(
                        "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                        retry_count,
                        total_frames - frames_written
                    );
                    break;
                }
            }
        }
    }

    pcm.drain()?;
    log::debug!("Played {} frames", frames_written);
    Ok(())
}

/// Map interleaved samples from `from` channels to `to` channels.
///
/// Downmixing to mono averages; any other mapping repeats source channels
/// round-robin (mono → stereo duplicates).
pub(crate) fn convert_channels(samples: &[i16], from: usize, to: usize) -> Vec<i16> {
    let from = from.max(1);
    let to = to.max(1);
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
    out
}

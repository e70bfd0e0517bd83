//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use crate::error::Error;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone, Copy)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Period size in frames
    pub period_size: usize,
}

/// Open the microphone. Any failure means the session cannot start.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, AlsaParams), Error> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None)
        .map_err(|e| Error::CaptureUnavailable(format!("{device}: {e:#}")))
}

/// Open a playback device shaped for one clip.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Playback, sample_rate, channels, period_size)
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {:?}", device, direction))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels_near(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: u16::try_from(hwp.get_channels()?).context("channel count out of range")?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {:?}: device={}, rate={} (asked {}), channels={} (asked {}), period_size={}",
        direction,
        device,
        params.sample_rate,
        sample_rate,
        params.channels,
        channels,
        params.period_size,
    );

    Ok((pcm, params))
}

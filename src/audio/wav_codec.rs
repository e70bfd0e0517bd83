//! 16-bit linear PCM codec: RIFF/WAVE containers and raw little-endian PCM16.
//!
//! - Encode: f32 → `round(clamp(s, -1, 1) * 32767)` → i16 LE
//! - Decode: i16 LE → `v / 32768.0`

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::sample_buffer::SampleBuffer;
use crate::error::{Error, Result};

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const PCM_FMT_LEN: usize = 16;
const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const BITS_PER_SAMPLE: u16 = 16;

/// How an [`AudioEnvelope`] payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Complete RIFF/WAVE container
    #[default]
    Wav,
    /// Bare PCM16 LE; channel count and rate travel out of band
    Pcm16,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(PayloadFormat::Wav),
            "pcm16" => Ok(PayloadFormat::Pcm16),
            other => Err(format!("unknown payload format: {other}")),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Wav => f.write_str("wav"),
            PayloadFormat::Pcm16 => f.write_str("pcm16"),
        }
    }
}

/// Encoded audio plus the metadata needed to decode it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEnvelope {
    pub channels: u16,
    pub sample_rate: u32,
    pub format: PayloadFormat,
    pub payload: Bytes,
}

pub fn encode(buffer: &SampleBuffer, format: PayloadFormat) -> AudioEnvelope {
    let payload = match format {
        PayloadFormat::Wav => encode_wav(buffer),
        PayloadFormat::Pcm16 => encode_pcm16(buffer.samples()),
    };
    AudioEnvelope {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        format,
        payload,
    }
}

/// Decode an envelope. WAV payloads carry their own layout; the envelope's
/// channel count and rate are only consulted for raw PCM16.
pub fn decode(envelope: &AudioEnvelope) -> Result<SampleBuffer> {
    match envelope.format {
        PayloadFormat::Wav => decode_wav(&envelope.payload),
        PayloadFormat::Pcm16 => {
            decode_pcm16(&envelope.payload, envelope.channels, envelope.sample_rate)
        }
    }
}

pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

pub fn dequantize(value: i16) -> f32 {
    value as f32 / 32768.0
}

pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(quantize(sample));
    }
    out.freeze()
}

/// Canonical 44-byte header followed by the PCM16 data chunk.
pub fn encode_wav(buffer: &SampleBuffer) -> Bytes {
    let channels = buffer.channels();
    let sample_rate = buffer.sample_rate();
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let data_len = (buffer.samples().len() * 2) as u32;

    let mut out = BytesMut::with_capacity(44 + data_len as usize);
    out.put_slice(b"RIFF");
    out.put_u32_le(36 + data_len);
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(PCM_FMT_LEN as u32);
    out.put_u16_le(WAVE_FORMAT_PCM);
    out.put_u16_le(channels);
    out.put_u32_le(sample_rate);
    out.put_u32_le(sample_rate * block_align as u32);
    out.put_u16_le(block_align);
    out.put_u16_le(BITS_PER_SAMPLE);

    out.put_slice(b"data");
    out.put_u32_le(data_len);
    for &sample in buffer.samples() {
        out.put_i16_le(quantize(sample));
    }
    out.freeze()
}

/// Decode raw PCM16 LE. A trailing odd byte or partial frame is dropped.
pub fn decode_pcm16(bytes: &[u8], channels: u16, sample_rate: u32) -> Result<SampleBuffer> {
    if channels == 0 {
        return Err(Error::ChannelLayout {
            len: bytes.len() / 2,
            channels,
        });
    }
    let frame_bytes = channels as usize * 2;
    let usable = bytes.len() - bytes.len() % frame_bytes;
    let samples = bytes[..usable]
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    SampleBuffer::new(samples, channels, sample_rate)
}

/// Parse a RIFF/WAVE container.
///
/// Chunks other than `fmt ` and `data` are skipped by their declared size
/// until the `data` chunk is found.
pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer> {
    let mut buf = bytes;
    if buf.remaining() < RIFF_HEADER_LEN {
        return Err(Error::MalformedContainer(format!(
            "{} bytes is shorter than a RIFF header",
            bytes.len()
        )));
    }
    if take_id(&mut buf) != *b"RIFF" {
        return Err(Error::MalformedContainer("missing RIFF chunk id".into()));
    }
    buf.advance(4);
    if take_id(&mut buf) != *b"WAVE" {
        return Err(Error::MalformedContainer("missing WAVE form type".into()));
    }

    let mut layout: Option<(u16, u32)> = None;
    loop {
        if buf.remaining() < CHUNK_HEADER_LEN {
            return Err(Error::MalformedContainer(
                "stream ended before a data chunk".into(),
            ));
        }
        let id = take_id(&mut buf);
        let size = buf.get_u32_le() as usize;

        match &id {
            b"fmt " => {
                if size < PCM_FMT_LEN || size > buf.remaining() {
                    return Err(Error::MalformedContainer(format!(
                        "fmt chunk of {size} bytes with {} remaining",
                        buf.remaining()
                    )));
                }
                let format = buf.get_u16_le();
                let channels = buf.get_u16_le();
                let sample_rate = buf.get_u32_le();
                buf.advance(4 + 2); // byte rate, block align
                let bits = buf.get_u16_le();
                buf.advance(size - PCM_FMT_LEN);
                skip_pad_byte(&mut buf, size);

                if !matches!(format, WAVE_FORMAT_PCM | WAVE_FORMAT_EXTENSIBLE)
                    || bits != BITS_PER_SAMPLE
                {
                    return Err(Error::UnsupportedEncoding { format, bits });
                }
                if channels == 0 {
                    return Err(Error::MalformedContainer("fmt chunk declares 0 channels".into()));
                }
                layout = Some((channels, sample_rate));
            }
            b"data" => {
                let (channels, sample_rate) = layout.ok_or_else(|| {
                    Error::MalformedContainer("data chunk precedes fmt chunk".into())
                })?;
                if size > buf.remaining() {
                    return Err(Error::TruncatedPayload {
                        declared: size,
                        available: buf.remaining(),
                    });
                }
                return decode_pcm16(&buf[..size], channels, sample_rate);
            }
            _ => {
                if size > buf.remaining() {
                    return Err(Error::MalformedContainer(format!(
                        "chunk {:?} runs past the end of the stream",
                        String::from_utf8_lossy(&id)
                    )));
                }
                buf.advance(size);
                skip_pad_byte(&mut buf, size);
            }
        }
    }
}

/// Odd-sized chunks are followed by one pad byte. Some writers omit it on
/// the last chunk, so a missing pad at the end of the stream is tolerated.
fn skip_pad_byte(buf: &mut &[u8], size: usize) {
    if size % 2 == 1 && buf.has_remaining() {
        buf.advance(1);
    }
}

fn take_id(buf: &mut &[u8]) -> [u8; 4] {
    let mut id = [0u8; 4];
    buf.copy_to_slice(&mut id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mono(samples: Vec<f32>) -> SampleBuffer {
        SampleBuffer::new(samples, 1, 16_000).unwrap()
    }

    /// RIFF header plus a PCM16 fmt chunk with `extra` trailing fmt bytes.
    fn header_with_fmt(channels: u16, sample_rate: u32, extra: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        out.put_slice(b"RIFF");
        out.put_u32_le(0);
        out.put_slice(b"WAVE");
        out.put_slice(b"fmt ");
        out.put_u32_le((PCM_FMT_LEN + extra.len()) as u32);
        out.put_u16_le(WAVE_FORMAT_PCM);
        out.put_u16_le(channels);
        out.put_u32_le(sample_rate);
        out.put_u32_le(sample_rate * channels as u32 * 2);
        out.put_u16_le(channels * 2);
        out.put_u16_le(16);
        out.put_slice(extra);
        out
    }

    #[test]
    fn raw_pcm16_decodes_to_expected_floats() {
        let buffer = decode_pcm16(&[0x00, 0x00, 0xFF, 0x7F], 1, 16_000).unwrap();
        assert_eq!(buffer.samples()[0], 0.0);
        assert!((buffer.samples()[1] - 0.999_969_5).abs() < 1e-6);
    }

    #[test]
    fn half_scale_encodes_to_16384() {
        let bytes = encode_pcm16(&[0.5, -0.5]);
        assert_eq!(&bytes[..], &[0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 16384);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -16384);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let bytes = encode_pcm16(&[1.5, -3.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }

    #[test]
    fn wav_header_is_canonical() {
        let wav = encode_wav(&mono(vec![0.0; 10]));
        assert_eq!(wav.len(), 44 + 20);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 20);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[36..40].try_into().unwrap()), 0x6174_6164);
    }

    #[test]
    fn wav_round_trip_stays_within_quantization_error() {
        let samples: Vec<f32> = (0..=400).map(|i| i as f32 / 200.0 - 1.0).collect();
        let stereo = SampleBuffer::new(samples[..400].to_vec(), 2, 22_050).unwrap();
        let decoded = decode(&encode(&stereo, PayloadFormat::Wav)).unwrap();

        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.sample_rate(), 22_050);
        assert_eq!(decoded.samples().len(), stereo.samples().len());
        for (original, restored) in stereo.samples().iter().zip(decoded.samples()) {
            let err = (original - restored).abs();
            // Encoding scales by 32767 and decoding by 32768, so the bound
            // grows from 0.5 LSB at zero to 1.5 LSB at full scale.
            assert!(err <= (0.5 + original.abs()) / 32768.0 + 1e-7, "{original} -> {restored}");
            if original.abs() <= 0.5 {
                assert!(err <= 1.0 / 32768.0 + 1e-7);
            }
        }
    }

    #[test]
    fn pcm16_envelope_round_trip_uses_out_of_band_layout() {
        let buffer = SampleBuffer::new(vec![0.25, -0.25, 0.5, -0.5], 2, 8_000).unwrap();
        let envelope = encode(&buffer, PayloadFormat::Pcm16);
        assert_eq!(envelope.payload.len(), 8);
        assert_eq!(envelope.channels, 2);

        let decoded = decode(&envelope).unwrap();
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.sample_rate(), 8_000);
        assert_eq!(decoded.frames(), 2);
    }

    #[test]
    fn skips_unknown_chunks_before_data() {
        let mut wav = header_with_fmt(1, 16_000, &[]);
        wav.put_slice(b"LIST");
        wav.put_u32_le(4);
        wav.put_slice(b"INFO");
        wav.put_slice(b"data");
        wav.put_u32_le(4);
        wav.put_i16_le(0);
        wav.put_i16_le(i16::MIN);

        let buffer = decode_wav(&wav).unwrap();
        assert_eq!(buffer.samples(), &[0.0, -1.0]);
    }

    #[test]
    fn odd_sized_chunks_are_followed_by_a_pad_byte() {
        let mut wav = header_with_fmt(1, 16_000, &[]);
        wav.put_slice(b"LIST");
        wav.put_u32_le(3);
        wav.put_slice(b"abc");
        wav.put_u8(0);
        wav.put_slice(b"data");
        wav.put_u32_le(4);
        wav.put_i16_le(16384);
        wav.put_i16_le(-16384);

        let buffer = decode_wav(&wav).unwrap();
        assert_eq!(buffer.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn odd_sized_fmt_chunk_is_padded() {
        let mut wav = header_with_fmt(1, 8_000, &[0x07]);
        wav.put_u8(0);
        wav.put_slice(b"data");
        wav.put_u32_le(2);
        wav.put_i16_le(i16::MIN);

        let buffer = decode_wav(&wav).unwrap();
        assert_eq!(buffer.sample_rate(), 8_000);
        assert_eq!(buffer.samples(), &[-1.0]);
    }

    #[test]
    fn honours_extended_fmt_chunk() {
        let mut wav = header_with_fmt(2, 44_100, &[0x00, 0x00]);
        wav.put_slice(b"data");
        wav.put_u32_le(4);
        wav.put_i16_le(16384);
        wav.put_i16_le(-16384);

        let buffer = decode_wav(&wav).unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.sample_rate(), 44_100);
        assert_eq!(buffer.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn missing_data_chunk_is_malformed() {
        let mut wav = header_with_fmt(1, 16_000, &[]);
        wav.put_slice(b"LIST");
        wav.put_u32_le(4);
        wav.put_slice(b"INFO");
        assert!(matches!(decode_wav(&wav), Err(Error::MalformedContainer(_))));
    }

    #[test]
    fn oversized_skip_chunk_is_malformed() {
        let mut wav = header_with_fmt(1, 16_000, &[]);
        wav.put_slice(b"junk");
        wav.put_u32_le(1_000);
        wav.put_slice(&[0u8; 8]);
        assert!(matches!(decode_wav(&wav), Err(Error::MalformedContainer(_))));
    }

    #[test]
    fn short_data_chunk_is_truncated() {
        let mut wav = header_with_fmt(1, 16_000, &[]);
        wav.put_slice(b"data");
        wav.put_u32_le(100);
        wav.put_slice(&[0u8; 10]);
        match decode_wav(&wav) {
            Err(Error::TruncatedPayload { declared, available }) => {
                assert_eq!(declared, 100);
                assert_eq!(available, 10);
            }
            other => panic!("expected TruncatedPayload, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_riff_input() {
        assert!(matches!(decode_wav(b"hello"), Err(Error::MalformedContainer(_))));
        assert!(matches!(
            decode_wav(b"RIFX\0\0\0\0WAVEfmt "),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn rejects_float_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(0.5f32).unwrap();
            writer.finalize().unwrap();
        }
        assert!(matches!(
            decode_wav(&cursor.into_inner()),
            Err(Error::UnsupportedEncoding { bits: 32, .. })
        ));
    }

    #[test]
    fn reads_wav_written_by_hound() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for value in [0i16, 8192, -8192, 32767] {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }

        let buffer = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.sample_rate(), 24_000);
        assert_eq!(buffer.samples()[..3], [0.0, 0.25, -0.25]);
    }

    #[test]
    fn hound_reads_our_wav() {
        let buffer = SampleBuffer::new(vec![0.5, -0.5, 0.0, 1.0], 2, 16_000).unwrap();
        let wav = encode_wav(&buffer);
        let mut reader = hound::WavReader::new(Cursor::new(wav.to_vec())).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16384, -16384, 0, 32767]);
    }
}

//! Wire messages exchanged with the inference server.
//!
//! One request frame gets exactly one reply frame. Requests are either the
//! bare record sentinel (server-side capture) or a JSON audio envelope;
//! replies are JSON carrying a gesture label and, optionally, audio inline
//! (`audio_b64`) or by file path (`audio_path`).

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::{AudioEnvelope, PayloadFormat};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct AudioRequest {
    pub request_id: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub format: PayloadFormat,
    pub audio_b64: String,
}

impl AudioRequest {
    pub fn new(envelope: &AudioEnvelope) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            channels: envelope.channels,
            sample_rate: envelope.sample_rate,
            format: envelope.format,
            audio_b64: BASE64.encode(&envelope.payload),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Ask the server to record on its side
    Sentinel(String),
    Audio(AudioRequest),
}

impl OutboundFrame {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundFrame::Sentinel(_) => None,
            OutboundFrame::Audio(request) => Some(&request.request_id),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        match self {
            OutboundFrame::Sentinel(text) => Ok(text.clone()),
            OutboundFrame::Audio(request) => Ok(serde_json::to_string(request)?),
        }
    }
}

/// Reply as it arrives on the wire. Empty strings count as absent.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerReply {
    pub gesture: Option<String>,
    pub audio_path: Option<String>,
    pub audio_b64: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub request_id: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub format: Option<PayloadFormat>,
}

pub enum AudioSource<'a> {
    Inline(&'a str),
    File(&'a str),
}

impl ServerReply {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("unreadable reply ({e}): {}", preview(text))))
    }

    pub fn gesture(&self) -> Option<&str> {
        non_empty(&self.gesture)
    }

    /// `status` with `state` as a fallback.
    pub fn status(&self) -> Option<&str> {
        non_empty(&self.status).or_else(|| non_empty(&self.state))
    }

    pub fn audio_source(&self) -> Option<AudioSource<'_>> {
        if let Some(b64) = non_empty(&self.audio_b64) {
            return Some(AudioSource::Inline(b64));
        }
        non_empty(&self.audio_path).map(AudioSource::File)
    }

    /// A reply belongs to the pending request unless both carry ids and the
    /// ids differ.
    pub fn correlates_with(&self, pending: Option<&str>) -> bool {
        match (non_empty(&self.request_id), pending) {
            (Some(reply_id), Some(pending_id)) => reply_id == pending_id,
            _ => true,
        }
    }

    /// Wrap payload bytes with the layout this reply declares.
    pub fn envelope(&self, payload: Bytes) -> Result<AudioEnvelope> {
        let format = self.format.unwrap_or_default();
        let sample_rate = match (format, self.sample_rate) {
            (_, Some(rate)) => rate,
            (PayloadFormat::Wav, None) => 0,
            (PayloadFormat::Pcm16, None) => {
                return Err(Error::Protocol("pcm16 reply without sample_rate".into()));
            }
        };
        Ok(AudioEnvelope {
            channels: self.channels.unwrap_or(1),
            sample_rate,
            format,
            payload,
        })
    }
}

/// Decode an inline base64 payload.
pub fn decode_inline(b64: &str) -> Result<Bytes> {
    Ok(Bytes::from(BASE64.decode(b64.trim())?))
}

/// Accept both `C:\clips\a.wav` and `file:///clips/a.wav` style paths.
pub fn normalize_audio_path(path: &str) -> PathBuf {
    let path = path.replace('\\', "/");
    let path = path.strip_prefix("file://").unwrap_or(&path);
    PathBuf::from(path)
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

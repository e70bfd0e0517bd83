//! Error taxonomy for the avatar link core.
//!
//! Only [`Error::CaptureUnavailable`] is fatal, and only at startup. Every
//! other variant is recovered by the session controller falling back to Idle.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No usable input device
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    /// Container ended (or was unrecognisable) before a `data` chunk was found
    #[error("malformed audio container: {0}")]
    MalformedContainer(String),

    /// Declared data size exceeds the bytes actually present
    #[error("truncated audio payload: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    /// WAV file that is not 16-bit linear PCM
    #[error("unsupported audio encoding: format tag {format}, {bits} bits per sample")]
    UnsupportedEncoding { format: u16, bits: u16 },

    #[error("{len} samples cannot be split into frames of {channels} channels")]
    ChannelLayout { len: usize, channels: u16 },

    #[error("snippet of {requested} frames exceeds ring capacity of {capacity} frames")]
    SnippetTooLong { requested: usize, capacity: usize },

    #[error("no reply within {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("a request is already awaiting its reply")]
    RequestInFlight,

    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),

    /// Reply frame that could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

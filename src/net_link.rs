//! Network worker: one request in flight, one reply per request.
//!
//! The control loop owns a [`NetClient`] and never blocks on it. The
//! [`NetLink`] worker runs as its own task, owns the [`Transport`], and
//! reports every outcome through the dispatcher as a [`LinkEvent`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::audio::AudioEnvelope;
use crate::config::Config;
use crate::dispatcher::Enqueuer;
use crate::error::{Error, Result};
use crate::protocol::{self, AudioSource, OutboundFrame, ServerReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Idle = 0,
    AwaitingReply = 1,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        if value == RequestState::AwaitingReply as u8 {
            RequestState::AwaitingReply
        } else {
            RequestState::Idle
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub reply_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&Config> for LinkConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            reply_timeout: Duration::from_millis(cfg.reply_timeout_ms),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
        }
    }
}

/// A reply resolved on the worker: any audio is already loaded into memory.
#[derive(Debug, Clone)]
pub struct Reply {
    pub request_id: Option<String>,
    pub gesture: Option<String>,
    pub status: Option<String>,
    pub audio: Option<AudioEnvelope>,
}

#[derive(Debug)]
pub enum LinkEvent {
    Reply(Reply),
    Failed {
        request_id: Option<String>,
        error: Error,
    },
}

/// Control-side handle. Cheap to clone; all clones share one request slot.
#[derive(Clone)]
pub struct NetClient {
    state: Arc<AtomicU8>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl NetClient {
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Hand a frame to the worker. Only accepted while Idle.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.state
            .compare_exchange(
                RequestState::Idle as u8,
                RequestState::AwaitingReply as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::RequestInFlight)?;

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.store(RequestState::Idle as u8, Ordering::Release);
                match e {
                    TrySendError::Full(_) => Err(Error::RequestInFlight),
                    TrySendError::Closed(_) => Err(Error::TransportUnreachable(
                        "network worker has stopped".into(),
                    )),
                }
            }
        }
    }
}

/// Carrier for request and reply text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    /// Next text frame from the server. Cancel-safe with respect to the
    /// connection: dropping the future leaves the transport usable.
    async fn recv_text(&mut self) -> Result<String>;
    /// Drop the connection so nothing still in flight can be read later.
    async fn reset(&mut self);
}

/// Create the control-side handle and the worker that serves it.
pub fn link<T: Transport>(
    transport: T,
    config: LinkConfig,
    events: Enqueuer<LinkEvent>,
    running: Arc<AtomicBool>,
) -> (NetClient, NetLink<T>) {
    let state = Arc::new(AtomicU8::new(RequestState::Idle as u8));
    let (tx, rx) = mpsc::channel(1);
    (
        NetClient {
            state: state.clone(),
            outbound: tx,
        },
        NetLink {
            transport,
            config,
            state,
            outbound: rx,
            events,
            running,
        },
    )
}

pub struct NetLink<T: Transport> {
    transport: T,
    config: LinkConfig,
    state: Arc<AtomicU8>,
    outbound: mpsc::Receiver<OutboundFrame>,
    events: Enqueuer<LinkEvent>,
    running: Arc<AtomicBool>,
}

impl<T: Transport> NetLink<T> {
    pub async fn run(mut self) {
        log::info!(
            "Network worker started (reply timeout {:?})",
            self.config.reply_timeout
        );

        while self.running.load(Ordering::Relaxed) {
            // Short waits so the running flag is observed promptly
            let frame = match timeout(self.config.poll_interval, self.outbound.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    log::info!("All NetClient handles dropped");
                    break;
                }
                Ok(Some(frame)) => frame,
            };

            let request_id = frame.request_id().map(str::to_owned);
            let event = match self.exchange(&frame).await {
                Ok(reply) => {
                    log::info!(
                        "Reply {:?}: gesture {:?}, audio {}",
                        reply.request_id,
                        reply.gesture,
                        reply.audio.as_ref().map_or(0, |a| a.payload.len())
                    );
                    LinkEvent::Reply(reply)
                }
                Err(error) => {
                    log::warn!("Request {:?} failed: {}", request_id, error);
                    if matches!(error, Error::RequestTimeout(_) | Error::TransportUnreachable(_)) {
                        self.transport.reset().await;
                    }
                    LinkEvent::Failed { request_id, error }
                }
            };

            self.state.store(RequestState::Idle as u8, Ordering::Release);
            if !self.events.enqueue(event) {
                log::info!("Dispatcher dropped, network worker exiting");
                break;
            }
        }

        self.transport.reset().await;
        log::info!("Network worker stopped");
    }

    async fn exchange(&mut self, frame: &OutboundFrame) -> Result<Reply> {
        self.transport.send_text(frame.to_text()?).await?;
        log::debug!("Request {:?} sent", frame.request_id());

        let deadline = Instant::now() + self.config.reply_timeout;
        loop {
            let text = match timeout_at(deadline, self.transport.recv_text()).await {
                Ok(received) => received?,
                Err(_) => return Err(Error::RequestTimeout(self.config.reply_timeout)),
            };

            let reply = ServerReply::parse(&text)?;
            if !reply.correlates_with(frame.request_id()) {
                log::warn!(
                    "Skipping stale reply {:?} while waiting for {:?}",
                    reply.request_id,
                    frame.request_id()
                );
                continue;
            }
            return resolve(reply).await;
        }
    }
}

/// Load whatever audio the reply refers to.
async fn resolve(reply: ServerReply) -> Result<Reply> {
    let audio = match reply.audio_source() {
        None => None,
        Some(AudioSource::Inline(b64)) => Some(reply.envelope(protocol::decode_inline(b64)?)?),
        Some(AudioSource::File(path)) => {
            let path = protocol::normalize_audio_path(path);
            let bytes = tokio::fs::read(&path).await.inspect_err(|e| {
                log::warn!("Cannot read reply audio {}: {}", path.display(), e);
            })?;
            Some(reply.envelope(Bytes::from(bytes))?)
        }
    };

    Ok(Reply {
        request_id: reply.request_id.clone(),
        gesture: reply.gesture().map(str::to_owned),
        status: reply.status().map(str::to_owned),
        audio,
    })
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket carrier. Connects on first use and again after any failure.
pub struct WsTransport {
    url: String,
    device_id: String,
    client_id: String,
    stream: Option<WsStream>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, device_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            device_id: device_id.into(),
            client_id: client_id.into(),
            stream: None,
        }
    }

    fn handshake_request(&self) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::TransportUnreachable(format!("invalid server url {}: {}", self.url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::TransportUnreachable(format!("no host in {}", self.url)));
            }
        };

        tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Device-Id", self.device_id.as_str())
            .header("Client-Id", self.client_id.as_str())
            .header("Protocol-Version", "1")
            .body(())
            .map_err(|e| Error::TransportUnreachable(format!("bad handshake request: {}", e)))
    }

    async fn connection(&mut self) -> Result<&mut WsStream> {
        if self.stream.is_none() {
            let request = self.handshake_request()?;
            log::info!("Connecting to {}...", self.url);
            let (ws, _) = connect_async(request)
                .await
                .map_err(|e| Error::TransportUnreachable(format!("{}: {}", self.url, e)))?;
            log::info!("Connected to {}", self.url);
            self.stream = Some(ws);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::TransportUnreachable("not connected".into()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let ws = self.connection().await?;
        let sent = ws.send(Message::Text(text.into())).await;
        if let Err(e) = sent {
            self.stream = None;
            return Err(Error::TransportUnreachable(format!("send failed: {}", e)));
        }
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<String> {
        loop {
            let Some(ws) = self.stream.as_mut() else {
                return Err(Error::TransportUnreachable("not connected".into()));
            };
            let msg = ws.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec())
                        .map_err(|_| Error::Protocol("binary reply is not UTF-8".into()));
                }
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    return Err(Error::TransportUnreachable(format!(
                        "server closed connection: {:?}",
                        frame
                    )));
                }
                // Ping/Pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(Error::TransportUnreachable(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(Error::TransportUnreachable("connection closed".into()));
                }
            }
        }
    }

    async fn reset(&mut self) {
        if let Some(mut ws) = self.stream.take() {
            let _ = timeout(Duration::from_secs(1), ws.close(None)).await;
            log::debug!("Connection to {} reset", self.url);
        }
    }
}

/// A client whose outbound frames are collected by the test instead of a
/// worker.
#[cfg(test)]
pub(crate) struct DetachedWorker {
    state: Arc<AtomicU8>,
    rx: mpsc::Receiver<OutboundFrame>,
}

#[cfg(test)]
impl DetachedWorker {
    pub(crate) fn pair() -> (NetClient, DetachedWorker) {
        let state = Arc::new(AtomicU8::new(RequestState::Idle as u8));
        let (tx, rx) = mpsc::channel(1);
        (
            NetClient {
                state: state.clone(),
                outbound: tx,
            },
            DetachedWorker { state, rx },
        )
    }

    pub(crate) fn take(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }

    /// What the worker does once a reply (or failure) is ready.
    pub(crate) fn finish(&self) {
        self.state.store(RequestState::Idle as u8, Ordering::Release);
    }
}

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::audio::{AudioPlayer, SampleBuffer};
use crate::config::Config;
use crate::controller::AvatarSink;
use crate::state_machine::SessionState;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AnimMessage<'a> {
    Gesture { name: &'a str },
    State { state: &'a str },
}

/// The avatar renderer and the core talk over local UDP, ports from config.
///
/// Messages are queued without blocking and written by a sender task that
/// owns the socket, so the control loop never waits on the network.
pub struct AnimationBridge {
    tx: mpsc::UnboundedSender<String>,
}

impl AnimationBridge {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.anim_local_ip, config.anim_local_port),
            &format!("{}:{}", config.anim_remote_ip, config.anim_remote_port),
        )
        .await
    }

    pub async fn bind(local: &str, remote: &str) -> anyhow::Result<Self> {
        let target: SocketAddr = remote.parse()?;
        let socket = UdpSocket::bind(local).await?;
        log::info!("Animation bridge {} -> {}", socket.local_addr()?, target);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_sender(socket, target, rx));
        Ok(Self { tx })
    }

    pub fn trigger(&self, gesture: &str) {
        self.send(&AnimMessage::Gesture { name: gesture });
    }

    pub fn state(&self, state: &str) {
        self.send(&AnimMessage::State { state });
    }

    fn send(&self, msg: &AnimMessage<'_>) {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode animation message: {}", e);
                return;
            }
        };
        if self.tx.send(text).is_err() {
            log::warn!("Animation sender task is gone, dropping update");
        }
    }
}

// Exits once the bridge is dropped
async fn run_sender(socket: UdpSocket, target: SocketAddr, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = socket.send_to(text.as_bytes(), target).await {
            log::warn!("Failed to send to renderer: {}", e);
        }
    }
}

/// Gestures and state to the renderer, reply audio to the speaker.
pub struct AvatarOutput {
    bridge: AnimationBridge,
    player: AudioPlayer,
    last_state: Option<&'static str>,
}

impl AvatarOutput {
    pub fn new(bridge: AnimationBridge, player: AudioPlayer) -> Self {
        Self {
            bridge,
            player,
            last_state: None,
        }
    }
}

impl AvatarSink for AvatarOutput {
    fn trigger(&mut self, gesture: &str) {
        log::debug!("Gesture: {}", gesture);
        self.bridge.trigger(gesture);
    }

    fn play(&mut self, clip: SampleBuffer) -> Duration {
        self.player.play(clip)
    }

    fn state_changed(&mut self, state: &SessionState) {
        let label = state.label();
        if self.last_state != Some(label) {
            self.last_state = Some(label);
            self.bridge.state(label);
        }
    }
}

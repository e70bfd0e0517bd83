mod anim_bridge;
mod audio;
mod config;
mod controller;
mod dispatcher;
mod error;
mod net_link;
mod protocol;
mod state_machine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anim_bridge::{AnimationBridge, AvatarOutput};
use audio::{AudioConfig, AudioSystem, MonitorConfig};
use config::Config;
use controller::{CoreController, SessionConfig};
use mac_address::get_mac_address;
use net_link::{LinkConfig, LinkEvent, WsTransport};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

const CLIENT_ID_FILE: &str = "avatar_link_uuid.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载编译期配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;
    resolve_identity(&mut config);

    // 麦克风打不开是唯一的致命错误
    let (mut audio, player) = AudioSystem::start(AudioConfig::from(&config))?;
    let ring = audio.ring();

    let bridge = AnimationBridge::new(&config).await?;

    let running = Arc::new(AtomicBool::new(true));
    let (enqueuer, mut link_events) = dispatcher::channel::<LinkEvent>();
    let transport = WsTransport::new(config.server_url, &config.device_id, &config.client_id);
    let (client, worker) = net_link::link(transport, LinkConfig::from(&config), enqueuer, running.clone());
    let worker_handle = tokio::spawn(worker.run());

    let mut controller = CoreController::new(
        ring,
        MonitorConfig::from(&config),
        SessionConfig::from(&config),
        client,
        AvatarOutput::new(bridge, player),
    );

    log::info!(
        "{} {} started, server {}, capture mode {:?}",
        config.app_name,
        config.app_version,
        config.server_url,
        config.capture_mode
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
            tick = ticker.tick() => {
                let now = tick.into_std();
                link_events.drain(|event| controller.on_link_event(event, now));
                controller.tick(now);
            }
        }
    }

    // 停止网络线程，最多等待 shutdown_grace_ms，进行中的请求不会被取消
    running.store(false, Ordering::SeqCst);
    if !controller.state().is_idle() {
        log::info!("Leaving session mid-cycle ({})", controller.state());
    }
    drop(controller);
    let grace = Duration::from_millis(config.shutdown_grace_ms);
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        log::warn!("Network worker still busy after {:?}, leaving it behind", grace);
    }
    audio.stop();

    log::info!("Shutdown complete");
    Ok(())
}

/// device_id 为 unknown-device 时使用 MAC 地址；client_id 持久化在本地文件，
/// 以保持重启间身份一致
fn resolve_identity(config: &mut Config) {
    if config.device_id == "unknown-device" {
        config.device_id = match get_mac_address() {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            _ => Uuid::new_v4().to_string(),
        };
    }

    if config.client_id == "unknown-client" {
        if let Ok(content) = std::fs::read_to_string(CLIENT_ID_FILE) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                config.client_id = trimmed.to_string();
                log::info!("Loaded Client ID from {}: {}", CLIENT_ID_FILE, config.client_id);
            }
        }
    }

    if config.client_id == "unknown-client" {
        config.client_id = Uuid::new_v4().to_string();
        log::info!("Generated new Client ID: {}", config.client_id);
        if let Err(e) = std::fs::write(CLIENT_ID_FILE, &config.client_id) {
            log::warn!("Failed to save Client ID to {}: {}", CLIENT_ID_FILE, e);
        }
    }
}

use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    vad: Vad,
    session: Session,
    network: Network,
    animation: Animation,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    channels: u32,
    monitor_seconds: u32,
    playback_period_size: usize,
    playback_queue: usize,
}

#[derive(Deserialize)]
struct Vad {
    window_frames: usize,
    threshold: f32,
    floor_db: f32,
    ceiling_db: f32,
    epsilon: f32,
}

#[derive(Deserialize)]
struct Session {
    tick_ms: u64,
    capture_delay_ms: u64,
    snippet_seconds: f32,
    cooldown_ms: u64,
    capture_mode: String,
    payload_format: String,
    record_sentinel: String,
    listen_gesture: String,
    talk_gesture: String,
    idle_gesture: String,
}

#[derive(Deserialize)]
struct Network {
    server_url: String,
    reply_timeout_ms: u64,
    poll_interval_ms: u64,
    shutdown_grace_ms: u64,
    device_id: String,
    client_id: String,
}

#[derive(Deserialize)]
struct Animation {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_MONITOR_SECONDS={}", config.audio.monitor_seconds);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_QUEUE={}", config.audio.playback_queue);

    // VAD 配置
    println!("cargo:rustc-env=VAD_WINDOW_FRAMES={}", config.vad.window_frames);
    println!("cargo:rustc-env=VAD_THRESHOLD={}", config.vad.threshold);
    println!("cargo:rustc-env=VAD_FLOOR_DB={}", config.vad.floor_db);
    println!("cargo:rustc-env=VAD_CEILING_DB={}", config.vad.ceiling_db);
    println!("cargo:rustc-env=VAD_EPSILON={}", config.vad.epsilon);

    // 会话配置
    println!("cargo:rustc-env=SESSION_TICK_MS={}", config.session.tick_ms);
    println!("cargo:rustc-env=SESSION_CAPTURE_DELAY_MS={}", config.session.capture_delay_ms);
    println!("cargo:rustc-env=SESSION_SNIPPET_SECONDS={}", config.session.snippet_seconds);
    println!("cargo:rustc-env=SESSION_COOLDOWN_MS={}", config.session.cooldown_ms);
    println!("cargo:rustc-env=SESSION_CAPTURE_MODE={}", config.session.capture_mode);
    println!("cargo:rustc-env=SESSION_PAYLOAD_FORMAT={}", config.session.payload_format);
    println!("cargo:rustc-env=SESSION_RECORD_SENTINEL={}", config.session.record_sentinel);
    println!("cargo:rustc-env=SESSION_LISTEN_GESTURE={}", config.session.listen_gesture);
    println!("cargo:rustc-env=SESSION_TALK_GESTURE={}", config.session.talk_gesture);
    println!("cargo:rustc-env=SESSION_IDLE_GESTURE={}", config.session.idle_gesture);

    // 网络配置
    println!("cargo:rustc-env=NET_SERVER_URL={}", config.network.server_url);
    println!("cargo:rustc-env=NET_REPLY_TIMEOUT_MS={}", config.network.reply_timeout_ms);
    println!("cargo:rustc-env=NET_POLL_INTERVAL_MS={}", config.network.poll_interval_ms);
    println!("cargo:rustc-env=NET_SHUTDOWN_GRACE_MS={}", config.network.shutdown_grace_ms);
    println!("cargo:rustc-env=DEVICE_ID={}", config.network.device_id);
    println!("cargo:rustc-env=CLIENT_ID={}", config.network.client_id);

    // 动画渲染进程 UDP 配置
    println!("cargo:rustc-env=ANIM_LOCAL_IP={}", config.animation.local_ip);
    println!("cargo:rustc-env=ANIM_LOCAL_PORT={}", config.animation.local_port);
    println!("cargo:rustc-env=ANIM_REMOTE_IP={}", config.animation.remote_ip);
    println!("cargo:rustc-env=ANIM_REMOTE_PORT={}", config.animation.remote_port);
}

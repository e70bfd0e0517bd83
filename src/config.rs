use crate::audio::PayloadFormat;
use crate::state_machine::CaptureMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub monitor_seconds: u32,
    pub playback_period_size: usize,
    pub playback_queue: usize,

    // VAD 配置（线性幅度阈值 + dB 归一化区间）
    pub vad_window_frames: usize,
    pub vad_threshold: f32,
    pub vad_floor_db: f32,
    pub vad_ceiling_db: f32,
    pub vad_epsilon: f32,

    // 会话状态机配置
    pub tick_ms: u64,
    pub capture_delay_ms: u64,
    pub snippet_seconds: f32,
    pub cooldown_ms: u64,
    pub capture_mode: CaptureMode,
    pub payload_format: PayloadFormat,
    pub record_sentinel: &'static str,
    pub listen_gesture: &'static str,
    pub talk_gesture: &'static str,
    pub idle_gesture: &'static str,

    // 网络配置（静态部分）
    pub server_url: &'static str,
    pub reply_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,

    // 设备标识（动态部分，可在运行时修改）
    pub device_id: String,
    pub client_id: String,

    // 动画渲染进程配置
    pub anim_local_ip: &'static str,
    pub anim_local_port: u16,
    pub anim_remote_ip: &'static str,
    pub anim_remote_port: u16,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            monitor_seconds: env!("AUDIO_MONITOR_SECONDS").parse()
                .map_err(|_| "Failed to parse AUDIO_MONITOR_SECONDS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,
            playback_queue: env!("AUDIO_PLAYBACK_QUEUE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_QUEUE")?,

            vad_window_frames: env!("VAD_WINDOW_FRAMES").parse()
                .map_err(|_| "Failed to parse VAD_WINDOW_FRAMES")?,
            vad_threshold: env!("VAD_THRESHOLD").parse()
                .map_err(|_| "Failed to parse VAD_THRESHOLD")?,
            vad_floor_db: env!("VAD_FLOOR_DB").parse()
                .map_err(|_| "Failed to parse VAD_FLOOR_DB")?,
            vad_ceiling_db: env!("VAD_CEILING_DB").parse()
                .map_err(|_| "Failed to parse VAD_CEILING_DB")?,
            vad_epsilon: env!("VAD_EPSILON").parse()
                .map_err(|_| "Failed to parse VAD_EPSILON")?,

            tick_ms: env!("SESSION_TICK_MS").parse()
                .map_err(|_| "Failed to parse SESSION_TICK_MS")?,
            capture_delay_ms: env!("SESSION_CAPTURE_DELAY_MS").parse()
                .map_err(|_| "Failed to parse SESSION_CAPTURE_DELAY_MS")?,
            snippet_seconds: env!("SESSION_SNIPPET_SECONDS").parse()
                .map_err(|_| "Failed to parse SESSION_SNIPPET_SECONDS")?,
            cooldown_ms: env!("SESSION_COOLDOWN_MS").parse()
                .map_err(|_| "Failed to parse SESSION_COOLDOWN_MS")?,
            capture_mode: env!("SESSION_CAPTURE_MODE").parse()
                .map_err(|_| "Failed to parse SESSION_CAPTURE_MODE")?,
            payload_format: env!("SESSION_PAYLOAD_FORMAT").parse()
                .map_err(|_| "Failed to parse SESSION_PAYLOAD_FORMAT")?,
            record_sentinel: env!("SESSION_RECORD_SENTINEL"),
            listen_gesture: env!("SESSION_LISTEN_GESTURE"),
            talk_gesture: env!("SESSION_TALK_GESTURE"),
            idle_gesture: env!("SESSION_IDLE_GESTURE"),

            server_url: env!("NET_SERVER_URL"),
            reply_timeout_ms: env!("NET_REPLY_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse NET_REPLY_TIMEOUT_MS")?,
            poll_interval_ms: env!("NET_POLL_INTERVAL_MS").parse()
                .map_err(|_| "Failed to parse NET_POLL_INTERVAL_MS")?,
            shutdown_grace_ms: env!("NET_SHUTDOWN_GRACE_MS").parse()
                .map_err(|_| "Failed to parse NET_SHUTDOWN_GRACE_MS")?,

            // 设备标识初始化为config.toml中的值
            device_id: env!("DEVICE_ID").to_string(),
            client_id: env!("CLIENT_ID").to_string(),

            anim_local_ip: env!("ANIM_LOCAL_IP"),
            anim_local_port: env!("ANIM_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse ANIM_LOCAL_PORT")?,
            anim_remote_ip: env!("ANIM_REMOTE_IP"),
            anim_remote_port: env!("ANIM_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse ANIM_REMOTE_PORT")?,
        })
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{
    wav_codec, AudioMonitor, MonitorConfig, MonitorReading, PayloadFormat, RingBuffer, SampleBuffer,
    SnippetExtractor,
};
use crate::config::Config;
use crate::error::Result;
use crate::net_link::{LinkEvent, NetClient, Reply, RequestState};
use crate::protocol::{AudioRequest, OutboundFrame};
use crate::state_machine::{CaptureMode, ListenPhase, SessionState};

/// Where gestures and reply audio go.
pub trait AvatarSink {
    fn trigger(&mut self, gesture: &str);
    /// Start playing `clip` and return how long it will take.
    fn play(&mut self, clip: SampleBuffer) -> Duration;
    fn state_changed(&mut self, _state: &SessionState) {}
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture_delay: Duration,
    pub snippet_seconds: f32,
    pub cooldown: Duration,
    pub capture_mode: CaptureMode,
    pub payload_format: PayloadFormat,
    pub record_sentinel: String,
    pub listen_gesture: String,
    pub talk_gesture: String,
    pub idle_gesture: String,
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            capture_delay: Duration::from_millis(cfg.capture_delay_ms),
            snippet_seconds: cfg.snippet_seconds,
            cooldown: Duration::from_millis(cfg.cooldown_ms),
            capture_mode: cfg.capture_mode,
            payload_format: cfg.payload_format,
            record_sentinel: cfg.record_sentinel.to_string(),
            listen_gesture: cfg.listen_gesture.to_string(),
            talk_gesture: cfg.talk_gesture.to_string(),
            idle_gesture: cfg.idle_gesture.to_string(),
        }
    }
}

/// Drives one listen/talk cycle at a time from the control loop.
///
/// Nothing here blocks: the monitor and extractor read the ring buffer
/// directly, requests go through the [`NetClient`], and replies come back
/// through [`CoreController::on_link_event`] when the dispatcher is drained.
pub struct CoreController<S: AvatarSink> {
    state: SessionState,
    config: SessionConfig,
    ring: Arc<RingBuffer>,
    monitor: AudioMonitor,
    extractor: SnippetExtractor,
    net: NetClient,
    sink: S,
}

impl<S: AvatarSink> CoreController<S> {
    pub fn new(
        ring: Arc<RingBuffer>,
        monitor_config: MonitorConfig,
        config: SessionConfig,
        net: NetClient,
        sink: S,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            config,
            monitor: AudioMonitor::new(ring.clone(), monitor_config),
            extractor: SnippetExtractor::new(ring.clone()),
            ring,
            net,
            sink,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn tick(&mut self, now: Instant) {
        let reading = self.monitor.tick();
        if let MonitorReading::Ready(level) = reading {
            log::trace!("Input level {:.2} (amplitude {:.4})", level.level, level.amplitude);
        }

        match &self.state {
            SessionState::Idle => {
                // Voice only counts when nothing is pending on the link
                if reading.voice_present() && self.net.state() == RequestState::Idle {
                    self.sink.trigger(&self.config.listen_gesture);
                    self.set_state(SessionState::Listen(ListenPhase::Capturing { since: now }));
                }
            }
            SessionState::Listen(ListenPhase::Capturing { since }) => {
                if now.saturating_duration_since(*since) >= self.config.capture_delay {
                    self.dispatch_request();
                }
            }
            SessionState::Listen(ListenPhase::AwaitingReply { .. }) => {}
            SessionState::Talk { until } => {
                if now >= *until {
                    self.sink.trigger(&self.config.idle_gesture);
                    self.set_state(SessionState::Cooldown {
                        until: now + self.config.cooldown,
                    });
                }
            }
            SessionState::Cooldown { until } => {
                if now >= *until {
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    pub fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        let SessionState::Listen(ListenPhase::AwaitingReply { request_id: pending }) = &self.state else {
            log::warn!("Dropping link event while {}: {:?}", self.state, event);
            return;
        };

        let event_id = match &event {
            LinkEvent::Reply(reply) => reply.request_id.as_deref(),
            LinkEvent::Failed { request_id, .. } => request_id.as_deref(),
        };
        if let (Some(pending), Some(event_id)) = (pending.as_deref(), event_id) {
            if pending != event_id {
                // The link is already idle again, so nothing else will arrive
                log::warn!("Listening failed: got event for {} while waiting for {}", event_id, pending);
                self.return_to_idle();
                return;
            }
        }

        match event {
            LinkEvent::Reply(reply) => self.begin_talk(reply, now),
            LinkEvent::Failed { error, .. } => {
                log::warn!("Listening failed: {}", error);
                self.return_to_idle();
            }
        }
    }

    fn dispatch_request(&mut self) {
        let frame = match self.build_request() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Could not prepare request: {}", e);
                self.return_to_idle();
                return;
            }
        };

        let request_id = frame.request_id().map(str::to_owned);
        match self.net.send(frame) {
            Ok(()) => {
                log::info!("Request {:?} dispatched", request_id);
                self.set_state(SessionState::Listen(ListenPhase::AwaitingReply { request_id }));
            }
            Err(e) => {
                log::warn!("Listening failed: {}", e);
                self.return_to_idle();
            }
        }
    }

    fn build_request(&self) -> Result<OutboundFrame> {
        match self.config.capture_mode {
            CaptureMode::Remote => Ok(OutboundFrame::Sentinel(self.config.record_sentinel.clone())),
            CaptureMode::Local => {
                let snippet = self
                    .extractor
                    .extract(self.ring.cursor(), self.config.snippet_seconds)?;
                let envelope = wav_codec::encode(&snippet, self.config.payload_format);
                log::debug!(
                    "Snippet: {} frames, {} bytes as {}",
                    snippet.frames(),
                    envelope.payload.len(),
                    envelope.format
                );
                Ok(OutboundFrame::Audio(AudioRequest::new(&envelope)))
            }
        }
    }

    fn begin_talk(&mut self, reply: Reply, now: Instant) {
        if let Some(status) = &reply.status {
            log::debug!("Server state: {}", status);
        }

        let Some(envelope) = reply.audio.filter(|a| !a.payload.is_empty()) else {
            log::info!("Reply carried no audio");
            self.return_to_idle();
            return;
        };

        let clip = match wav_codec::decode(&envelope) {
            Ok(clip) if !clip.is_empty() => clip,
            Ok(_) => {
                log::info!("Reply audio is empty");
                self.return_to_idle();
                return;
            }
            Err(e) => {
                log::warn!("Cannot decode reply audio: {}", e);
                self.return_to_idle();
                return;
            }
        };

        let gesture = reply.gesture.as_deref().unwrap_or(&self.config.talk_gesture);
        self.sink.trigger(gesture);
        let hold = self.sink.play(clip);
        self.set_state(SessionState::Talk { until: now + hold });
    }

    fn return_to_idle(&mut self) {
        self.sink.trigger(&self.config.idle_gesture);
        self.set_state(SessionState::Idle);
    }

    fn set_state(&mut self, next: SessionState) {
        if std::mem::discriminant(&self.state) != std::mem::discriminant(&next) {
            log::info!("Session {} -> {}", self.state, next);
        }
        self.state = next;
        self.sink.state_changed(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEnvelope;
    use crate::error::Error;
    use crate::net_link::DetachedWorker;
    use bytes::Bytes;

    const RATE: u32 = 1_000;

    #[derive(Default)]
    struct RecordingSink {
        gestures: Vec<String>,
        played: Vec<SampleBuffer>,
        states: Vec<&'static str>,
    }

    impl AvatarSink for RecordingSink {
        fn trigger(&mut self, gesture: &str) {
            self.gestures.push(gesture.to_string());
        }

        fn play(&mut self, clip: SampleBuffer) -> Duration {
            let duration = clip.duration();
            self.played.push(clip);
            duration
        }

        fn state_changed(&mut self, state: &SessionState) {
            self.states.push(state.label());
        }
    }

    struct Rig {
        ctrl: CoreController<RecordingSink>,
        worker: DetachedWorker,
        ring: Arc<RingBuffer>,
        t0: Instant,
    }

    fn session(mode: CaptureMode) -> SessionConfig {
        SessionConfig {
            capture_delay: Duration::from_millis(100),
            snippet_seconds: 0.1,
            cooldown: Duration::from_millis(50),
            capture_mode: mode,
            payload_format: PayloadFormat::Wav,
            record_sentinel: "record".into(),
            listen_gesture: "Listen".into(),
            talk_gesture: "Talk".into(),
            idle_gesture: "Idle".into(),
        }
    }

    fn rig_with(config: SessionConfig) -> Rig {
        let ring = Arc::new(RingBuffer::with_capacity(1_000, RATE, 1));
        let monitor = MonitorConfig {
            window_frames: 100,
            ..MonitorConfig::default()
        };
        let (client, worker) = DetachedWorker::pair();
        let ctrl = CoreController::new(ring.clone(), monitor, config, client, RecordingSink::default());
        Rig {
            ctrl,
            worker,
            ring,
            t0: Instant::now(),
        }
    }

    fn rig() -> Rig {
        rig_with(session(CaptureMode::Local))
    }

    impl Rig {
        fn speak(&self) {
            self.ring.push(&[0.5; 200]);
        }

        fn hush(&self) {
            self.ring.push(&[0.0; 200]);
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        /// Voice at t0, request sent at t0 + 100ms. Returns its id.
        fn listen_and_send(&mut self) -> Option<String> {
            self.speak();
            self.ctrl.tick(self.at(0));
            self.ctrl.tick(self.at(100));
            let frame = self.worker.take().expect("request should be sent");
            frame.request_id().map(str::to_owned)
        }

        fn reply(&mut self, request_id: Option<String>, audio: Option<AudioEnvelope>, now: Instant) {
            self.worker.finish();
            let reply = Reply {
                request_id,
                gesture: Some("Wave".into()),
                status: None,
                audio,
            };
            self.ctrl.on_link_event(LinkEvent::Reply(reply), now);
        }

        fn fail(&mut self, error: Error, now: Instant) {
            self.worker.finish();
            self.ctrl.on_link_event(LinkEvent::Failed { request_id: None, error }, now);
        }
    }

    fn half_second_clip() -> AudioEnvelope {
        let clip = SampleBuffer::new(vec![0.2; 500], 1, RATE).unwrap();
        wav_codec::encode(&clip, PayloadFormat::Wav)
    }

    #[test]
    fn full_cycle_runs_exactly_once() {
        let mut r = rig();
        r.speak();
        r.ctrl.tick(r.at(0));
        assert!(matches!(r.ctrl.state(), SessionState::Listen(ListenPhase::Capturing { .. })));

        r.ctrl.tick(r.at(50));
        assert!(r.worker.take().is_none(), "capture delay not yet elapsed");

        r.ctrl.tick(r.at(100));
        let frame = r.worker.take().expect("request");
        let OutboundFrame::Audio(request) = &frame else {
            panic!("local mode sends audio");
        };
        assert_eq!(request.channels, 1);
        assert_eq!(request.sample_rate, RATE);
        r.hush();

        r.reply(Some(request.request_id.clone()), Some(half_second_clip()), r.at(200));
        assert!(matches!(r.ctrl.state(), SessionState::Talk { .. }));
        assert_eq!(r.ctrl.sink.played.len(), 1);
        assert_eq!(r.ctrl.sink.played[0].frames(), 500);

        r.ctrl.tick(r.at(699));
        assert!(matches!(r.ctrl.state(), SessionState::Talk { .. }));
        r.ctrl.tick(r.at(700));
        assert!(matches!(r.ctrl.state(), SessionState::Cooldown { .. }));
        r.ctrl.tick(r.at(750));
        assert!(r.ctrl.state().is_idle());

        for ms in [800, 900, 1_000] {
            r.ctrl.tick(r.at(ms));
        }
        assert!(r.ctrl.state().is_idle());
        assert_eq!(r.ctrl.sink.gestures, vec!["Listen", "Wave", "Idle"]);
        assert_eq!(
            r.ctrl.sink.states,
            vec!["listen", "listen", "talk", "cooldown", "idle"]
        );
        assert!(r.worker.take().is_none());
    }

    #[test]
    fn voice_is_ignored_outside_idle() {
        let mut r = rig();
        let id = r.listen_and_send();
        for ms in [120, 140, 160] {
            r.speak();
            r.ctrl.tick(r.at(ms));
        }
        r.reply(id, Some(half_second_clip()), r.at(200));
        r.speak();
        r.ctrl.tick(r.at(300));
        r.ctrl.tick(r.at(700));
        r.speak();
        r.ctrl.tick(r.at(720));

        assert_eq!(r.ctrl.sink.gestures.iter().filter(|g| *g == "Listen").count(), 1);
        assert!(r.worker.take().is_none());
    }

    #[test]
    fn zero_cooldown_reaches_idle_on_next_tick() {
        let mut r = rig_with(SessionConfig {
            cooldown: Duration::ZERO,
            ..session(CaptureMode::Local)
        });
        let id = r.listen_and_send();
        r.hush();
        r.reply(id, Some(half_second_clip()), r.at(100));
        r.ctrl.tick(r.at(600));
        assert!(matches!(r.ctrl.state(), SessionState::Cooldown { .. }));
        r.ctrl.tick(r.at(616));
        assert!(r.ctrl.state().is_idle());
    }

    #[test]
    fn timeout_returns_to_idle_and_next_send_is_accepted() {
        let mut r = rig();
        r.listen_and_send();
        r.fail(Error::RequestTimeout(Duration::from_secs(20)), r.at(20_100));
        assert!(r.ctrl.state().is_idle());
        assert_eq!(r.ctrl.net.state(), RequestState::Idle);
        assert_eq!(r.ctrl.sink.gestures, vec!["Listen", "Idle"]);

        r.speak();
        r.ctrl.tick(r.at(20_200));
        r.ctrl.tick(r.at(20_300));
        assert!(r.worker.take().is_some());
        assert!(matches!(
            r.ctrl.state(),
            SessionState::Listen(ListenPhase::AwaitingReply { .. })
        ));
    }

    #[test]
    fn transport_failure_returns_to_idle() {
        let mut r = rig();
        r.listen_and_send();
        r.fail(Error::TransportUnreachable("refused".into()), r.at(150));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.played.is_empty());
    }

    #[test]
    fn reply_without_audio_returns_to_idle() {
        let mut r = rig();
        let id = r.listen_and_send();
        r.reply(id, None, r.at(150));
        assert!(r.ctrl.state().is_idle());
        assert_eq!(r.ctrl.sink.gestures, vec!["Listen", "Idle"]);
    }

    #[test]
    fn empty_payload_returns_to_idle() {
        let mut r = rig();
        let id = r.listen_and_send();
        let empty = AudioEnvelope {
            channels: 1,
            sample_rate: RATE,
            format: PayloadFormat::Wav,
            payload: Bytes::new(),
        };
        r.reply(id, Some(empty), r.at(150));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.played.is_empty());
    }

    #[test]
    fn undecodable_audio_returns_to_idle() {
        let mut r = rig();
        let id = r.listen_and_send();
        let garbage = AudioEnvelope {
            channels: 1,
            sample_rate: RATE,
            format: PayloadFormat::Wav,
            payload: Bytes::from_static(b"definitely not a wav file"),
        };
        r.reply(id, Some(garbage), r.at(150));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.played.is_empty());
    }

    #[test]
    fn reply_for_another_request_ends_the_cycle() {
        let mut r = rig();
        r.listen_and_send();
        r.hush();
        r.reply(Some("someone-else".into()), Some(half_second_clip()), r.at(150));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.played.is_empty());
        assert_eq!(r.ctrl.sink.gestures, vec!["Listen", "Idle"]);

        r.speak();
        r.ctrl.tick(r.at(200));
        r.ctrl.tick(r.at(300));
        assert!(r.worker.take().is_some(), "next cycle can send again");
    }

    #[test]
    fn event_while_idle_is_dropped() {
        let mut r = rig();
        r.reply(None, Some(half_second_clip()), r.at(0));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.gestures.is_empty());
    }

    #[test]
    fn server_gesture_falls_back_to_talk_gesture() {
        let mut r = rig();
        let id = r.listen_and_send();
        r.worker.finish();
        let reply = Reply {
            request_id: id,
            gesture: None,
            status: Some("Talk".into()),
            audio: Some(half_second_clip()),
        };
        r.ctrl.on_link_event(LinkEvent::Reply(reply), r.at(150));
        assert_eq!(r.ctrl.sink.gestures, vec!["Listen", "Talk"]);
    }

    #[test]
    fn remote_mode_sends_sentinel() {
        let mut r = rig_with(session(CaptureMode::Remote));
        r.speak();
        r.ctrl.tick(r.at(0));
        r.ctrl.tick(r.at(100));
        match r.worker.take() {
            Some(OutboundFrame::Sentinel(text)) => assert_eq!(text, "record"),
            other => panic!("expected sentinel, got {:?}", other),
        }
        assert_eq!(
            r.ctrl.state(),
            &SessionState::Listen(ListenPhase::AwaitingReply { request_id: None })
        );
    }

    #[test]
    fn oversized_snippet_returns_to_idle() {
        let mut r = rig_with(SessionConfig {
            snippet_seconds: 5.0,
            ..session(CaptureMode::Local)
        });
        r.speak();
        r.ctrl.tick(r.at(0));
        r.ctrl.tick(r.at(100));
        assert!(r.worker.take().is_none());
        assert!(r.ctrl.state().is_idle());
    }

    #[test]
    fn busy_link_blocks_new_listen() {
        let mut r = rig();
        r.ctrl.net.send(OutboundFrame::Sentinel("record".into())).unwrap();
        r.speak();
        r.ctrl.tick(r.at(0));
        assert!(r.ctrl.state().is_idle());
        assert!(r.ctrl.sink.gestures.is_empty());
    }

    #[test]
    fn no_listen_before_monitor_is_ready() {
        let mut r = rig();
        r.ring.push(&[0.9; 50]);
        r.ctrl.tick(r.at(0));
        assert!(r.ctrl.state().is_idle());
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Session state, owned by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listen(ListenPhase),
    /// Reply audio is playing until `until`
    Talk { until: Instant },
    /// Detection stays disarmed until `until`
    Cooldown { until: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenPhase {
    /// Capture delay running since `since`
    Capturing { since: Instant },
    /// Request handed to the network worker
    AwaitingReply { request_id: Option<String> },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listen(_) => "listen",
            SessionState::Talk { .. } => "talk",
            SessionState::Cooldown { .. } => "cooldown",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the utterance is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Extract a snippet from the local ring buffer and send it
    #[default]
    Local,
    /// Send the record sentinel; the server captures on its side
    Remote,
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(CaptureMode::Local),
            "remote" => Ok(CaptureMode::Remote),
            other => Err(format!("unknown capture mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let now = Instant::now();
        assert_eq!(SessionState::Idle.label(), "idle");
        assert_eq!(SessionState::Listen(ListenPhase::Capturing { since: now }).label(), "listen");
        assert_eq!(SessionState::Talk { until: now }.to_string(), "talk");
        assert_eq!(SessionState::Cooldown { until: now }.label(), "cooldown");
    }

    #[test]
    fn capture_mode_parses() {
        assert_eq!("Local".parse::<CaptureMode>().unwrap(), CaptureMode::Local);
        assert_eq!(" remote ".parse::<CaptureMode>().unwrap(), CaptureMode::Remote);
        assert!("stream".parse::<CaptureMode>().is_err());
    }
}

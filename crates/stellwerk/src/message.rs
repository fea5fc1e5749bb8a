use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control tokens carried on run-control channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlSignal {
    Stop,
    EndStream,
    Error,
}

impl ControlSignal {
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::EndStream => "END_STREAM",
            Self::Error => "ERROR",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "STOP" => Some(Self::Stop),
            "END_STREAM" => Some(Self::EndStream),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Wire-format frame for control-plane messages.
///
/// Frames are serialized with MessagePack for compact transport. The
/// `channel` field drives PUB/SUB routing; `origin` names the publishing
/// server instance for tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Routing channel (e.g. "agent_run:{run_id}:control").
    pub channel: String,
    /// The control token.
    pub signal: ControlSignal,
    /// Instance id of the publisher.
    pub origin: String,
    /// When this frame was created.
    pub timestamp: DateTime<Utc>,
}

impl ControlFrame {
    pub fn new(
        channel: impl Into<String>,
        signal: ControlSignal,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            signal,
            origin: origin.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize this frame to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a frame from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Global control channel for a run, observed by every instance.
pub fn global_channel(run_id: &str) -> String {
    format!("agent_run:{run_id}:control")
}

/// Instance-specific control channel for a run.
pub fn instance_channel(run_id: &str, instance_id: &str) -> String {
    format!("agent_run:{run_id}:control:{instance_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_tokens_roundtrip() {
        for signal in [ControlSignal::Stop, ControlSignal::EndStream, ControlSignal::Error] {
            assert_eq!(ControlSignal::from_token(signal.as_token()), Some(signal));
        }
        assert_eq!(ControlSignal::from_token("HALT"), None);
    }

    #[test]
    fn frame_roundtrips_through_bytes() {
        let frame = ControlFrame::new(global_channel("run-1"), ControlSignal::Stop, "inst-a");
        let bytes = frame.to_bytes().unwrap();
        let decoded = ControlFrame::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.channel, "agent_run:run-1:control");
        assert_eq!(decoded.signal, ControlSignal::Stop);
        assert_eq!(decoded.origin, "inst-a");
    }

    #[test]
    fn channel_names() {
        assert_eq!(global_channel("r"), "agent_run:r:control");
        assert_eq!(instance_channel("r", "i"), "agent_run:r:control:i");
    }
}

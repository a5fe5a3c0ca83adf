//! `<channel>:<json>` frame codec.
//!
//! One websocket carries several logical channels. Each text frame is the
//! channel name, a colon, and a JSON message. A relay reads exactly one
//! broadcast channel and writes control traffic to exactly one control
//! channel; both are fixed by its [`ChannelBinding`].

use std::fmt;

use serde::Serialize;

use super::message::Message;

/// Default lag tolerance passed to the server when none is configured.
pub const DEFAULT_LAG_TOLERANCE: f64 = 0.1;

/// The channels a relay instance is bound to. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    broadcast: String,
    control: String,
    lag_tolerance: f64,
}

impl ChannelBinding {
    /// Bind a broadcast (inbound) and control (outbound) channel with the
    /// default lag tolerance.
    pub fn new(broadcast: impl Into<String>, control: impl Into<String>) -> Self {
        Self {
            broadcast: broadcast.into(),
            control: control.into(),
            lag_tolerance: DEFAULT_LAG_TOLERANCE,
        }
    }

    /// Override the lag tolerance hint.
    #[must_use]
    pub fn with_lag_tolerance(mut self, tolerance: f64) -> Self {
        self.lag_tolerance = tolerance;
        self
    }

    /// Inbound channel name.
    pub fn broadcast(&self) -> &str {
        &self.broadcast
    }

    /// Outbound control channel name.
    pub fn control(&self) -> &str {
        &self.control
    }

    /// Lag tolerance hint sent at connect time.
    pub fn lag_tolerance(&self) -> f64 {
        self.lag_tolerance
    }

    /// Encode a message for the control channel.
    pub fn encode_control<T: Serialize + ?Sized>(&self, message: &T) -> Result<String, FrameError> {
        encode(&self.control, message)
    }

    /// Encode a message for the broadcast channel.
    pub fn encode_broadcast<T: Serialize + ?Sized>(
        &self,
        message: &T,
    ) -> Result<String, FrameError> {
        encode(&self.broadcast, message)
    }

    /// Decode an inbound frame. Only frames on the broadcast channel are
    /// accepted.
    pub fn decode(&self, raw: &str) -> Result<Message, FrameError> {
        decode(&self.broadcast, raw)
    }
}

/// Why a frame could not be turned into a message (or a message into a
/// typed payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is not prefixed with `<expected>:`.
    WrongChannel {
        /// Channel the relay is bound to.
        expected: String,
    },
    /// Body after the channel marker is not a JSON object with a `type`.
    Malformed(String),
    /// Message could not be serialized, or did not match a typed view.
    Payload {
        /// Message type involved.
        kind: String,
        /// Serializer/deserializer error text.
        reason: String,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongChannel { expected } => {
                write!(f, "Message was not on channel {expected}")
            }
            Self::Malformed(reason) => write!(f, "Malformed frame body: {reason}"),
            Self::Payload { kind, reason } => {
                write!(f, "Payload mismatch for '{kind}': {reason}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode `message` as `<channel>:<json>`.
pub fn encode<T: Serialize + ?Sized>(channel: &str, message: &T) -> Result<String, FrameError> {
    let body = serde_json::to_string(message).map_err(|e| FrameError::Payload {
        kind: String::from("<outbound>"),
        reason: e.to_string(),
    })?;
    Ok(format!("{channel}:{body}"))
}

/// Decode a raw frame expected on `channel`.
pub fn decode(channel: &str, raw: &str) -> Result<Message, FrameError> {
    let body = raw
        .strip_prefix(channel)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| FrameError::WrongChannel {
            expected: channel.to_string(),
        })?;
    serde_json::from_str(body).map_err(|e| FrameError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::message::{kind, ChangeOfTurn};
    use serde_json::json;

    fn binding() -> ChannelBinding {
        ChannelBinding::new("memoryexpt2", "memoryexpt2_ctrl")
    }

    #[test]
    fn test_binding_defaults_tolerance() {
        assert!((binding().lag_tolerance() - 0.1).abs() < f64::EPSILON);
        let tuned = binding().with_lag_tolerance(0.001);
        assert!((tuned.lag_tolerance() - 0.001).abs() < f64::EPSILON);
    }

    #[test]
    fn test_encode_control_frame_exact() {
        let binding = ChannelBinding::new("room", "ctrl");
        let msg = Message::new(kind::CONNECT).with("player_id", "7");
        assert_eq!(
            binding.encode_control(&msg).unwrap(),
            r#"ctrl:{"type":"connect","player_id":"7"}"#
        );
    }

    #[test]
    fn test_encode_broadcast_uses_broadcast_channel() {
        let msg = Message::new(kind::WORD_ADDED).with("word", "apple");
        let frame = binding().encode_broadcast(&msg).unwrap();
        assert!(frame.starts_with("memoryexpt2:{"));
    }

    #[test]
    fn test_decode_change_of_turn_frame() {
        let raw = r#"memoryexpt2:{"type":"change_of_turn","player_id":"7","turn_seconds":10}"#;
        let msg = binding().decode(raw).unwrap();
        assert_eq!(msg.kind, "change_of_turn");
        assert_eq!(msg.get("player_id"), Some(&json!("7")));
        assert_eq!(msg.get("turn_seconds"), Some(&json!(10)));
        let typed: ChangeOfTurn = msg.parse().unwrap();
        assert_eq!(typed.turn_seconds, 10);
    }

    #[test]
    fn test_decode_rejects_other_channel() {
        let err = binding()
            .decode(r#"other_channel:{"type":"change_of_turn"}"#)
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::WrongChannel {
                expected: "memoryexpt2".into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_control_channel_echo() {
        // The control channel name shares the broadcast name as a prefix.
        let result = binding().decode(r#"memoryexpt2_ctrl:{"type":"connect"}"#);
        assert!(matches!(result, Err(FrameError::WrongChannel { .. })));
    }

    #[test]
    fn test_decode_rejects_missing_colon() {
        let result = binding().decode(r#"memoryexpt2{"type":"connect"}"#);
        assert!(matches!(result, Err(FrameError::WrongChannel { .. })));
    }

    #[test]
    fn test_decode_malformed_json() {
        let result = binding().decode("memoryexpt2:{not json");
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_decode_object_without_type_is_malformed() {
        let result = binding().decode(r#"memoryexpt2:{"player_id":"7"}"#);
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_broadcast_frame_decodes_to_same_message() {
        let messages = [
            Message::new(kind::SKIP_TURN),
            Message::new(kind::DISCONNECT)
                .with("player_id", "7")
                .with("words", json!(["apple", "pear"])),
            Message::new("custom")
                .with("nested", json!({"a": [1, 2, {"b": null}]}))
                .with("colon", "a:b:c"),
            Message::new("a").with("type", "b").with("word", "fig"),
        ];
        let binding = binding();
        for msg in messages {
            let frame = binding.encode_broadcast(&msg).unwrap();
            assert_eq!(binding.decode(&frame).unwrap(), msg);
        }
    }
}

//! Relay messages.
//!
//! Every frame body is a JSON object with a string `type` field; the rest of
//! the object is a payload whose shape is agreed between sender and
//! subscriber. [`Message`] keeps the payload untyped. The structs in this
//! module are typed views over the vocabulary the experiment server and
//! clients exchange, convertible to and from [`Message`].

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::codec::FrameError;

/// Message type names observed on the wire.
pub mod kind {
    /// A participant announces itself after the socket opens.
    pub const CONNECT: &str = "connect";
    /// The server announces whose turn it is.
    pub const CHANGE_OF_TURN: &str = "change_of_turn";
    /// A participant submitted a candidate word.
    pub const WORD_ADDED: &str = "word_added";
    /// Older name for [`WORD_ADDED`].
    pub const NEW_WORD: &str = "new_word";
    /// The server fans a submitted word out to its recipients.
    pub const WORD_TRANSMITTED: &str = "word_transmitted";
    /// A participant passes on its turn.
    pub const SKIP_TURN: &str = "skip_turn";
    /// A participant leaves, reporting the words it recalled.
    pub const DISCONNECT: &str = "disconnect";
}

/// A relay message: `{"type": ..., ...payload}`.
///
/// `type` is always written once, from `kind`; a `type` key that ends up in
/// `payload` is not serialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    /// Message type used for dispatch.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining fields, in the order they were written.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Create a message with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field. A `type` key replaces the message type instead.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == "type" {
            self.kind = match value {
                Value::String(kind) => kind,
                other => other.to_string(),
            };
        } else {
            self.payload.insert(key, value);
        }
        self
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a payload field as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Interpret the whole message as a typed view.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let value = serde_json::to_value(self).map_err(|e| FrameError::Payload {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_value(value).map_err(|e| FrameError::Payload {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    /// Build a message from any serializable object carrying a `type` field.
    pub fn from_typed<T: Serialize>(typed: &T) -> Result<Self, FrameError> {
        serde_json::to_value(typed)
            .and_then(serde_json::from_value)
            .map_err(|e| FrameError::Payload {
                kind: String::from("<outbound>"),
                reason: e.to_string(),
            })
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind)?;
        for (key, value) in self.payload.iter().filter(|(key, _)| *key != "type") {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Implements `From<$ty> for Message` for a typed view whose serialized form
/// carries its own `type` tag.
macro_rules! into_message {
    ($ty:ty) => {
        impl From<$ty> for Message {
            fn from(typed: $ty) -> Self {
                let mut payload = match serde_json::to_value(&typed) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let kind = match payload.shift_remove("type") {
                    Some(Value::String(kind)) => kind,
                    _ => String::new(),
                };
                Self { kind, payload }
            }
        }
    };
}

/// `connect`: a participant joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "connect")]
pub struct Connect {
    /// Participant id.
    pub player_id: String,
}

/// `change_of_turn`: the server hands the turn to `player_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "change_of_turn")]
pub struct ChangeOfTurn {
    /// Participant whose turn it now is.
    #[serde(deserialize_with = "id_string")]
    pub player_id: String,
    /// Length of the turn in seconds.
    pub turn_seconds: u64,
}

/// `word_added`: a participant submitted a word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "word_added")]
pub struct WordAdded {
    /// The normalised word.
    pub word: String,
    /// Participant that submitted it.
    pub author: String,
}

/// `word_transmitted`: a submitted word fanned out to `recipients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "word_transmitted")]
pub struct WordTransmitted {
    /// The transmitted word.
    pub word: String,
    /// Participant that submitted it.
    #[serde(deserialize_with = "id_string")]
    pub author: String,
    /// Participants that received it.
    ///
    /// The server encodes this as a string holding a JSON array; a plain
    /// array is accepted as well.
    #[serde(deserialize_with = "recipient_list")]
    pub recipients: Vec<String>,
}

/// `skip_turn`: the current player passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "skip_turn")]
pub struct SkipTurn {}

/// `disconnect`: a participant leaves with its recalled words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "disconnect")]
pub struct Disconnect {
    /// Participant id.
    pub player_id: String,
    /// Words the participant recalled, in submission order.
    #[serde(default)]
    pub words: Vec<String>,
}

into_message!(Connect);
into_message!(ChangeOfTurn);
into_message!(WordAdded);
into_message!(WordTransmitted);
into_message!(SkipTurn);
into_message!(Disconnect);

/// Participant ids are strings, but some senders emit bare numbers.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected participant id, got {other}"
        ))),
    }
}

fn recipient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = match Value::deserialize(deserializer)? {
        Value::String(encoded) => {
            serde_json::from_str::<Value>(&encoded).map_err(serde::de::Error::custom)?
        }
        other => other,
    };
    let Value::Array(items) = value else {
        return Err(serde::de::Error::custom("recipients must be a list"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "unexpected recipient {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_type_first() {
        let msg = Message::new(kind::CONNECT).with("player_id", "7");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"connect","player_id":"7"}"#
        );
    }

    #[test]
    fn test_with_type_key_sets_kind() {
        let msg = Message::new("a").with("type", "b").with("word", "fig");
        assert_eq!(msg.kind, "b");
        assert!(msg.get("type").is_none());
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"b","word":"fig"}"#
        );
    }

    #[test]
    fn test_type_in_payload_is_written_once() {
        let mut msg = Message::new("a");
        msg.payload.insert("type".into(), json!("b"));
        msg.payload.insert("n".into(), json!(1));
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"type":"a","n":1}"#);
    }

    #[test]
    fn test_decoded_type_stays_out_of_payload() {
        let msg: Message = serde_json::from_str(r#"{"type":"skip_turn","n":1}"#).unwrap();
        assert_eq!(msg.kind, "skip_turn");
        assert!(msg.get("type").is_none());
        assert_eq!(msg.get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_message_requires_type() {
        let result = serde_json::from_str::<Message>(r#"{"player_id":"7"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_typed_view_into_message() {
        let msg: Message = ChangeOfTurn {
            player_id: "7".into(),
            turn_seconds: 10,
        }
        .into();
        assert_eq!(msg.kind, "change_of_turn");
        assert_eq!(msg.get_str("player_id"), Some("7"));
        assert_eq!(msg.get("turn_seconds"), Some(&json!(10)));
        assert!(msg.get("type").is_none());
    }

    #[test]
    fn test_skip_turn_has_empty_payload() {
        let msg: Message = SkipTurn {}.into();
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"skip_turn"}"#
        );
    }

    #[test]
    fn test_parse_change_of_turn_accepts_numeric_id() {
        let msg: Message = serde_json::from_value(json!({
            "type": "change_of_turn",
            "player_id": 3,
            "turn_seconds": 5
        }))
        .unwrap();
        let turn: ChangeOfTurn = msg.parse().unwrap();
        assert_eq!(turn.player_id, "3");
        assert_eq!(turn.turn_seconds, 5);
    }

    #[test]
    fn test_parse_word_transmitted_with_encoded_recipients() {
        let msg: Message = serde_json::from_value(json!({
            "type": "word_transmitted",
            "word": "apple",
            "author": "2",
            "recipients": "[\"2\", \"5\"]"
        }))
        .unwrap();
        let word: WordTransmitted = msg.parse().unwrap();
        assert_eq!(word.recipients, vec!["2".to_string(), "5".to_string()]);
    }

    #[test]
    fn test_parse_word_transmitted_with_plain_recipients() {
        let msg: Message = serde_json::from_value(json!({
            "type": "word_transmitted",
            "word": "apple",
            "author": "2",
            "recipients": [2, "9"]
        }))
        .unwrap();
        let word: WordTransmitted = msg.parse().unwrap();
        assert_eq!(word.recipients, vec!["2".to_string(), "9".to_string()]);
    }

    #[test]
    fn test_parse_wrong_shape_is_payload_error() {
        let msg = Message::new(kind::CHANGE_OF_TURN).with("player_id", "7");
        let err = msg.parse::<ChangeOfTurn>().unwrap_err();
        assert!(matches!(err, FrameError::Payload { .. }));
    }

    #[test]
    fn test_from_typed_round_trips_disconnect() {
        let leave = Disconnect {
            player_id: "7".into(),
            words: vec!["pear".into(), "plum".into()],
        };
        let msg = Message::from_typed(&leave).unwrap();
        assert_eq!(msg, Message::from(leave.clone()));
        assert_eq!(msg.parse::<Disconnect>().unwrap(), leave);
    }
}

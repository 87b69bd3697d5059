use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::Result;
use crate::types::{MessageKind, ResultPayload, Sender};

/// One entry in a conversation.
///
/// Messages are immutable once appended except through [`Message::merge`],
/// which the reducer uses to apply an update to an existing id in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique within a conversation.
    pub id: String,

    pub sender: Sender,

    /// Rendering and merge policy.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    /// Display text, or a serialized [`ResultPayload`] for result messages.
    pub content: String,

    /// Creation time; preserved across merges.
    #[serde(with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,

    /// Payload fields without a dedicated slot, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Creates a new message with no extra fields.
    pub fn new(
        id: impl Into<String>,
        sender: Sender,
        kind: MessageKind,
        content: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            sender,
            kind,
            content: content.into(),
            timestamp,
            extra: Map::new(),
        }
    }

    /// Creates a plain user message.
    pub fn user(id: impl Into<String>, content: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self::new(id, Sender::User, MessageKind::Plain, content, timestamp)
    }

    /// Creates a plain bot message.
    pub fn bot(id: impl Into<String>, content: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self::new(id, Sender::Bot, MessageKind::Plain, content, timestamp)
    }

    /// Sets the kind.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns true for thinking fragments.
    pub fn is_thinking(&self) -> bool {
        self.kind.is_thinking()
    }

    /// Parses the structured payload of a result message.
    ///
    /// Returns `None` for every other kind.
    pub fn result_payload(&self) -> Option<Result<ResultPayload>> {
        if self.kind != MessageKind::Result {
            return None;
        }
        Some(serde_json::from_str(&self.content).map_err(Into::into))
    }

    /// Applies `update` on top of this message.
    ///
    /// Sender, kind and content are taken from the update.  The id and the
    /// original timestamp are kept, and extra fields absent from the update
    /// survive.
    pub fn merge(&mut self, update: Message) {
        self.sender = update.sender;
        self.kind = update.kind;
        self.content = update.content;
        for (key, value) in update.extra {
            self.extra.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const AT: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    #[test]
    fn serializes_kind_as_type() {
        let msg = Message::bot("1_bot", "hello", AT).with_kind(MessageKind::Operator);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "1_bot",
                "sender": "bot",
                "type": "operator",
                "content": "hello",
                "timestamp": "2024-05-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn merge_keeps_timestamp_and_extra() {
        let mut msg = Message::bot("1_bot", "step1", AT).with_kind(MessageKind::Thinking);
        msg.extra.insert("explanation".to_string(), json!("kept"));

        let mut update = Message::bot("1_bot", "step1\nstep2", datetime!(2030-01-01 0:00 UTC))
            .with_kind(MessageKind::Thinking);
        update.extra.insert("status".to_string(), json!("success"));
        msg.merge(update);

        assert_eq!(msg.content, "step1\nstep2");
        assert_eq!(msg.timestamp, AT);
        assert_eq!(msg.extra.get("explanation"), Some(&json!("kept")));
        assert_eq!(msg.extra.get("status"), Some(&json!("success")));
    }

    #[test]
    fn result_payload_only_for_results() {
        let plain = Message::bot("1", "{}", AT);
        assert!(plain.result_payload().is_none());

        let result = Message::bot("2", r#"{"status":"error","message":"no table"}"#, AT)
            .with_kind(MessageKind::Result);
        let payload = result.result_payload().unwrap().unwrap();
        assert!(payload.is_error());

        let broken = Message::bot("3", "not json", AT).with_kind(MessageKind::Result);
        assert!(broken.result_payload().unwrap().is_err());
    }
}

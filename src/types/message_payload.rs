use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::ids::IdSource;
use crate::types::{Message, MessageKind, Sender};

/// A message as the server sent it: every field but the body is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,

    #[serde(
        default,
        deserialize_with = "crate::utils::time::deserialize_lenient",
        skip_serializing
    )]
    pub timestamp: Option<OffsetDateTime>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagePayload {
    /// Fills in whatever the server left out.
    ///
    /// Missing ids are minted from `ids`, a missing sender is the bot, a
    /// missing kind is plain, and a missing timestamp is `now`.
    pub fn into_message(self, ids: &mut IdSource, now: OffsetDateTime) -> Message {
        let sender = self.sender.unwrap_or(Sender::Bot);
        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => ids.mint(sender, now),
        };
        Message {
            id,
            sender,
            kind: self.kind.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or(now),
            extra: self.extra,
        }
    }
}

/// Accepts string or numeric ids; anything else is treated as missing.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

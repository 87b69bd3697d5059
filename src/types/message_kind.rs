use serde::{Deserialize, Serialize};

/// How a message is rendered and merged.
///
/// On the wire this is the `type` field of a message payload.  Absent or
/// unrecognized values are treated as [`MessageKind::Plain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Incremental reasoning text, coalesced into one growing message per run.
    Thinking,
    /// A serialized [`ResultPayload`](crate::ResultPayload).
    Result,
    /// An operator notice.
    Operator,
    /// Literal display text.
    #[default]
    #[serde(other)]
    Plain,
}

impl MessageKind {
    /// Returns true for thinking fragments.
    pub fn is_thinking(&self) -> bool {
        matches!(self, MessageKind::Thinking)
    }
}

//! Conversation state and the pure reducer that evolves it.
//!
//! [`reduce`] is the only way conversation state changes.  It performs no I/O
//! and reads no clocks: everything it needs, including the identity of a new
//! user message, arrives in the [`Command`].

use serde::Serialize;
use time::OffsetDateTime;

use crate::types::Message;

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    /// Display order; append or replace-in-place only.
    pub messages: Vec<Message>,
    /// True from an accepted submit until completion, error or stop.
    pub is_generating: bool,
    /// Whether thinking fragments are surfaced.
    pub deep_thinking_enabled: bool,
    /// Current unsent text.
    pub draft_input: String,
    pub is_open: bool,
    pub is_full_screen: bool,
}

impl ConversationState {
    /// Creates an empty conversation.
    pub fn new(deep_thinking_enabled: bool) -> Self {
        Self {
            deep_thinking_enabled,
            ..Self::default()
        }
    }

    /// Looks up a message by id.
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

/// An input to [`reduce`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ToggleOpen,
    ToggleFullScreen,
    SetDraft(String),
    /// Turn the draft into a user message with the given identity.
    SubmitDraft {
        id: String,
        timestamp: OffsetDateTime,
    },
    MessageArrived(Message),
    MessageUpdated(Message),
    SetGenerating(bool),
    ToggleDeepThinking,
    /// Drop every message; other fields are untouched.
    Clear,
}

/// Returns true when `draft` would produce a user message.
pub fn is_submittable(draft: &str) -> bool {
    !draft.trim().is_empty()
}

/// Folds one command into the state.
pub fn reduce(mut state: ConversationState, command: Command) -> ConversationState {
    match command {
        Command::ToggleOpen => {
            state.is_open = !state.is_open;
        }
        Command::ToggleFullScreen => {
            state.is_full_screen = !state.is_full_screen;
        }
        Command::SetDraft(text) => {
            state.draft_input = text;
        }
        Command::SubmitDraft { id, timestamp } => {
            if !is_submittable(&state.draft_input) {
                return state;
            }
            let content = std::mem::take(&mut state.draft_input);
            state.messages.push(Message::user(id, content, timestamp));
            state.is_generating = true;
        }
        Command::MessageArrived(message) => match state.position(&message.id) {
            Some(idx) => state.messages[idx] = message,
            None => state.messages.push(message),
        },
        Command::MessageUpdated(message) => match state.position(&message.id) {
            Some(idx) => state.messages[idx].merge(message),
            None => state.messages.push(message),
        },
        Command::SetGenerating(generating) => {
            state.is_generating = generating;
        }
        Command::ToggleDeepThinking => {
            state.deep_thinking_enabled = !state.deep_thinking_enabled;
        }
        Command::Clear => {
            state.messages.clear();
        }
    }
    state
}

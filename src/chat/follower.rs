//! Incremental rendering of conversation snapshots.
//!
//! The controller publishes whole [`ConversationState`] snapshots.  A terminal
//! can only append, so [`Follower`] remembers what it already printed and
//! hands the renderer just the new part of each snapshot.

use crate::reducer::ConversationState;
use crate::render::Renderer;
use crate::types::{Message, MessageKind, Sender};

#[derive(Debug, Clone)]
struct Printed {
    id: String,
    content: String,
}

/// Tracks which parts of the conversation were rendered.
#[derive(Debug, Default)]
pub struct Follower {
    name: String,
    printed: Vec<Printed>,
    was_generating: bool,
}

impl Follower {
    /// Creates a follower that labels bot messages with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Renders whatever changed since the previous snapshot.
    ///
    /// User messages are recorded but not printed; the terminal already
    /// echoed them.  A message whose content grew is continued in place, and
    /// one whose content changed otherwise is printed again as a new block.
    pub fn apply(&mut self, state: &ConversationState, renderer: &mut dyn Renderer) {
        if state.messages.len() < self.printed.len() {
            self.printed.truncate(state.messages.len());
        }
        for (idx, message) in state.messages.iter().enumerate() {
            match self.printed.get_mut(idx) {
                Some(printed) if printed.id == message.id => {
                    if printed.content == message.content {
                        continue;
                    }
                    if message.sender == Sender::Bot {
                        match message.content.strip_prefix(printed.content.as_str()) {
                            Some(delta) if message.kind != MessageKind::Result => {
                                print_piece(renderer, message, delta);
                            }
                            _ => print_block(renderer, &self.name, message),
                        }
                    }
                    printed.content = message.content.clone();
                }
                _ => {
                    self.printed.truncate(idx);
                    if message.sender == Sender::Bot {
                        print_block(renderer, &self.name, message);
                    }
                    self.printed.push(Printed {
                        id: message.id.clone(),
                        content: message.content.clone(),
                    });
                }
            }
        }
        if self.was_generating && !state.is_generating {
            renderer.finish_response();
        }
        self.was_generating = state.is_generating;
    }

    /// Forgets everything; the next snapshot is printed in full.
    pub fn reset(&mut self) {
        self.printed.clear();
        self.was_generating = false;
    }
}

fn print_block(renderer: &mut dyn Renderer, name: &str, message: &Message) {
    renderer.start_message(name, message);
    match message.result_payload() {
        Some(Ok(result)) => renderer.print_result(&result),
        Some(Err(_)) | None => print_piece(renderer, message, &message.content),
    }
}

fn print_piece(renderer: &mut dyn Renderer, message: &Message, text: &str) {
    if message.is_thinking() {
        renderer.print_thinking(text);
    } else {
        renderer.print_text(text);
    }
}

//! Coalescing of thinking fragments.
//!
//! The service streams its reasoning as many small `thinking` events.  They
//! render as one growing message until any other kind of event arrives; the
//! next thinking event after that starts a new message.

use crate::reducer::Command;
use crate::types::Message;

/// Separator placed between merged thinking fragments.
pub const THINKING_SEPARATOR: &str = "\n";

/// The open thinking message of one generation run, if any.
#[derive(Debug, Default)]
pub struct ThinkingRun {
    open: Option<Message>,
}

impl ThinkingRun {
    /// Creates a run with nothing open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the open message; called at the start of every send.
    pub fn reset(&mut self) {
        self.open = None;
    }

    /// Returns the open thinking message.
    pub fn open(&self) -> Option<&Message> {
        self.open.as_ref()
    }

    /// Turns an incoming message into the command that applies it.
    ///
    /// Non-thinking messages close the run and arrive as-is.  The first
    /// thinking message of a run arrives as-is and opens it.  Later thinking
    /// messages are appended to the open one, which is re-sent as an update
    /// under its original id.
    pub fn absorb(&mut self, message: Message) -> Command {
        if !message.is_thinking() {
            self.open = None;
            return Command::MessageArrived(message);
        }
        match self.open.as_mut() {
            None => {
                self.open = Some(message.clone());
                Command::MessageArrived(message)
            }
            Some(open) => {
                open.content.push_str(THINKING_SEPARATOR);
                open.content.push_str(&message.content);
                Command::MessageUpdated(open.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{ConversationState, reduce};
    use crate::types::MessageKind;
    use time::macros::datetime;

    fn thinking(id: &str, text: &str) -> Message {
        Message::bot(id, text, datetime!(2024-05-01 12:00:00 UTC)).with_kind(MessageKind::Thinking)
    }

    fn plain(id: &str, text: &str) -> Message {
        Message::bot(id, text, datetime!(2024-05-01 12:00:00 UTC))
    }

    fn fold(messages: Vec<Message>) -> ConversationState {
        let mut run = ThinkingRun::new();
        messages
            .into_iter()
            .fold(ConversationState::default(), |state, msg| {
                reduce(state, run.absorb(msg))
            })
    }

    #[test]
    fn consecutive_fragments_make_one_message() {
        let state = fold(vec![
            thinking("t1", "step1"),
            thinking("t2", "step2"),
            thinking("t3", "step3"),
        ]);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, "t1");
        assert_eq!(state.messages[0].content, "step1\nstep2\nstep3");
        assert_eq!(state.messages[0].kind, MessageKind::Thinking);
    }

    #[test]
    fn non_thinking_closes_the_run() {
        let state = fold(vec![
            thinking("t1", "a"),
            thinking("t2", "b"),
            plain("p1", "partial answer"),
            thinking("t3", "c"),
            thinking("t4", "d"),
        ]);
        let summary: Vec<_> = state
            .messages
            .iter()
            .map(|m| (m.id.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![("t1", "a\nb"), ("p1", "partial answer"), ("t3", "c\nd")]
        );
    }

    #[test]
    fn reset_starts_a_new_run() {
        let mut run = ThinkingRun::new();
        assert!(matches!(
            run.absorb(thinking("t1", "a")),
            Command::MessageArrived(_)
        ));
        assert!(run.open().is_some());
        run.reset();
        assert!(run.open().is_none());
        assert!(matches!(
            run.absorb(thinking("t2", "b")),
            Command::MessageArrived(_)
        ));
    }

    #[test]
    fn update_reuses_open_id() {
        let mut run = ThinkingRun::new();
        run.absorb(thinking("t1", "a"));
        let Command::MessageUpdated(update) = run.absorb(thinking("t2", "b")) else {
            panic!("expected an update");
        };
        assert_eq!(update.id, "t1");
        assert_eq!(update.content, "a\nb");
    }
}

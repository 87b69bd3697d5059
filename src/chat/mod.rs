//! Terminal front end for a chat session.
//!
//! This module provides the pieces of the `aibot-chat` REPL built on top of
//! [`SessionController`](crate::SessionController):
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing
//! - [`follower`]: Incremental rendering of state snapshots

mod commands;
mod config;
mod follower;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use follower::Follower;

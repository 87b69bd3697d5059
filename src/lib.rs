// Public modules
pub mod chat;
pub mod client_logger;
pub mod config;
pub mod controller;
pub mod error;
pub mod ids;
pub mod observability;
pub mod reconnect;
pub mod reducer;
pub mod render;
pub mod sse;
pub mod thinking;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-exports
pub use client_logger::StreamLogger;
pub use config::{BotConfig, Hooks, Slots};
pub use controller::SessionController;
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use reconnect::{CloseReason, ConnectionState, PushListener, ReconnectingClient, RetryPolicy};
pub use reducer::{Command, ConversationState, reduce};
pub use render::{PlainTextRenderer, Renderer};
pub use transport::{
    Connect, DeliveryMode, HttpConnector, Outcome, SessionHandle, StreamListener, StreamRequest,
    Transport,
};
pub use types::*;

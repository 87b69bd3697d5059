//! Logging trait for chat session traffic.
//!
//! This module provides the [`StreamLogger`] trait that allows users to capture
//! every request a [`SessionController`](crate::SessionController) sends and
//! everything that streams back.

use crate::types::{BaseInfo, Message};

/// A trait for logging session traffic.
///
/// # Example
///
/// ```rust,ignore
/// use aibot::{BaseInfo, Message, StreamLogger};
/// use std::io::Write;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl StreamLogger for FileLogger {
///     fn log_request(&self, body: &BaseInfo) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "request: {}", serde_json::to_string(body).unwrap()).unwrap();
///     }
///
///     fn log_chunk(&self, chunk: &str) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "chunk: {chunk}").unwrap();
///     }
///
///     fn log_message(&self, message: &Message) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "message: {}", serde_json::to_string(message).unwrap()).unwrap();
///     }
/// }
/// ```
pub trait StreamLogger: Send + Sync {
    /// Log the body of an accepted send, after hooks ran.
    fn log_request(&self, body: &BaseInfo);

    /// Log one raw event payload as it came off the wire.
    ///
    /// Chunks that arrive after a stop or for a superseded send are not
    /// logged.
    fn log_chunk(&self, chunk: &str);

    /// Log a message as it is applied to the conversation.
    ///
    /// For coalesced thinking this is the merged message, so the same id may
    /// be logged several times with growing content.
    fn log_message(&self, message: &Message);
}

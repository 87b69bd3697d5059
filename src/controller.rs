//! The session controller: the only component with side effects.
//!
//! A [`SessionController`] owns the conversation state.  It turns user intent
//! into requests, runs hooks, opens transport sessions and folds whatever
//! streams back into the state through [`reduce`].  Every state change is
//! published on a watch channel so a presentation layer can follow along.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::client_logger::StreamLogger;
use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::ids::IdSource;
use crate::observability::{
    SESSION_DROPPED_CHUNKS, SESSION_SENDS, SESSION_STOPS, SESSION_VETOES, THINKING_MERGES,
};
use crate::reducer::{Command, ConversationState, is_submittable, reduce};
use crate::sse::{Payload, parse_payload};
use crate::thinking::ThinkingRun;
use crate::transport::{Connect, SessionHandle, StreamListener, Transport};
use crate::types::{Message, Sender};
use crate::utils::time::now;

/// Appended to the query when deep thinking is disabled.
pub const NO_THINK_SUFFIX: &str = " no_think";

/// Shown when a transport error has no description.
const FALLBACK_ERROR_TEXT: &str = "network error";

struct Inner {
    state: ConversationState,
    thinking: ThinkingRun,
    /// Incremented by every accepted send; callbacks carry the value they
    /// were created with.
    run: u64,
    handle: Option<SessionHandle>,
    config: Arc<BotConfig>,
    ids: IdSource,
    logger: Option<Arc<dyn StreamLogger>>,
    publisher: watch::Sender<ConversationState>,
}

impl Inner {
    fn dispatch(&mut self, command: Command) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, command);
        self.publisher.send_replace(self.state.clone());
    }

    /// True while chunks of `run` should still be applied.
    fn accepts(&self, run: u64) -> bool {
        self.run == run && self.state.is_generating
    }

    fn log_message(&self, command: &Command) {
        if let Some(logger) = &self.logger {
            if let Command::MessageArrived(message) | Command::MessageUpdated(message) = command {
                logger.log_message(message);
            }
        }
    }

    fn report_error(&mut self, error: &Error) {
        let text = error.to_string();
        let text = if text.trim().is_empty() {
            FALLBACK_ERROR_TEXT.to_string()
        } else {
            text
        };
        let at = now();
        let id = self.ids.mint(Sender::Bot, at);
        let command = Command::MessageArrived(Message::bot(id, text, at));
        self.log_message(&command);
        self.thinking.reset();
        self.dispatch(command);
        self.dispatch(Command::SetGenerating(false));
        self.handle = None;
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one conversation.
///
/// Must be used from within a Tokio runtime.  Cloning yields another handle
/// to the same conversation.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Mutex<Inner>>,
    transport: Transport,
}

impl SessionController {
    /// Creates a controller that talks HTTP to `config.endpoint`.
    pub fn new(config: BotConfig) -> Result<Self> {
        config.validate()?;
        let transport = Transport::new(config.connect_timeout())?;
        Ok(Self::build(config, transport))
    }

    /// Creates a controller over any connector.
    pub fn with_connector(config: BotConfig, connector: Arc<dyn Connect>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Transport::with_connector(connector)))
    }

    fn build(config: BotConfig, transport: Transport) -> Self {
        let transport = transport
            .with_mode(config.delivery)
            .with_retry(config.retry)
            .with_headers(config.headers.clone());
        let state = ConversationState::new(config.deep_thinking);
        let (publisher, _) = watch::channel(state.clone());
        let inner = Inner {
            state,
            thinking: ThinkingRun::new(),
            run: 0,
            handle: None,
            config: Arc::new(config),
            ids: IdSource::new(),
            logger: None,
            publisher,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            transport,
        }
    }

    /// Sets the logger for session traffic.
    pub fn with_logger(self, logger: Arc<dyn StreamLogger>) -> Self {
        lock(&self.inner).logger = Some(logger);
        self
    }

    /// Returns a snapshot of the conversation.
    pub fn state(&self) -> ConversationState {
        lock(&self.inner).state.clone()
    }

    /// Returns a receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        lock(&self.inner).publisher.subscribe()
    }

    pub fn config(&self) -> Arc<BotConfig> {
        Arc::clone(&lock(&self.inner).config)
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        lock(&self.inner).dispatch(Command::SetDraft(text.into()));
    }

    /// Sends `text`, or the current draft when `text` is `None`.
    ///
    /// Returns false without changing anything when the text is blank or the
    /// pre-send hook vetoed it.  A send while a previous one is still
    /// streaming stops the previous one first.
    pub fn send(&self, text: Option<&str>) -> bool {
        let (body, config) = {
            let inner = lock(&self.inner);
            let query = match text {
                Some(text) => text.to_string(),
                None => inner.state.draft_input.clone(),
            };
            if !is_submittable(&query) {
                return false;
            }
            let mut query = query;
            if !inner.state.deep_thinking_enabled {
                query.push_str(NO_THINK_SUFFIX);
            }
            (inner.config.base_info.with_query(query), Arc::clone(&inner.config))
        };

        if let Some(before_send) = &config.hooks.before_send {
            if !before_send(&body, &config) {
                SESSION_VETOES.click();
                tracing::debug!("send vetoed by hook");
                return false;
            }
        }

        let mut inner = lock(&self.inner);
        if let Some(text) = text {
            inner.dispatch(Command::SetDraft(text.to_string()));
        }
        let at = now();
        let id = inner.ids.mint(Sender::User, at);
        inner.dispatch(Command::SubmitDraft { id, timestamp: at });
        inner.thinking.reset();
        if let Some(previous) = inner.handle.take() {
            if previous.stop() {
                tracing::debug!("stopped previous generation");
            }
        }
        inner.run += 1;
        let run = inner.run;
        SESSION_SENDS.click();
        if let Some(logger) = &inner.logger {
            logger.log_request(&body);
        }

        let payload = match serde_json::to_value(&body) {
            Ok(payload) => payload,
            Err(e) => {
                inner.report_error(&Error::from(e));
                return true;
            }
        };
        tracing::info!(run, endpoint = %config.endpoint, "sending query");
        let listener = RunListener {
            inner: Arc::clone(&self.inner),
            run,
        };
        let handle = self.transport.open(&config.endpoint, &payload, listener);
        inner.handle = Some(handle);
        true
    }

    /// Stops the current generation; partial content stays.
    ///
    /// Returns false when nothing was generating.
    pub fn stop(&self) -> bool {
        let mut inner = lock(&self.inner);
        if let Some(handle) = inner.handle.take() {
            handle.stop();
        }
        inner.thinking.reset();
        if !inner.state.is_generating {
            return false;
        }
        SESSION_STOPS.click();
        tracing::info!(run = inner.run, "generation stopped");
        inner.dispatch(Command::SetGenerating(false));
        true
    }

    /// Drops every message.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.thinking.reset();
        inner.dispatch(Command::Clear);
    }

    /// Flips deep thinking and returns the new setting.
    pub fn toggle_deep_thinking(&self) -> bool {
        let mut inner = lock(&self.inner);
        inner.dispatch(Command::ToggleDeepThinking);
        inner.state.deep_thinking_enabled
    }

    /// Flips the widget open or closed and returns whether it is now open.
    pub fn toggle_open(&self) -> bool {
        let (open, config) = {
            let mut inner = lock(&self.inner);
            inner.dispatch(Command::ToggleOpen);
            (inner.state.is_open, Arc::clone(&inner.config))
        };
        if !open {
            if let Some(after_close) = &config.hooks.after_close {
                after_close(&config);
            }
        }
        open
    }

    /// Flips full-screen mode and returns the new setting.
    pub fn toggle_full_screen(&self) -> bool {
        let mut inner = lock(&self.inner);
        inner.dispatch(Command::ToggleFullScreen);
        inner.state.is_full_screen
    }

    /// Waits until nothing is generating.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as the controller.
        let _ = rx.wait_for(|state| !state.is_generating).await;
    }
}

/// Applies the events of one send.
struct RunListener {
    inner: Arc<Mutex<Inner>>,
    run: u64,
}

impl RunListener {
    fn materialize(inner: &mut Inner, chunk: &str) -> Message {
        let at = now();
        match parse_payload(chunk) {
            Payload::Message(payload) => payload.into_message(&mut inner.ids, at),
            Payload::Text(text) => {
                let id = inner.ids.mint(Sender::Bot, at);
                Message::bot(id, text, at)
            }
        }
    }
}

impl StreamListener for RunListener {
    fn on_chunk(&mut self, chunk: String) {
        let (message, config) = {
            let mut inner = lock(&self.inner);
            if !inner.accepts(self.run) {
                SESSION_DROPPED_CHUNKS.click();
                return;
            }
            if let Some(logger) = &inner.logger {
                logger.log_chunk(&chunk);
            }
            let message = Self::materialize(&mut inner, &chunk);
            (message, Arc::clone(&inner.config))
        };

        let message = match &config.hooks.after_receive {
            Some(after_receive) => match after_receive(message, &config) {
                Some(message) => message,
                None => return,
            },
            None => message,
        };

        let mut inner = lock(&self.inner);
        if !inner.accepts(self.run) {
            SESSION_DROPPED_CHUNKS.click();
            return;
        }
        if message.is_thinking() && !inner.state.deep_thinking_enabled {
            return;
        }
        let command = inner.thinking.absorb(message);
        if matches!(command, Command::MessageUpdated(_)) {
            THINKING_MERGES.click();
        }
        inner.log_message(&command);
        inner.dispatch(command);
    }

    fn on_complete(&mut self) {
        let mut inner = lock(&self.inner);
        if inner.run != self.run {
            return;
        }
        tracing::debug!(run = self.run, "generation complete");
        inner.handle = None;
        inner.thinking.reset();
        inner.dispatch(Command::SetGenerating(false));
    }

    fn on_error(&mut self, error: Error) {
        let mut inner = lock(&self.inner);
        if !inner.accepts(self.run) {
            return;
        }
        tracing::warn!(run = self.run, error = %error, "generation failed");
        inner.report_error(&error);
    }
}

//! Configuration of a chat session.
//!
//! [`BotConfig`] is built with `with_*` methods or loaded from YAML.  Hooks
//! are code, so they are attached after loading and never serialized.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reconnect::RetryPolicy;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, DeliveryMode};
use crate::types::{BaseInfo, Message};

/// Display name used when none is configured.
pub const DEFAULT_NAME: &str = "AI Assistant";

/// Called with the outgoing body before a send; returning false vetoes it.
pub type BeforeSendHook = Arc<dyn Fn(&BaseInfo, &BotConfig) -> bool + Send + Sync>;

/// Called with every received message; returning `None` suppresses it.
pub type AfterReceiveHook = Arc<dyn Fn(Message, &BotConfig) -> Option<Message> + Send + Sync>;

/// Called when the widget goes from open to closed.
pub type AfterCloseHook = Arc<dyn Fn(&BotConfig) + Send + Sync>;

/// Integration points supplied by the embedding application.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_send: Option<BeforeSendHook>,
    pub after_receive: Option<AfterReceiveHook>,
    pub after_close: Option<AfterCloseHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_send", &self.before_send.is_some())
            .field("after_receive", &self.after_receive.is_some())
            .field("after_close", &self.after_close.is_some())
            .finish()
    }
}

/// Opaque content the presentation layer places around the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_top: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_bottom: Option<String>,
}

/// Configuration for a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// URL of the generation endpoint.
    pub endpoint: String,

    /// Display name of the assistant.
    pub name: String,

    /// Template for every request body; `nl_query` is filled in per send.
    pub base_info: BaseInfo,

    /// Whether deep thinking starts enabled.
    pub deep_thinking: bool,

    /// Passed through to the presentation layer.
    pub hide_deep_thinking: bool,

    pub delivery: DeliveryMode,

    /// Retry policy of the push channel in GET mode.
    pub retry: RetryPolicy,

    /// Time allowed for establishing a connection.
    pub connect_timeout_secs: u64,

    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,

    pub slots: Slots,

    #[serde(skip)]
    pub hooks: Hooks,
}

impl BotConfig {
    /// Creates a configuration for `endpoint` with default values.
    ///
    /// Defaults:
    /// - Name: AI Assistant
    /// - Deep thinking: disabled
    /// - Delivery: POST
    /// - Retry: 5 attempts, 1000 ms apart
    /// - Connect timeout: 60 seconds
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            name: DEFAULT_NAME.to_string(),
            base_info: BaseInfo::default(),
            deep_thinking: false,
            hide_deep_thinking: false,
            delivery: DeliveryMode::default(),
            retry: RetryPolicy::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            headers: Vec::new(),
            slots: Slots::default(),
            hooks: Hooks::default(),
        }
    }

    /// Loads a configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("Failed to read config file {}", path.display()), e)
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values a session cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::validation(
                "endpoint must not be empty",
                Some("endpoint".to_string()),
            ));
        }
        url::Url::parse(&self.endpoint).map_err(|e| {
            Error::validation(
                format!("endpoint is not a valid URL: {e}"),
                Some("endpoint".to_string()),
            )
        })?;
        if self.retry.max_attempts == 0 {
            return Err(Error::validation(
                "retry.max_attempts must be at least 1",
                Some("retry".to_string()),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the request body template.
    pub fn with_base_info(mut self, base_info: BaseInfo) -> Self {
        self.base_info = base_info;
        self
    }

    /// Sets whether deep thinking starts enabled.
    pub fn with_deep_thinking(mut self, enabled: bool) -> Self {
        self.deep_thinking = enabled;
        self
    }

    pub fn with_hide_deep_thinking(mut self, hide: bool) -> Self {
        self.hide_deep_thinking = hide;
        self
    }

    /// Sets the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Sets the push channel retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_slots(mut self, slots: Slots) -> Self {
        self.slots = slots;
        self
    }

    /// Installs the pre-send hook.
    pub fn with_before_send(
        mut self,
        hook: impl Fn(&BaseInfo, &BotConfig) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.before_send = Some(Arc::new(hook));
        self
    }

    /// Installs the post-receive hook.
    pub fn with_after_receive(
        mut self,
        hook: impl Fn(Message, &BotConfig) -> Option<Message> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.after_receive = Some(Arc::new(hook));
        self
    }

    /// Installs the on-close hook.
    pub fn with_after_close(mut self, hook: impl Fn(&BotConfig) + Send + Sync + 'static) -> Self {
        self.hooks.after_close = Some(Arc::new(hook));
        self
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

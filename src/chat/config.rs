//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! settings of the terminal front end.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::transport::DeliveryMode;

/// Command-line arguments for the aibot-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// YAML configuration file to start from.
    #[arrrg(optional, "YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Generation endpoint URL.
    #[arrrg(optional, "Generation endpoint URL", "URL")]
    pub endpoint: Option<String>,

    /// Display name of the assistant.
    #[arrrg(optional, "Assistant name (default: AI Assistant)", "NAME")]
    pub name: Option<String>,

    /// Delivery mode.
    #[arrrg(optional, "Delivery mode: post or get (default: post)", "MODE")]
    pub delivery: Option<String>,

    /// Push channel retry ceiling.
    #[arrrg(optional, "Push channel attempts before giving up (default: 5)", "N")]
    pub max_attempts: Option<u32>,

    /// Delay between push channel attempts.
    #[arrrg(optional, "Milliseconds between push channel attempts (default: 1000)", "MS")]
    pub retry_delay_ms: Option<u64>,

    /// Connect timeout.
    #[arrrg(optional, "Connect timeout in seconds (default: 60)", "SECS")]
    pub connect_timeout: Option<u64>,

    /// Start with deep thinking enabled.
    #[arrrg(flag, "Start with deep thinking enabled")]
    pub think: bool,

    /// File that receives a JSON line per request, chunk and message.
    #[arrrg(optional, "Log session traffic as JSON lines to FILE", "FILE")]
    pub traffic_log: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved settings of the chat application.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Configuration handed to the session controller.
    pub bot: BotConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Where to log session traffic, if anywhere.
    pub traffic_log: Option<PathBuf>,
}

impl ChatConfig {
    /// Creates a ChatConfig around `bot` with colors on and no traffic log.
    pub fn new(bot: BotConfig) -> Self {
        Self {
            bot,
            use_color: true,
            traffic_log: None,
        }
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the traffic log path.
    pub fn with_traffic_log(mut self, path: Option<PathBuf>) -> Self {
        self.traffic_log = path;
        self
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    /// Loads `--config` when given, then applies every other flag on top.
    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut bot = match &args.config {
            Some(path) => BotConfig::from_file(path)?,
            None => BotConfig::default(),
        };
        if let Some(endpoint) = args.endpoint {
            bot = bot.with_endpoint(endpoint);
        }
        if let Some(name) = args.name {
            bot = bot.with_name(name);
        }
        if let Some(delivery) = args.delivery {
            bot = bot.with_delivery(delivery.parse::<DeliveryMode>()?);
        }
        if let Some(max_attempts) = args.max_attempts {
            bot.retry.max_attempts = max_attempts;
        }
        if let Some(delay) = args.retry_delay_ms {
            bot.retry.base_delay = Duration::from_millis(delay);
        }
        if let Some(secs) = args.connect_timeout {
            bot = bot.with_connect_timeout(Duration::from_secs(secs));
        }
        if args.think {
            bot = bot.with_deep_thinking(true);
        }
        bot.validate()?;

        Ok(ChatConfig {
            bot,
            use_color: !args.no_color,
            traffic_log: args.traffic_log.map(PathBuf::from),
        })
    }
}

//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the session without sending a query to the
//! service.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Clear the conversation.
    Clear,

    /// Turn deep thinking on or off; `None` flips it.
    Think(Option<bool>),

    /// Stop the answer being generated.
    Stop,

    /// Toggle the widget open or closed.
    Open,

    /// Toggle full-screen mode.
    FullScreen,

    /// Save the conversation as JSON.
    Save(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics.
    Stats,

    /// Show the current configuration.
    ShowConfig,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a query.
///
/// # Examples
///
/// ```
/// # use aibot::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/think on").is_some());
/// assert!(parse_command("monthly revenue by region").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => ChatCommand::Clear,
        "think" | "thinking" => match argument {
            None => ChatCommand::Think(None),
            Some(arg) => match parse_on_off(arg) {
                Some(value) => ChatCommand::Think(Some(value)),
                None => ChatCommand::Invalid("/think expects 'on' or 'off'".to_string()),
            },
        },
        "stop" => ChatCommand::Stop,
        "open" => ChatCommand::Open,
        "fullscreen" | "full" => ChatCommand::FullScreen,
        "save" => match argument {
            Some(path) => ChatCommand::Save(path.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        "config" => ChatCommand::ShowConfig,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Clear the conversation
  /think [on|off]        Turn deep thinking on or off (no argument flips it)
  /stop                  Stop the answer being generated (or press Ctrl-C)
  /open                  Toggle the widget open or closed
  /fullscreen            Toggle full-screen mode
  /save <file>           Save the conversation as JSON
  /stats                 Show session statistics
  /config                Show current configuration
  /help                  Show this help message
  /quit                  Exit the chat"#
}

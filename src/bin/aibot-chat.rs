//! Interactive terminal client for a natural-language query service.
//!
//! This binary provides a streaming REPL on top of the session controller:
//! each line is sent as a query and the answer is rendered as it streams in.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local service
//! aibot-chat --endpoint http://localhost:8080/api/stream
//!
//! # Start from a YAML file and turn deep thinking on
//! aibot-chat --config bot.yaml --think
//!
//! # Use the push channel and log traffic
//! aibot-chat --config bot.yaml --delivery get --traffic-log traffic.jsonl
//!
//! # One-shot query
//! aibot-chat --endpoint http://localhost:8080/api/stream "orders per day last week"
//! ```
//!
//! Set `RUST_LOG=aibot=debug` to see transport and reconnect logs on stderr.
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Clear the conversation
//! - `/think [on|off]` - Turn deep thinking on or off
//! - `/stop` - Stop the answer being generated
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aibot::chat::{
    ChatArgs, ChatCommand, ChatConfig, Follower, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use aibot::{BaseInfo, Message, SessionController, Sender, StreamLogger};

/// How often the interrupt flag is checked while an answer streams.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Main entry point for the aibot-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aibot=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (args, free) = ChatArgs::from_command_line_relaxed("aibot-chat [OPTIONS] [QUERY]");
    let config = ChatConfig::try_from(args)?;
    let use_color = config.use_color;

    let mut controller = SessionController::new(config.bot.clone())?;
    if let Some(path) = &config.traffic_log {
        controller = controller.with_logger(Arc::new(JsonLinesLogger::create(path)?));
    }

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let mut renderer = PlainTextRenderer::with_color_and_interrupt(use_color, interrupted.clone());
    let mut follower = Follower::new(config.bot.name.clone());
    controller.toggle_open();

    if !free.is_empty() {
        let query = free.join(" ");
        if controller.send(Some(&query)) {
            follow(&controller, &mut follower, &mut renderer).await;
        }
        return Ok(());
    }

    let mut rl = DefaultEditor::new()?;
    println!("{} (endpoint: {})", config.bot.name, config.bot.endpoint);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            controller.clear();
                            follower.reset();
                            renderer.print_info("Conversation cleared.");
                        }
                        ChatCommand::Think(setting) => {
                            let current = controller.state().deep_thinking_enabled;
                            let enabled = match setting {
                                Some(wanted) if wanted == current => current,
                                _ => controller.toggle_deep_thinking(),
                            };
                            let word = if enabled { "on" } else { "off" };
                            renderer.print_info(&format!("Deep thinking {word}."));
                        }
                        ChatCommand::Stop => {
                            if controller.stop() {
                                renderer.print_interrupted();
                            } else {
                                renderer.print_info("Nothing to stop.");
                            }
                        }
                        ChatCommand::Open => {
                            let open = controller.toggle_open();
                            let word = if open { "opened" } else { "closed" };
                            renderer.print_info(&format!("Widget {word}."));
                        }
                        ChatCommand::FullScreen => {
                            let full = controller.toggle_full_screen();
                            let word = if full { "on" } else { "off" };
                            renderer.print_info(&format!("Full screen {word}."));
                        }
                        ChatCommand::Save(path) => match save_transcript(&controller, &path) {
                            Ok(count) => {
                                renderer.print_info(&format!("Saved {count} messages to {path}."))
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Stats => print_stats(&controller),
                        ChatCommand::ShowConfig => print_config(&controller),
                        ChatCommand::Invalid(message) => renderer.print_error(&message),
                    }
                    continue;
                }

                // Regular query - send to the service
                if controller.send(Some(line)) {
                    follow(&controller, &mut follower, &mut renderer).await;
                } else {
                    renderer.print_info("Query not sent.");
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    controller.stop();
    Ok(())
}

/// Renders state changes until the answer is complete or the user interrupts.
async fn follow(
    controller: &SessionController,
    follower: &mut Follower,
    renderer: &mut PlainTextRenderer,
) {
    let mut rx = controller.subscribe();
    let mut ticker = tokio::time::interval(INTERRUPT_POLL);
    loop {
        let state = rx.borrow_and_update().clone();
        follower.apply(&state, renderer);
        if !state.is_generating {
            break;
        }
        if renderer.should_interrupt() {
            controller.stop();
            follower.apply(&controller.state(), renderer);
            renderer.print_interrupted();
            break;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
    }
}

fn save_transcript(controller: &SessionController, path: &str) -> aibot::Result<usize> {
    let state = controller.state();
    let json = serde_json::to_string_pretty(&state.messages)?;
    std::fs::write(path, json).map_err(|e| aibot::Error::io(format!("Failed to write {path}"), e))?;
    Ok(state.messages.len())
}

fn print_stats(controller: &SessionController) {
    let state = controller.state();
    let count = |sender: Sender| state.messages.iter().filter(|m| m.sender == sender).count();
    let thinking = state.messages.iter().filter(|m| m.is_thinking()).count();
    println!("    Session Statistics:");
    println!("      Messages: {}", state.messages.len());
    println!("      Queries: {}", count(Sender::User));
    println!("      Bot messages: {} ({thinking} thinking)", count(Sender::Bot));
    println!("      Generating: {}", if state.is_generating { "yes" } else { "no" });
    println!(
        "      Deep thinking: {}",
        if state.deep_thinking_enabled { "on" } else { "off" }
    );
    println!("      Widget: {}", if state.is_open { "open" } else { "closed" });
    println!(
        "      Full screen: {}",
        if state.is_full_screen { "on" } else { "off" }
    );
}

fn print_config(controller: &SessionController) {
    let config = controller.config();
    println!("    Current Configuration:");
    println!("      Name: {}", config.name);
    println!("      Endpoint: {}", config.endpoint);
    println!("      Delivery: {:?}", config.delivery);
    println!(
        "      Retry: {} attempts, {} ms apart",
        config.retry.max_attempts,
        config.retry.base_delay.as_millis()
    );
    println!("      Connect timeout: {} s", config.connect_timeout_secs);
    if config.headers.is_empty() {
        println!("      Headers: (none)");
    } else {
        println!("      Headers:");
        for (name, _) in &config.headers {
            println!("        - {name}");
        }
    }
    if config.base_info.table_structure.is_empty() {
        println!("      Table fields: (none)");
    } else {
        println!("      Table fields: {}", config.base_info.table_structure.len());
    }
}

/// Writes session traffic as one JSON object per line.
struct JsonLinesLogger {
    file: Mutex<File>,
}

impl JsonLinesLogger {
    fn create(path: &Path) -> aibot::Result<Self> {
        let file = File::create(path).map_err(|e| {
            aibot::Error::io(format!("Failed to create {}", path.display()), e)
        })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write(&self, line: serde_json::Value) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(error = %err, "failed to write traffic log");
        }
    }
}

impl StreamLogger for JsonLinesLogger {
    fn log_request(&self, body: &BaseInfo) {
        self.write(json!({ "request": body }));
    }

    fn log_chunk(&self, chunk: &str) {
        self.write(json!({ "chunk": chunk }));
    }

    fn log_message(&self, message: &Message) {
        self.write(json!({ "message": message }));
    }
}

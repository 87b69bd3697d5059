//! Output rendering for the chat application.
//!
//! This module provides the [`Renderer`] trait and a plain-text
//! implementation that writes to a terminal with optional ANSI styling.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{Message, ResultPayload};

/// ANSI escape code for dim text (used for thinking).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for italic text (used for thinking).
const ANSI_ITALIC: &str = "\x1b[3m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for speaker labels).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for generated SQL).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for failed results).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering a conversation as it streams in.
///
/// Content arrives in pieces: `start_message` opens a block and the `print_*`
/// calls that follow extend it until the next `start_message`.
pub trait Renderer: Send {
    /// Called before the first piece of a bot message.
    fn start_message(&mut self, name: &str, message: &Message) {
        _ = name;
        _ = message;
    }

    /// Print a chunk of answer text.
    fn print_text(&mut self, text: &str);

    /// Print a chunk of thinking text.
    ///
    /// Thinking is displayed differently (dim/italic) to distinguish it from
    /// the answer.
    fn print_thinking(&mut self, text: &str);

    /// Print a structured query result.
    fn print_result(&mut self, result: &ResultPayload);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when an answer is complete.
    fn finish_response(&mut self);

    /// Called when the answer was stopped by the user.
    fn print_interrupted(&mut self) {}

    /// Returns true if the user asked to stop.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// Writes to stdout unless constructed with [`PlainTextRenderer::with_writer`].
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    in_thinking: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer<Stdout> {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }

    /// Creates a new PlainTextRenderer with specified color and interrupt flag.
    pub fn with_color_and_interrupt(use_color: bool, interrupted: Arc<AtomicBool>) -> Self {
        Self::with_color(use_color).with_interrupt(interrupted)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer over any writer.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            in_thinking: false,
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes and flushes so streamed content shows up immediately.
    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        self.line_start = text.ends_with('\n');
    }

    fn styled(&mut self, style: &str, text: &str) {
        if self.use_color {
            let _ = self.out.write_all(style.as_bytes());
            self.write(text);
            let _ = self.out.write_all(ANSI_RESET.as_bytes());
            let _ = self.out.flush();
        } else {
            self.write(text);
        }
    }

    fn end_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }

    fn reset_thinking(&mut self) {
        if self.in_thinking {
            if self.use_color {
                let _ = self.out.write_all(ANSI_RESET.as_bytes());
            }
            self.in_thinking = false;
        }
    }
}

impl Default for PlainTextRenderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn start_message(&mut self, name: &str, message: &Message) {
        self.reset_thinking();
        self.end_line();
        let label = if message.is_thinking() {
            format!("{name} (thinking):\n")
        } else {
            format!("{name}:\n")
        };
        self.styled(ANSI_CYAN, &label);
    }

    fn print_text(&mut self, text: &str) {
        self.reset_thinking();
        self.write(text);
    }

    fn print_thinking(&mut self, text: &str) {
        if self.use_color {
            if !self.in_thinking {
                let _ = self.out.write_all(ANSI_DIM.as_bytes());
                let _ = self.out.write_all(ANSI_ITALIC.as_bytes());
                self.in_thinking = true;
            }
            self.write(text);
        } else {
            if !self.in_thinking {
                self.write("[thinking] ");
                self.in_thinking = true;
            }
            self.write(text);
        }
    }

    fn print_result(&mut self, result: &ResultPayload) {
        self.reset_thinking();
        self.end_line();
        if result.is_error() {
            self.styled(ANSI_RED, &format!("Query failed: {}\n", result.message));
            if let Some(detail) = result.error_detail.as_deref().filter(|d| !d.is_empty()) {
                self.write(&format!("{detail}\n"));
            }
        } else if !result.message.is_empty() {
            self.write(&format!("{}\n", result.message));
        }
        if !result.generated_sql.is_empty() {
            self.write("SQL:\n");
            self.styled(ANSI_YELLOW, &format!("{}\n", result.generated_sql));
        }
        if !result.dynamic_params.is_empty() {
            self.write("Parameters:\n");
            for param in &result.dynamic_params {
                let mut line = format!("  {} ({})", param.param_name, param.param_type);
                if !param.remark.is_empty() {
                    line.push_str(&format!(": {}", param.remark));
                }
                if !param.default_value.is_empty() {
                    line.push_str(&format!(" [default {}]", param.default_value));
                }
                line.push('\n');
                self.write(&line);
            }
        }
        if !result.explanation.is_empty() {
            self.write(&format!("{}\n", result.explanation));
        }
    }

    fn print_error(&mut self, error: &str) {
        self.reset_thinking();
        self.end_line();
        self.styled(ANSI_RED, &format!("Error: {error}\n"));
    }

    fn print_info(&mut self, info: &str) {
        self.reset_thinking();
        self.end_line();
        self.write(&format!("{info}\n"));
    }

    fn finish_response(&mut self) {
        self.reset_thinking();
        self.end_line();
    }

    fn print_interrupted(&mut self) {
        self.reset_thinking();
        self.end_line();
        self.write("[interrupted]\n");
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DynamicParam, MessageKind, ResultStatus};
    use time::macros::datetime;

    fn output(render: impl FnOnce(&mut PlainTextRenderer<Vec<u8>>)) -> String {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);
        render(&mut renderer);
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
    }

    #[test]
    fn thinking_then_answer() {
        let at = datetime!(2024-05-01 12:00:00 UTC);
        let thinking = Message::bot("t", "", at).with_kind(MessageKind::Thinking);
        let answer = Message::bot("a", "", at);
        let text = output(|r| {
            r.start_message("Bot", &thinking);
            r.print_thinking("step1");
            r.print_thinking("\nstep2");
            r.start_message("Bot", &answer);
            r.print_text("done");
            r.finish_response();
        });
        assert_eq!(
            text,
            "Bot (thinking):\n[thinking] step1\nstep2\nBot:\ndone\n"
        );
    }

    #[test]
    fn result_formatting() {
        let result = ResultPayload {
            status: ResultStatus::Success,
            message: "Found it".to_string(),
            generated_sql: "select count(*) from orders where day = :day".to_string(),
            dynamic_params: vec![DynamicParam {
                param_type: "date".to_string(),
                remark: "order day".to_string(),
                default_value: "today".to_string(),
                ..DynamicParam::new("day")
            }],
            explanation: "Counts orders for one day.".to_string(),
            error_detail: None,
        };
        let text = output(|r| r.print_result(&result));
        assert_eq!(
            text,
            "Found it\nSQL:\nselect count(*) from orders where day = :day\nParameters:\n  day (date): order day [default today]\nCounts orders for one day.\n"
        );
    }

    #[test]
    fn failed_result() {
        let result = ResultPayload {
            status: ResultStatus::Error,
            message: "no such table".to_string(),
            error_detail: Some("table orderz".to_string()),
            ..ResultPayload::default()
        };
        let text = output(|r| r.print_result(&result));
        assert_eq!(text, "Query failed: no such table\ntable orderz\n");
    }

    #[test]
    fn interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let renderer = PlainTextRenderer::with_color_and_interrupt(false, flag.clone());
        assert!(!renderer.should_interrupt());
        flag.store(true, Ordering::Relaxed);
        assert!(renderer.should_interrupt());
    }
}

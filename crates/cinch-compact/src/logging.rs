//! Tracing subscriber layer that writes compact log lines to stderr.
//!
//! The CLI writes the compacted log to stdout, so diagnostics go to stderr
//! as `HH:MM:SS LEVEL message {k=v, ...}` lines. Lines below the minimum
//! level are dropped before formatting.

use std::io::Write;

use chrono::Local;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// A [`tracing_subscriber::Layer`] that prints events to stderr.
pub struct StderrLayer {
    min_level: Level,
}

impl StderrLayer {
    pub fn new(min_level: Level) -> Self {
        Self { min_level }
    }

    /// Level from the CLI's `-v` count, or `None` when `--quiet` was given.
    ///
    /// No flag shows warnings, `-v` adds info, `-vv` debug, `-vvv` trace.
    pub fn level_for(verbosity: u8, quiet: bool) -> Option<Level> {
        if quiet {
            return None;
        }
        Some(match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        })
    }
}

/// Render one event as a log line.
fn format_line(level: &Level, visitor: MessageVisitor) -> String {
    let mut message = visitor.message;
    if !visitor.fields.is_empty() {
        let extras: Vec<String> = visitor
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if message.is_empty() {
            message = extras.join(" ");
        } else {
            message = format!("{message} {{{}}}", extras.join(", "));
        }
    }
    format!(
        "{} {:>5} {message}",
        Local::now().format("%H:%M:%S"),
        level.as_str()
    )
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for StderrLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = event.metadata().level();
        // `Level` orders TRACE as the greatest.
        if *level > self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format_line(level, visitor);

        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

/// Visitor that extracts the message and extra fields from a tracing event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            // Strip surrounding quotes from debug-formatted strings.
            self.message = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .map(str::to_string)
                .unwrap_or(raw);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

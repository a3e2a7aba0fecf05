//! JSON snapshots of message logs and compaction configs.
//!
//! The engine itself never touches the filesystem. These helpers are the
//! CLI's I/O edge: a message log is a JSON array of [`Message`]s, and a
//! config file is a partial [`CompactionConfig`] object whose missing
//! fields take their defaults.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::Message;
use crate::compactor::CompactionConfig;

/// Parse a message log from JSON text. `source` names the input in errors.
pub fn parse_messages(text: &str, source: &str) -> Result<Vec<Message>, String> {
    serde_json::from_str(text).map_err(|e| format!("failed to parse messages from {source}: {e}"))
}

/// Read a message log from `path`, or from stdin when `path` is `None`.
pub fn read_messages(path: Option<&Path>) -> Result<Vec<Message>, String> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
            parse_messages(&text, &format!("'{}'", path.display()))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            parse_messages(&buf, "stdin")
        }
    }
}

/// Serialize a message log as pretty JSON with a trailing newline.
pub fn render_messages(messages: &[Message]) -> Result<String, String> {
    let mut text = serde_json::to_string_pretty(messages)
        .map_err(|e| format!("failed to serialize messages: {e}"))?;
    text.push('\n');
    Ok(text)
}

/// Write a message log to `path`, or to stdout when `path` is `None`.
pub fn write_messages(messages: &[Message], path: Option<&Path>) -> Result<(), String> {
    let text = render_messages(messages)?;
    match path {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| format!("failed to write '{}': {e}", path.display())),
        None => io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .map_err(|e| format!("failed to write stdout: {e}")),
    }
}

/// Load a [`CompactionConfig`] from a JSON file.
pub fn read_config(path: &Path) -> Result<CompactionConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse config '{}': {e}", path.display()))
}

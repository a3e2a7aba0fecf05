//! Conversation context compaction for LLM agent loops.
//!
//! An agent loop accumulates an ever-growing log of [`Message`]s: user
//! prompts, assistant text and reasoning, tool calls and their results,
//! attached media. Providers impose a hard context limit and charge extra
//! when a prompt-prefix cache expires. `cinch-compact` takes a message log
//! and a token budget and returns a smaller log that fits the budget while
//! keeping enough structure for the agent to continue working.
//!
//! The engine is a pure function from log to log: no I/O, no async, no
//! shared state. The input slice is never mutated; every call returns a new
//! `Vec<Message>`.
//!
//! # Getting started
//!
//! ```
//! use cinch_compact::prelude::*;
//!
//! let messages = vec![
//!     Message::system("You are a coding agent."),
//!     Message::user("Fix the failing test.").with_tag("USER_PROMPT"),
//!     Message::assistant_text("Looking into it."),
//! ];
//!
//! let config = CompactionConfig::new().with_max_context_tokens(200_000);
//! let outcome = Compactor::new(&config).compact(&messages);
//!
//! assert!(outcome.is_noop());
//! assert_eq!(outcome.messages.len(), 3);
//! ```
//!
//! # Where to find things
//!
//! - **Token accounting and budgets:** [`TokenEstimator`](context::budget::TokenEstimator)
//!   and [`BudgetConfig`](context::budget::BudgetConfig) in [`context::budget`].
//! - **Prompt-cache expiry detection:** [`CacheMonitor`](context::cache::CacheMonitor).
//! - **Tool-call / tool-result integrity:** [`context::pairing`].
//! - **Lossy staged eviction:** [`StageEvictor`](context::eviction::StageEvictor).
//! - **Narrative summarization:** [`Summarizer`](context::summarizer::Summarizer) and the
//!   per-tool [`DigestRegistry`](context::digest::DigestRegistry).
//! - **The top-level entry point:** [`Compactor`](compactor::Compactor) and
//!   [`compact`](compactor::compact).
//! - **Observing what happened:** implement [`EventHandler`](events::EventHandler)
//!   or use [`LoggingHandler`](events::LoggingHandler).
//!
//! # Invariants
//!
//! Every log returned by the [`Compactor`](compactor::Compactor) satisfies:
//!
//! 1. Surviving messages keep their original relative order.
//! 2. The set of tool-call ids in assistant messages equals the set of ids on
//!    tool-result messages.
//! 3. For every keep-last tag, the most recent message bearing it survives.
//! 4. The estimated cost fits the effective budget, unless pinned content
//!    alone exceeds it (reported as [`BudgetStatus::BestEffort`](compactor::BudgetStatus)).

pub mod clock;
pub mod compactor;
pub mod context;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod snapshot;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One output item of a tool result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ToolOutput {
    /// Structured JSON output (stdout, file contents, error objects, ...).
    Json { value: serde_json::Value },
    /// Base64-encoded binary output such as a screenshot.
    Media { data: String, media_type: String },
}

impl ToolOutput {
    pub fn json(value: serde_json::Value) -> Self {
        ToolOutput::Json { value }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ToolOutput::Media { .. })
    }
}

/// A single part of a message's content.
///
/// Which variants appear depends on the role: users send text and media,
/// assistants send text, reasoning, and tool calls, and tool messages carry
/// exactly the results.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    Image {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: Vec<ToolOutput>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        ContentPart::ToolCall {
            tool_call_id: id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    /// Whether this part carries a binary payload that must be priced by
    /// constant rather than by serialized size.
    pub fn is_media(&self) -> bool {
        match self {
            ContentPart::Image { .. } | ContentPart::File { .. } => true,
            ContentPart::ToolResult { output, .. } => output.iter().any(ToolOutput::is_media),
            _ => false,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A message in the conversation log.
///
/// `tags` are lifecycle hints set by the caller (for example the marker on
/// the user's live prompt). `keep_last_tags` names tags whose most recent
/// bearer must survive compaction. `sent_at` is a Unix timestamp in
/// milliseconds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keep_last_tags: BTreeSet<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tags: BTreeSet::new(),
            sent_at: None,
            pinned: false,
            keep_last_tags: BTreeSet::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, vec![ContentPart::text(text)])
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_role(MessageRole::User, parts)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, vec![ContentPart::text(text)])
    }

    pub fn assistant(parts: Vec<ContentPart>) -> Self {
        Self::with_role(MessageRole::Assistant, parts)
    }

    /// A tool message carrying a single JSON result for `call_id`.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::with_role(
            MessageRole::Tool,
            vec![ContentPart::ToolResult {
                tool_call_id: call_id.into(),
                tool_name: tool_name.into(),
                output: vec![ToolOutput::json(value)],
            }],
        )
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_sent_at(mut self, millis: i64) -> Self {
        self.sent_at = Some(millis);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Require that the most recent message tagged `tag` survives compaction.
    pub fn keep_last(mut self, tag: impl Into<String>) -> Self {
        self.keep_last_tags.insert(tag.into());
        self
    }

    /// Copy of this message's metadata with different content.
    pub fn with_content(&self, content: Vec<ContentPart>) -> Self {
        Self {
            role: self.role,
            content,
            tags: self.tags.clone(),
            sent_at: self.sent_at,
            pinned: self.pinned,
            keep_last_tags: self.keep_last_tags.clone(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_media(&self) -> bool {
        self.content.iter().any(ContentPart::is_media)
    }

    /// All `text` parts joined by newlines. Reasoning is not included.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ids of the tool calls this message makes. Empty unless the role is
    /// `assistant`.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        let is_assistant = self.role == MessageRole::Assistant;
        self.content.iter().filter_map(move |p| match p {
            ContentPart::ToolCall { tool_call_id, .. } if is_assistant => {
                Some(tool_call_id.as_str())
            }
            _ => None,
        })
    }

    /// Ids of the tool results this message carries. Empty unless the role
    /// is `tool`.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        let is_tool = self.role == MessageRole::Tool;
        self.content.iter().filter_map(move |p| match p {
            ContentPart::ToolResult { tool_call_id, .. } if is_tool => Some(tool_call_id.as_str()),
            _ => None,
        })
    }

    /// Name of the tool that produced the first result in this message.
    pub fn result_tool_name(&self) -> Option<&str> {
        self.content.iter().find_map(|p| match p {
            ContentPart::ToolResult { tool_name, .. } => Some(tool_name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.text(), "hello");

        let user = Message::user("world").with_tag("USER_PROMPT").with_sent_at(42);
        assert_eq!(user.role, MessageRole::User);
        assert!(user.has_tag("USER_PROMPT"));
        assert_eq!(user.sent_at, Some(42));

        let tool = Message::tool_result("call-1", "read_files", json!({"ok": true}));
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_result_ids().collect::<Vec<_>>(), vec!["call-1"]);
        assert_eq!(tool.result_tool_name(), Some("read_files"));
    }

    #[test]
    fn content_parts_use_wire_names() {
        let msg = Message::assistant(vec![
            ContentPart::text("on it"),
            ContentPart::tool_call("c1", "read_files", json!({"paths": ["a.rs"]})),
        ]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"][1]["type"], "tool-call");
        assert_eq!(value["content"][1]["toolCallId"], "c1");
        assert_eq!(value["content"][1]["toolName"], "read_files");
        assert!(value.get("pinned").is_none());
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn deserializes_camel_case_log_entries() {
        let raw = json!({
            "role": "tool",
            "content": [{
                "type": "tool-result",
                "toolCallId": "c9",
                "toolName": "run_terminal_command",
                "output": [{"type": "json", "value": {"stdout": "ok"}}]
            }],
            "sentAt": 1000,
            "keepLastTags": ["USER_PROMPT"]
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.sent_at, Some(1000));
        assert!(msg.keep_last_tags.contains("USER_PROMPT"));
        assert!(!msg.pinned);
        assert_eq!(msg.tool_result_ids().next(), Some("c9"));
    }

    #[test]
    fn tool_call_ids_ignore_non_assistant_roles() {
        let odd = Message::user_parts(vec![ContentPart::tool_call("c1", "x", json!({}))]);
        assert_eq!(odd.tool_call_ids().count(), 0);
    }

    #[test]
    fn media_detection_covers_tool_outputs() {
        let shot = Message::user_parts(vec![ContentPart::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "screenshot".into(),
            output: vec![ToolOutput::Media {
                data: "AAAA".into(),
                media_type: "image/png".into(),
            }],
        }]);
        assert!(shot.has_media());
        assert!(!Message::user("plain").has_media());
    }
}

//! Tool-call / tool-result integrity.
//!
//! Providers reject a request whose tool results reference calls that are
//! not in the log, and most also reject calls left without a result. After
//! any destructive edit the log must satisfy a bijection: the set of
//! tool-call ids in assistant messages equals the set of ids on tool-result
//! messages.
//!
//! [`resolve_orphans`] restores that in two steps:
//!
//! 1. drop tool-result parts (and tool messages left empty) whose call is
//!    gone;
//! 2. strip tool-call parts whose result is gone, dropping assistant
//!    messages left without content.
//!
//! Step 2 only removes calls that have no result, so it cannot orphan a
//! result, and running the resolver a second time changes nothing.

use crate::{ContentPart, Message, MessageRole};
use std::collections::HashSet;
use tracing::debug;

/// What [`resolve_orphans`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingReport {
    /// Tool-result parts dropped because their call was missing.
    pub orphan_results: usize,
    /// Tool-call parts stripped because their result was missing.
    pub orphan_calls: usize,
    /// Whole messages dropped because nothing was left in them.
    pub dropped_messages: usize,
}

impl PairingReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_results == 0 && self.orphan_calls == 0
    }
}

/// Ids of every tool call made by an assistant message.
pub fn tool_call_ids(messages: &[Message]) -> HashSet<&str> {
    messages.iter().flat_map(Message::tool_call_ids).collect()
}

/// Ids of every tool result carried by a tool message.
pub fn tool_result_ids(messages: &[Message]) -> HashSet<&str> {
    messages.iter().flat_map(Message::tool_result_ids).collect()
}

/// Whether call ids and result ids match exactly.
pub fn is_balanced(messages: &[Message]) -> bool {
    tool_call_ids(messages) == tool_result_ids(messages)
}

/// Remove orphaned tool results and tool calls, returning a new log.
pub fn resolve_orphans(messages: Vec<Message>) -> (Vec<Message>, PairingReport) {
    let mut report = PairingReport::default();

    let calls: HashSet<String> = tool_call_ids(&messages)
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut without_orphan_results = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role != MessageRole::Tool {
            without_orphan_results.push(msg);
            continue;
        }
        let before = msg.content.len();
        let content: Vec<ContentPart> = msg
            .content
            .iter()
            .filter(|p| match p {
                ContentPart::ToolResult { tool_call_id, .. } => calls.contains(tool_call_id),
                _ => true,
            })
            .cloned()
            .collect();
        let removed = before - content.len();
        if removed == 0 {
            without_orphan_results.push(msg);
            continue;
        }
        report.orphan_results += removed;
        if content.is_empty() {
            report.dropped_messages += 1;
        } else {
            without_orphan_results.push(msg.with_content(content));
        }
    }

    let results: HashSet<String> = tool_result_ids(&without_orphan_results)
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut resolved = Vec::with_capacity(without_orphan_results.len());
    for msg in without_orphan_results {
        if msg.role != MessageRole::Assistant {
            resolved.push(msg);
            continue;
        }
        let before = msg.content.len();
        let content: Vec<ContentPart> = msg
            .content
            .iter()
            .filter(|p| match p {
                ContentPart::ToolCall { tool_call_id, .. } => results.contains(tool_call_id),
                _ => true,
            })
            .cloned()
            .collect();
        let removed = before - content.len();
        if removed == 0 {
            resolved.push(msg);
            continue;
        }
        report.orphan_calls += removed;
        if content.is_empty() {
            report.dropped_messages += 1;
        } else {
            resolved.push(msg.with_content(content));
        }
    }

    if !report.is_clean() {
        debug!(
            "Resolved orphans: {} result(s), {} call(s), {} message(s) dropped",
            report.orphan_results, report.orphan_calls, report.dropped_messages
        );
    }
    (resolved, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ContentPart {
        ContentPart::tool_call(id, "read_files", json!({"paths": ["a.rs"]}))
    }

    fn result(id: &str) -> Message {
        Message::tool_result(id, "read_files", json!({"content": "..."}))
    }

    #[test]
    fn balanced_log_is_untouched() {
        let messages = vec![
            Message::user("go"),
            Message::assistant(vec![call("c1")]),
            result("c1"),
        ];
        let (out, report) = resolve_orphans(messages.clone());
        assert!(report.is_clean());
        assert_eq!(out, messages);
    }

    #[test]
    fn drops_result_without_call() {
        let messages = vec![Message::user("go"), result("ghost")];
        let (out, report) = resolve_orphans(messages);
        assert_eq!(report.orphan_results, 1);
        assert_eq!(report.dropped_messages, 1);
        assert_eq!(out.len(), 1);
        assert!(is_balanced(&out));
    }

    #[test]
    fn strips_call_without_result_and_keeps_text() {
        let messages = vec![Message::assistant(vec![
            ContentPart::text("let me look"),
            call("c1"),
            call("c2"),
        ]), result("c2")];
        let (out, report) = resolve_orphans(messages);
        assert_eq!(report.orphan_calls, 1);
        assert_eq!(report.dropped_messages, 0);
        assert_eq!(out[0].content.len(), 2);
        assert_eq!(out[0].text(), "let me look");
        assert!(is_balanced(&out));
    }

    #[test]
    fn drops_assistant_message_left_empty() {
        let messages = vec![Message::user("go"), Message::assistant(vec![call("c1")])];
        let (out, report) = resolve_orphans(messages);
        assert_eq!(report.dropped_messages, 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn results_in_non_tool_roles_do_not_count_as_pairs() {
        let stray = Message::user_parts(vec![ContentPart::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "read_files".into(),
            output: vec![],
        }]);
        let messages = vec![Message::assistant(vec![call("c1")]), stray];
        let (out, report) = resolve_orphans(messages);
        assert_eq!(report.orphan_calls, 1);
        assert!(is_balanced(&out));
    }

    #[test]
    fn resolving_twice_is_a_no_op() {
        let messages = vec![
            Message::assistant(vec![call("c1"), call("c2")]),
            result("c1"),
            result("c3"),
            Message::assistant(vec![call("c4")]),
        ];
        let (once, _) = resolve_orphans(messages);
        let (twice, report) = resolve_orphans(once.clone());
        assert!(report.is_clean());
        assert_eq!(once, twice);
        assert!(is_balanced(&twice));
    }
}

//! Narrative summarization: fold the whole log into one user message.
//!
//! Where staged eviction leaves a log of survivors and placeholders, the
//! summarizer replaces everything with a single digest: one or a few lines
//! per message, tool calls described by the [`DigestRegistry`], and tool
//! results mentioned only when they failed or carry a user's answer. No
//! model call is made; the digest is built mechanically.
//!
//! A summary produced by an earlier run is detected by its
//! `<conversation_summary>` wrapper and carried forward as plain prose, so
//! summarizing repeatedly never nests wrappers or repeats the header.
//!
//! The output is the summary message, followed by the most recent
//! "fresh instructions" message when one exists. Both are stamped with the
//! current time so the next cache-gap check measures from now.

use crate::context::budget::TokenEstimator;
use crate::context::digest::{DigestRegistry, preview};
use crate::context::tags::{TagConfig, last_index_with_tag};
use crate::tools::{ASK_USER, RUN_TERMINAL_COMMAND};
use crate::{ContentPart, Message, MessageRole, ToolOutput};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

pub const SUMMARY_OPEN: &str = "<conversation_summary>";
pub const SUMMARY_CLOSE: &str = "</conversation_summary>";

/// First line inside every summary wrapper.
pub const SUMMARY_HEADER: &str = "This is a summary of the conversation so far. The original messages have been condensed to save context space.";

/// Prefix left by older summary formats; stripped when carrying forward.
const PREVIOUS_SUMMARY_PREFIX: &str = "[PREVIOUS SUMMARY]";

/// Standing instruction appended after the summary.
const RESUME_INSTRUCTION: &str = "Please continue the conversation from here. In particular, try to address the user's latest request detailed in the summary above. You may need to re-gather context (e.g. read some files) to get up to speed and then tackle the user's request.";

/// Joins per-message digests.
pub const SEPARATOR: &str = "\n\n---\n\n";

/// Prepended when the oldest part of the narrative was dropped.
pub const TRUNCATION_NOTICE: &str =
    "[CONVERSATION TRUNCATED - Earlier messages omitted due to length]\n\n";

const SUMMARY_OMITTED: &str = "[Summary too large - content omitted]";

/// Characters reserved for the `[...truncated N chars...]` marker.
const TRUNCATION_RESERVE: usize = 50;

/// Share of the kept characters taken from the start of a truncated text.
const PREFIX_SHARE: f64 = 0.8;

fn summary_regex() -> &'static Regex {
    static SUMMARY_RE: OnceLock<Regex> = OnceLock::new();
    SUMMARY_RE.get_or_init(|| {
        Regex::new(r"(?s)<conversation_summary>(.*?)</conversation_summary>")
            .expect("summary regex is valid")
    })
}

fn think_regex() -> &'static Regex {
    static THINK_RE: OnceLock<Regex> = OnceLock::new();
    THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex is valid"))
}

/// Length limits and the narrative's share of the budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Character limit for one user message's text.
    pub user_message_limit: usize,
    /// Character limit for one assistant message's text.
    pub assistant_message_limit: usize,
    /// Characters of a tool error message to keep.
    pub error_preview_chars: usize,
    /// Characters of a user's answers to keep.
    pub answer_preview_chars: usize,
    /// Fraction of the effective budget the narrative may occupy.
    pub summary_fraction: f64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            user_message_limit: 15_000,
            assistant_message_limit: 4_000,
            error_preview_chars: 100,
            answer_preview_chars: 10_000,
            summary_fraction: 0.1,
        }
    }
}

impl SummarizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_message_limit(mut self, chars: usize) -> Self {
        self.user_message_limit = chars;
        self
    }

    pub fn with_assistant_message_limit(mut self, chars: usize) -> Self {
        self.assistant_message_limit = chars;
        self
    }

    pub fn with_summary_fraction(mut self, fraction: f64) -> Self {
        self.summary_fraction = fraction;
        self
    }
}

/// What the summarizer folded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    /// Messages digested into the narrative.
    pub messages_folded: usize,
    /// Whether an earlier summary was carried forward.
    pub carried_previous: bool,
    /// Whether the oldest part of the narrative was cut to fit.
    pub truncated: bool,
    /// Estimated cost of the narrative text.
    pub narrative_tokens: usize,
}

/// Keep the first 80% and last 20% of what fits in `limit` characters,
/// joined by a marker naming how much was cut.
///
/// Texts within the limit are returned unchanged. A limit too small for
/// the marker yields the marker alone.
///
/// ```
/// use cinch_compact::context::summarizer::truncate_middle;
///
/// let text = "a".repeat(500);
/// let cut = truncate_middle(&text, 150);
/// assert!(cut.starts_with(&"a".repeat(80)));
/// assert!(cut.contains("[...truncated 400 chars...]"));
/// ```
pub fn truncate_middle(text: &str, limit: usize) -> String {
    let len = text.chars().count();
    if len <= limit {
        return text.to_string();
    }
    let available = limit.saturating_sub(TRUNCATION_RESERVE);
    let prefix_len = (available as f64 * PREFIX_SHARE).floor() as usize;
    let suffix_len = available - prefix_len;
    let omitted = len - prefix_len - suffix_len;

    let prefix: String = text.chars().take(prefix_len).collect();
    let suffix: String = text.chars().skip(len - suffix_len).collect();
    format!("{prefix}\n\n[...truncated {omitted} chars...]\n\n{suffix}")
}

/// Pull the prose out of a summary wrapper, without header or legacy prefix.
fn unwrap_summary(text: &str) -> Option<String> {
    let inner = summary_regex().captures(text)?.get(1)?.as_str().trim();
    let inner = inner.strip_prefix(SUMMARY_HEADER).map_or(inner, str::trim);
    let inner = inner
        .strip_prefix(PREVIOUS_SUMMARY_PREFIX)
        .map_or(inner, str::trim);
    Some(inner.to_string())
}

fn text_parts(msg: &Message) -> impl Iterator<Item = &str> {
    msg.content.iter().filter_map(|p| match p {
        ContentPart::Text { text } => Some(text.as_str()),
        _ => None,
    })
}

fn is_summary_message(msg: &Message) -> bool {
    msg.role == MessageRole::User && text_parts(msg).any(|t| t.contains(SUMMARY_OPEN))
}

/// Whether a JSON field reported by a tool counts as set.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Folds a log into a single summary message.
pub struct Summarizer<'a> {
    config: &'a SummarizerConfig,
    tags: &'a TagConfig,
    estimator: TokenEstimator,
    digests: &'a DigestRegistry,
}

impl<'a> Summarizer<'a> {
    pub fn new(
        config: &'a SummarizerConfig,
        tags: &'a TagConfig,
        estimator: TokenEstimator,
        digests: &'a DigestRegistry,
    ) -> Self {
        Self {
            config,
            tags,
            estimator,
            digests,
        }
    }

    /// Replace `messages` with a summary sized to a fraction of `budget`.
    pub fn summarize(
        &self,
        mut messages: Vec<Message>,
        budget: usize,
        now_ms: i64,
    ) -> (Vec<Message>, SummaryReport) {
        let mut report = SummaryReport::default();

        let instructions = last_index_with_tag(&messages, &self.tags.fresh_instructions)
            .map(|idx| messages.remove(idx));

        let previous = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .flat_map(text_parts)
            .filter_map(unwrap_summary)
            .last();
        report.carried_previous = previous.is_some();

        let mut sections: Vec<String> = previous.into_iter().collect();
        for msg in messages
            .iter()
            .filter(|m| !self.tags.is_marker(m) && !is_summary_message(m))
        {
            report.messages_folded += 1;
            sections.extend(self.digest_message(msg));
        }

        let narrative = self.fit_to_budget(sections.join(SEPARATOR), budget, &mut report);
        report.narrative_tokens = self.estimator.estimate_text(&narrative);

        let summary = Message::user(format!(
            "{SUMMARY_OPEN}\n{SUMMARY_HEADER}\n\n{narrative}\n{SUMMARY_CLOSE}\n\n{RESUME_INSTRUCTION}"
        ))
        .with_sent_at(now_ms);

        let mut out = vec![summary];
        out.extend(instructions.map(|m| m.with_sent_at(now_ms)));

        debug!(
            "Summarized {} message(s) into ~{} tokens{}",
            report.messages_folded,
            report.narrative_tokens,
            if report.truncated { " (truncated)" } else { "" }
        );
        (out, report)
    }

    /// Digest lines for one message. Usually one, sometimes none, several
    /// for tool messages reporting more than one failure.
    fn digest_message(&self, msg: &Message) -> Vec<String> {
        match msg.role {
            MessageRole::User => self.digest_user(msg).into_iter().collect(),
            MessageRole::Assistant => self.digest_assistant(msg).into_iter().collect(),
            MessageRole::Tool => msg
                .content
                .iter()
                .flat_map(|p| self.digest_result(p))
                .collect(),
            MessageRole::System => Vec::new(),
        }
    }

    fn digest_user(&self, msg: &Message) -> Option<String> {
        let text = msg.text();
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let has_images = msg
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. } | ContentPart::File { .. }));
        let note = if has_images { " [with image(s)]" } else { "" };
        Some(format!(
            "[USER]{note}\n{}",
            truncate_middle(text, self.config.user_message_limit)
        ))
    }

    fn digest_assistant(&self, msg: &Message) -> Option<String> {
        let mut texts = Vec::new();
        let mut tools = Vec::new();
        for part in &msg.content {
            match part {
                ContentPart::Text { text } => {
                    let stripped = think_regex().replace_all(text, "");
                    let stripped = stripped.trim();
                    if !stripped.is_empty() {
                        texts.push(stripped.to_string());
                    }
                }
                ContentPart::ToolCall {
                    tool_name, input, ..
                } => tools.push(self.digests.describe(tool_name, input)),
                _ => {}
            }
        }

        let mut lines = Vec::new();
        if !texts.is_empty() {
            lines.push(truncate_middle(
                &texts.join("\n"),
                self.config.assistant_message_limit,
            ));
        }
        if !tools.is_empty() {
            lines.push(format!("Tools: {}", tools.join("; ")));
        }
        if lines.is_empty() {
            None
        } else {
            Some(format!("[ASSISTANT]\n{}", lines.join("\n")))
        }
    }

    /// Errors, failed commands, and user answers. Successful results are
    /// already implied by the call's digest.
    fn digest_result(&self, part: &ContentPart) -> Vec<String> {
        let ContentPart::ToolResult {
            tool_name, output, ..
        } = part
        else {
            return Vec::new();
        };

        let mut lines = Vec::new();
        for value in output.iter().filter_map(|o| match o {
            ToolOutput::Json { value } => Some(value),
            ToolOutput::Media { .. } => None,
        }) {
            let error = [value.get("errorMessage"), value.get("error")]
                .into_iter()
                .flatten()
                .find(|v| truthy(v));
            if let Some(error) = error {
                lines.push(format!(
                    "[TOOL ERROR: {tool_name}] {}",
                    preview(&display(error), self.config.error_preview_chars)
                ));
            }

            if tool_name == RUN_TERMINAL_COMMAND
                && let Some(code) = value.get("exitCode")
                && !code.is_null()
                && code.as_i64() != Some(0)
            {
                lines.push(format!("[COMMAND FAILED] Exit code: {code}"));
            }

            if tool_name == ASK_USER {
                if value.get("skipped").is_some_and(truthy) {
                    lines.push("[USER SKIPPED QUESTION]".to_string());
                } else if let Some(answers) = value
                    .get("answers")
                    .and_then(Value::as_array)
                    .filter(|a| !a.is_empty())
                {
                    let joined = answers
                        .iter()
                        .map(describe_answer)
                        .collect::<Vec<_>>()
                        .join("; ");
                    lines.push(format!(
                        "[USER ANSWERED] {}",
                        preview(&joined, self.config.answer_preview_chars)
                    ));
                }
            }
        }
        lines
    }

    /// Cap the narrative at `summary_fraction` of `budget`, dropping the
    /// oldest content at a clean separator when possible.
    fn fit_to_budget(&self, narrative: String, budget: usize, report: &mut SummaryReport) -> String {
        let target = budget as f64 * self.config.summary_fraction;
        if self.estimator.estimate_text(&narrative) as f64 <= target {
            return narrative;
        }

        let available = target - self.estimator.estimate_text(TRUNCATION_NOTICE) as f64;
        let chars_to_keep = (available * self.estimator.bytes_per_token as f64).floor();
        if chars_to_keep <= 0.0 {
            report.truncated = true;
            return format!("{TRUNCATION_NOTICE}{SUMMARY_OMITTED}");
        }

        let keep = chars_to_keep as usize;
        let len = narrative.chars().count();
        if keep >= len {
            return narrative;
        }
        report.truncated = true;
        let tail: String = narrative.chars().skip(len - keep).collect();
        match tail.split_once(SEPARATOR) {
            Some((dropped, rest)) if dropped.len() < tail.len() / 2 => {
                format!("{TRUNCATION_NOTICE}{rest}")
            }
            _ => format!("{TRUNCATION_NOTICE}{tail}"),
        }
    }
}

fn describe_answer(answer: &Value) -> String {
    if let Some(other) = answer.get("otherText").filter(|v| truthy(v)) {
        return display(other);
    }
    if let Some(options) = answer.get("selectedOptions").and_then(Value::as_array) {
        return options
            .iter()
            .map(display)
            .collect::<Vec<_>>()
            .join(", ");
    }
    if let Some(option) = answer.get("selectedOption").filter(|v| truthy(v)) {
        return display(option);
    }
    "(no answer)".to_string()
}

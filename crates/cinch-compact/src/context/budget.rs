//! Token accounting: estimates what a message log will cost against the
//! provider's context window.
//!
//! Estimation is a byte heuristic over the JSON wire form: every 3 bytes of
//! serialized message count as one token. Media parts (images, files, media
//! tool outputs) are priced by a fixed constant instead. Their encoded
//! payloads are never serialized for costing; base64 would both be slow and
//! overstate what the provider actually bills after compression.

use crate::{ContentPart, Message, MessageRole, ToolOutput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Default bytes of serialized JSON per estimated token.
pub const DEFAULT_BYTES_PER_TOKEN: usize = 3;

/// Default flat cost of one media part, regardless of payload size.
pub const DEFAULT_MEDIA_TOKENS: usize = 1000;

/// Conservative estimate used when a part cannot be serialized.
pub const FALLBACK_PART_TOKENS: usize = 10_000;

/// Default context window size in tokens.
const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Default fraction of the tool-definition cost charged against the budget.
const DEFAULT_TOOL_DEFINITION_WEIGHT: f64 = 0.75;

/// Prices messages and content parts in estimated tokens.
///
/// # Example
///
/// ```
/// use cinch_compact::Message;
/// use cinch_compact::context::TokenEstimator;
///
/// let estimator = TokenEstimator::default();
/// let tokens = estimator.estimate_message(&Message::user("hello"));
/// assert!(tokens > 0);
/// ```
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TokenEstimator {
    /// Serialized bytes per token.
    pub bytes_per_token: usize,
    /// Flat cost of a media part.
    pub media_tokens: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            bytes_per_token: DEFAULT_BYTES_PER_TOKEN,
            media_tokens: DEFAULT_MEDIA_TOKENS,
        }
    }
}

/// The non-content fields of a message, serialized the same way as
/// [`Message`] so the envelope cost matches the whole-message path.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    role: MessageRole,
    #[serde(skip_serializing_if = "is_empty_set")]
    tags: &'a BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sent_at: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pinned: bool,
    #[serde(skip_serializing_if = "is_empty_set")]
    keep_last_tags: &'a BTreeSet<String>,
}

fn is_empty_set(set: &&BTreeSet<String>) -> bool {
    set.is_empty()
}

/// A tool-result part without its outputs.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultSkeleton<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    tool_call_id: &'a str,
    tool_name: &'a str,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes_per_token(mut self, bytes: usize) -> Self {
        self.bytes_per_token = bytes;
        self
    }

    pub fn with_media_tokens(mut self, tokens: usize) -> Self {
        self.media_tokens = tokens;
        self
    }

    /// `ceil(bytes / bytes_per_token)`.
    pub fn tokens_for_bytes(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.bytes_per_token.max(1))
    }

    fn serialized<T: Serialize + ?Sized>(&self, value: &T) -> usize {
        match serde_json::to_string(value) {
            Ok(json) => self.tokens_for_bytes(json.len()),
            Err(e) => {
                warn!("Token estimate fell back to {FALLBACK_PART_TOKENS}: {e}");
                FALLBACK_PART_TOKENS
            }
        }
    }

    /// Cost of a bare string, measured as its JSON-encoded form.
    pub fn estimate_text(&self, text: &str) -> usize {
        self.serialized(text)
    }

    /// Cost of one content part.
    pub fn estimate_part(&self, part: &ContentPart) -> usize {
        match part {
            ContentPart::Image { .. } | ContentPart::File { .. } => self.media_tokens,
            ContentPart::ToolResult {
                tool_call_id,
                tool_name,
                output,
            } if output.iter().any(ToolOutput::is_media) => {
                let skeleton = ResultSkeleton {
                    kind: "tool-result",
                    tool_call_id,
                    tool_name,
                };
                let outputs: usize = output
                    .iter()
                    .map(|o| {
                        if o.is_media() {
                            self.media_tokens
                        } else {
                            self.serialized(o)
                        }
                    })
                    .sum();
                self.serialized(&skeleton) + outputs
            }
            other => self.serialized(other),
        }
    }

    /// Cost of one message.
    ///
    /// Messages without media are serialized whole. Messages with media are
    /// priced part by part plus their envelope, so the payload is never
    /// encoded.
    pub fn estimate_message(&self, msg: &Message) -> usize {
        if !msg.has_media() {
            return self.serialized(msg);
        }
        let envelope = Envelope {
            role: msg.role,
            tags: &msg.tags,
            sent_at: msg.sent_at,
            pinned: msg.pinned,
            keep_last_tags: &msg.keep_last_tags,
        };
        let parts: usize = msg.content.iter().map(|p| self.estimate_part(p)).sum();
        self.serialized(&envelope) + parts
    }

    /// Sum of [`estimate_message`](Self::estimate_message) over a log.
    pub fn estimate_total(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Snapshot of a log's usage against `budget_tokens`.
    pub fn usage(&self, messages: &[Message], budget_tokens: usize) -> ContextUsage {
        let estimated_tokens = self.estimate_total(messages);
        let usage_pct = if budget_tokens > 0 {
            estimated_tokens as f64 / budget_tokens as f64
        } else {
            1.0
        };
        ContextUsage {
            estimated_tokens,
            budget_tokens,
            usage_pct,
        }
    }
}

/// Context window and fixed per-request overhead.
///
/// The system prompt and tool definitions travel with every request but are
/// not part of the message log, so they are subtracted up front.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Provider context window in tokens.
    pub max_context_tokens: usize,
    /// Estimated cost of the system prompt.
    pub system_prompt_tokens: usize,
    /// Estimated cost of the tool definitions.
    pub tool_definition_tokens: usize,
    /// Fraction of `tool_definition_tokens` charged against the window.
    pub tool_definition_weight: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_CONTEXT_WINDOW,
            system_prompt_tokens: 0,
            tool_definition_tokens: 0,
            tool_definition_weight: DEFAULT_TOOL_DEFINITION_WEIGHT,
        }
    }
}

impl BudgetConfig {
    pub fn new(max_context_tokens: usize) -> Self {
        Self {
            max_context_tokens,
            ..Self::default()
        }
    }

    pub fn with_system_prompt_tokens(mut self, tokens: usize) -> Self {
        self.system_prompt_tokens = tokens;
        self
    }

    pub fn with_tool_definition_tokens(mut self, tokens: usize) -> Self {
        self.tool_definition_tokens = tokens;
        self
    }

    pub fn with_tool_definition_weight(mut self, weight: f64) -> Self {
        self.tool_definition_weight = weight;
        self
    }

    /// Tokens available to the message log:
    /// `max − system − ceil(tools × weight)`, saturating at zero.
    pub fn effective_budget(&self) -> usize {
        let tool_overhead =
            (self.tool_definition_tokens as f64 * self.tool_definition_weight.max(0.0)).ceil();
        self.max_context_tokens
            .saturating_sub(self.system_prompt_tokens)
            .saturating_sub(tool_overhead as usize)
    }
}

/// Snapshot of a log's estimated usage.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    /// Estimated tokens consumed by the log.
    pub estimated_tokens: usize,
    /// Effective budget the log is measured against.
    pub budget_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn is_over_budget(&self) -> bool {
        self.estimated_tokens > self.budget_tokens
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.budget_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_message(payload_len: usize) -> Message {
        Message::user_parts(vec![
            ContentPart::text("see attached"),
            ContentPart::Image {
                image: "A".repeat(payload_len),
                media_type: Some("image/png".into()),
            },
        ])
    }

    #[test]
    fn generic_cost_is_ceil_of_serialized_bytes() {
        let est = TokenEstimator::default();
        let msg = Message::user("abcd");
        let bytes = serde_json::to_string(&msg).unwrap().len();
        assert_eq!(est.estimate_message(&msg), bytes.div_ceil(3));
    }

    #[test]
    fn media_cost_is_independent_of_payload_size() {
        let est = TokenEstimator::default();
        let small = est.estimate_message(&image_message(10));
        let huge = est.estimate_message(&image_message(5_000_000));
        assert_eq!(small, huge);
        assert!(small >= DEFAULT_MEDIA_TOKENS);
        assert!(small < DEFAULT_MEDIA_TOKENS + 100);
    }

    #[test]
    fn media_tool_output_priced_by_constant() {
        let est = TokenEstimator::default().with_media_tokens(500);
        let part = ContentPart::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "browser".into(),
            output: vec![
                ToolOutput::Media {
                    data: "B".repeat(1_000_000),
                    media_type: "image/png".into(),
                },
                ToolOutput::json(json!({"url": "https://example.com"})),
            ],
        };
        let cost = est.estimate_part(&part);
        assert!(cost >= 500);
        assert!(cost < 600);
    }

    #[test]
    fn envelope_fields_are_charged_for_media_messages() {
        let est = TokenEstimator::default();
        let plain = est.estimate_message(&image_message(10));
        let tagged = est.estimate_message(
            &image_message(10)
                .with_tag("A_VERY_LONG_LIFECYCLE_TAG_NAME")
                .keep_last("ANOTHER_LONG_TAG"),
        );
        assert!(tagged > plain);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    #[test]
    fn serialization_failure_falls_back_to_upper_bound() {
        let est = TokenEstimator::default();
        assert_eq!(est.serialized(&Unserializable), FALLBACK_PART_TOKENS);
    }

    #[test]
    fn total_sums_messages() {
        let est = TokenEstimator::default();
        let msgs = vec![Message::user("a"), Message::assistant_text("b")];
        assert_eq!(
            est.estimate_total(&msgs),
            est.estimate_message(&msgs[0]) + est.estimate_message(&msgs[1])
        );
    }

    #[test]
    fn effective_budget_subtracts_weighted_overhead() {
        let budget = BudgetConfig::new(100_000)
            .with_system_prompt_tokens(5_000)
            .with_tool_definition_tokens(10_000)
            .with_tool_definition_weight(0.5);
        assert_eq!(budget.effective_budget(), 100_000 - 5_000 - 5_000);
    }

    #[test]
    fn effective_budget_saturates_at_zero() {
        let budget = BudgetConfig::new(1_000)
            .with_system_prompt_tokens(800)
            .with_tool_definition_tokens(500);
        assert_eq!(budget.effective_budget(), 0);
    }

    #[test]
    fn usage_log_string_format() {
        let est = TokenEstimator::default();
        let usage = est.usage(&[Message::user("hello world")], 1000);
        assert!(!usage.is_over_budget());
        let log = usage.to_log_string();
        assert!(log.contains("context:"));
        assert!(log.contains("of 1000"));
    }

    #[test]
    fn zero_budget_reports_full_usage() {
        let est = TokenEstimator::default();
        let usage = est.usage(&[], 0);
        assert_eq!(usage.usage_pct, 1.0);
    }
}

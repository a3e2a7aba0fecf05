//! Prompt-cache expiry detection.
//!
//! Providers cache the prompt prefix for a few minutes. Once that cache has
//! expired, the next request pays full price whatever its size, so this is
//! the cheapest moment to shrink the prefix too. Compacting later would pay
//! for an uncached prefix twice.
//!
//! The gap is measured between the user's live prompt and the nearest
//! assistant message before it. Tool messages are skipped because they
//! usually carry no timestamp.

use crate::{Message, MessageRole};
use tracing::debug;

/// Default provider prompt-cache time-to-live (five minutes).
pub const DEFAULT_CACHE_TTL_MS: i64 = 5 * 60 * 1000;

/// What the monitor concluded about the prompt cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Not enough information: no live prompt, nothing before it, or a
    /// missing timestamp.
    Unknown,
    /// The gap is within the TTL; the cache should still be warm.
    Warm { gap_ms: i64 },
    /// The gap exceeds the TTL; the next request will miss the cache.
    Expired { gap_ms: i64 },
}

impl CacheState {
    pub fn will_miss(&self) -> bool {
        matches!(self, CacheState::Expired { .. })
    }
}

/// Detects imminent prompt-cache misses from message timestamps.
#[derive(Debug, Clone)]
pub struct CacheMonitor<'a> {
    live_prompt_tag: &'a str,
    ttl_ms: i64,
}

impl<'a> CacheMonitor<'a> {
    pub fn new(live_prompt_tag: &'a str, ttl_ms: i64) -> Self {
        Self {
            live_prompt_tag,
            ttl_ms,
        }
    }

    /// Inspect the log.
    pub fn check(&self, messages: &[Message]) -> CacheState {
        let Some(prompt_idx) = messages
            .iter()
            .rposition(|m| m.has_tag(self.live_prompt_tag))
        else {
            return CacheState::Unknown;
        };
        if prompt_idx == 0 {
            return CacheState::Unknown;
        }

        let Some(assistant) = messages[..prompt_idx]
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
        else {
            return CacheState::Unknown;
        };

        let (Some(prompt_at), Some(assistant_at)) = (messages[prompt_idx].sent_at, assistant.sent_at)
        else {
            return CacheState::Unknown;
        };

        let gap_ms = prompt_at.saturating_sub(assistant_at);
        if gap_ms > self.ttl_ms {
            debug!(
                "Prompt cache expired: {gap_ms}ms since last assistant turn (ttl {}ms)",
                self.ttl_ms
            );
            CacheState::Expired { gap_ms }
        } else {
            CacheState::Warm { gap_ms }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tags::USER_PROMPT;

    fn monitor() -> CacheMonitor<'static> {
        CacheMonitor::new(USER_PROMPT, DEFAULT_CACHE_TTL_MS)
    }

    #[test]
    fn long_gap_reports_expired() {
        let messages = vec![
            Message::user("first").with_sent_at(0),
            Message::assistant_text("reply").with_sent_at(1_000),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(1_000 + 301_000),
        ];
        let state = monitor().check(&messages);
        assert_eq!(state, CacheState::Expired { gap_ms: 301_000 });
        assert!(state.will_miss());
    }

    #[test]
    fn short_gap_reports_warm() {
        let messages = vec![
            Message::assistant_text("reply").with_sent_at(10_000),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(20_000),
        ];
        assert_eq!(monitor().check(&messages), CacheState::Warm { gap_ms: 10_000 });
    }

    #[test]
    fn gap_equal_to_ttl_is_still_warm() {
        let messages = vec![
            Message::assistant_text("reply").with_sent_at(0),
            Message::user("next")
                .with_tag(USER_PROMPT)
                .with_sent_at(DEFAULT_CACHE_TTL_MS),
        ];
        assert!(!monitor().check(&messages).will_miss());
    }

    #[test]
    fn skips_tool_messages_to_find_assistant() {
        let messages = vec![
            Message::assistant_text("calling").with_sent_at(0),
            Message::tool_result("c1", "read_files", serde_json::json!({})),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(400_000),
        ];
        assert!(monitor().check(&messages).will_miss());
    }

    #[test]
    fn missing_timestamps_are_unknown() {
        let messages = vec![
            Message::assistant_text("reply"),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(400_000),
        ];
        assert_eq!(monitor().check(&messages), CacheState::Unknown);
    }

    #[test]
    fn prompt_at_start_or_absent_is_unknown() {
        let first = vec![Message::user("only").with_tag(USER_PROMPT).with_sent_at(1)];
        assert_eq!(monitor().check(&first), CacheState::Unknown);
        assert_eq!(monitor().check(&[Message::user("x")]), CacheState::Unknown);
    }

    #[test]
    fn extreme_timestamps_saturate() {
        let messages = vec![
            Message::assistant_text("reply").with_sent_at(i64::MIN),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(i64::MAX),
        ];
        assert_eq!(monitor().check(&messages), CacheState::Expired { gap_ms: i64::MAX });

        let reversed = vec![
            Message::assistant_text("reply").with_sent_at(i64::MAX),
            Message::user("next").with_tag(USER_PROMPT).with_sent_at(i64::MIN),
        ];
        assert_eq!(monitor().check(&reversed), CacheState::Warm { gap_ms: i64::MIN });
    }

    #[test]
    fn uses_most_recent_live_prompt() {
        let messages = vec![
            Message::assistant_text("a").with_sent_at(0),
            Message::user("old").with_tag(USER_PROMPT).with_sent_at(900_000),
            Message::assistant_text("b").with_sent_at(900_100),
            Message::user("new").with_tag(USER_PROMPT).with_sent_at(900_200),
        ];
        assert_eq!(monitor().check(&messages), CacheState::Warm { gap_ms: 100 });
    }
}

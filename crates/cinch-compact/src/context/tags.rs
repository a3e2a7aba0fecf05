//! Lifecycle tags and pass-0 tag hygiene.
//!
//! The caller regenerates some messages on every invocation: the "fresh
//! instructions" prompt and the "sub-spawn" marker. The most recent copy of
//! each belongs to the invocation that asked for compaction, so it is dropped
//! before anything else runs. Otherwise they would pile up as duplicates.

use crate::Message;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Default tag on the per-invocation instructions prompt.
pub const INSTRUCTIONS_PROMPT: &str = "INSTRUCTIONS_PROMPT";
/// Default tag on the per-invocation sub-agent spawn marker.
pub const SUBAGENT_SPAWN: &str = "SUBAGENT_SPAWN";
/// Default tag on per-step prompts.
pub const STEP_PROMPT: &str = "STEP_PROMPT";
/// Default tag on the user's live prompt.
pub const USER_PROMPT: &str = "USER_PROMPT";

/// Names of the tags the engine gives meaning to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Marks the "fresh instructions" message regenerated every invocation.
    pub fresh_instructions: String,
    /// Marks the "fresh sub-spawn" message regenerated every invocation.
    pub fresh_spawn: String,
    /// Marks per-step prompts, which never make it into a summary.
    pub step_prompt: String,
    /// Marks the user's live prompt (used by the cache monitor).
    pub live_prompt: String,
    /// Tags whose most recent bearer must always survive, in addition to
    /// whatever messages list in their own `keep_last_tags`.
    pub keep_last: BTreeSet<String>,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            fresh_instructions: INSTRUCTIONS_PROMPT.to_string(),
            fresh_spawn: SUBAGENT_SPAWN.to_string(),
            step_prompt: STEP_PROMPT.to_string(),
            live_prompt: USER_PROMPT.to_string(),
            keep_last: BTreeSet::new(),
        }
    }
}

impl TagConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_live_prompt(mut self, tag: impl Into<String>) -> Self {
        self.live_prompt = tag.into();
        self
    }

    pub fn keep_last(mut self, tag: impl Into<String>) -> Self {
        self.keep_last.insert(tag.into());
        self
    }

    /// Whether a message is one of the per-invocation markers that never
    /// belongs in a summary.
    pub fn is_marker(&self, msg: &Message) -> bool {
        msg.has_tag(&self.fresh_instructions)
            || msg.has_tag(&self.fresh_spawn)
            || msg.has_tag(&self.step_prompt)
    }

    /// Every keep-last tag in effect for `messages`: the configured set plus
    /// each message's own `keep_last_tags`.
    pub fn keep_last_tags<'a>(&'a self, messages: &'a [Message]) -> BTreeSet<&'a str> {
        self.keep_last
            .iter()
            .map(String::as_str)
            .chain(
                messages
                    .iter()
                    .flat_map(|m| m.keep_last_tags.iter().map(String::as_str)),
            )
            .collect()
    }

    /// Indices of the most recent bearer of each keep-last tag.
    pub fn keep_last_indices(&self, messages: &[Message]) -> HashSet<usize> {
        self.keep_last_tags(messages)
            .into_iter()
            .filter_map(|tag| last_index_with_tag(messages, tag))
            .collect()
    }
}

/// Index of the most recent message carrying `tag`.
pub fn last_index_with_tag(messages: &[Message], tag: &str) -> Option<usize> {
    messages.iter().rposition(|m| m.has_tag(tag))
}

/// Pass 0: drop the most recent "fresh instructions" message and the most
/// recent "fresh sub-spawn" message.
///
/// Returns the remaining log and how many messages were removed (0–2).
pub fn apply_tag_hygiene(messages: Vec<Message>, tags: &TagConfig) -> (Vec<Message>, usize) {
    let mut drop = HashSet::new();
    if let Some(idx) = last_index_with_tag(&messages, &tags.fresh_instructions) {
        drop.insert(idx);
    }
    // Searched on the log without the instructions message, so one message
    // carrying both tags still leaves the previous spawn marker in place.
    let spawn = messages
        .iter()
        .enumerate()
        .rev()
        .find(|(i, m)| !drop.contains(i) && m.has_tag(&tags.fresh_spawn))
        .map(|(i, _)| i);
    if let Some(idx) = spawn {
        drop.insert(idx);
    }

    if drop.is_empty() {
        return (messages, 0);
    }
    debug!("Tag hygiene dropped {} marker message(s)", drop.len());
    let removed = drop.len();
    let kept = messages
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, m)| m)
        .collect();
    (kept, removed)
}

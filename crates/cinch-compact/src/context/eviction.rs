//! Staged eviction: shrink a log with no model call by redacting bulky tool
//! output and coalescing old messages into placeholders.
//!
//! Tool results are the single largest context consumer in any agent loop.
//! A terminal command can return thousands of lines and a file read can
//! inject 30KB, yet most of it is irrelevant once the model has processed
//! it. The evictor works in passes, cheapest and least lossy first, and
//! re-measures after each one so it stops as soon as the log fits:
//!
//! 1. **Shell redaction:** older terminal results keep only their command.
//! 2. **Large-result redaction:** any result over a size threshold keeps
//!    only its original size.
//! 3. **Message eviction:** whole messages, oldest first, are replaced by
//!    one placeholder per contiguous run. Pinned messages, the latest bearer
//!    of each keep-last tag, and every tool pair touching them are kept.
//!    Tool pairs are evicted atomically.
//! 4. **Integrity:** [`resolve_orphans`] restores call/result pairing.
//!
//! Tag hygiene (pass 0) is applied by the [`Compactor`](crate::compactor::Compactor)
//! before a strategy is chosen, so it is not repeated here.

use crate::context::budget::TokenEstimator;
use crate::context::pairing::{PairingReport, resolve_orphans};
use crate::context::tags::TagConfig;
use crate::tools::SHELL_TOOLS;
use crate::{ContentPart, Message, MessageRole, ToolOutput};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

/// Text of the synthetic message that replaces a run of evicted messages.
pub const DEFAULT_PLACEHOLDER_TEXT: &str =
    "<system>Previous message(s) omitted due to length</system>";

/// Tunables for the eviction passes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Tools whose results are command output, redacted by pass 1.
    pub shell_tools: BTreeSet<String>,
    /// How many of the most recent shell results keep their full output.
    pub keep_recent_shell_results: usize,
    /// Results whose serialized output exceeds this many characters are
    /// stubbed by pass 2.
    pub large_result_chars: usize,
    /// Fraction of the remaining headroom reserved for placeholder overhead
    /// and estimation slack in pass 3.
    pub shortened_factor: f64,
    /// Placeholder message text.
    pub placeholder_text: String,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            shell_tools: SHELL_TOOLS.iter().map(|s| s.to_string()).collect(),
            keep_recent_shell_results: 5,
            large_result_chars: 1000,
            shortened_factor: 0.5,
            placeholder_text: DEFAULT_PLACEHOLDER_TEXT.to_string(),
        }
    }
}

impl EvictionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as a shell tool for pass 1.
    pub fn shell_tool(mut self, name: impl Into<String>) -> Self {
        self.shell_tools.insert(name.into());
        self
    }

    pub fn with_keep_recent_shell_results(mut self, count: usize) -> Self {
        self.keep_recent_shell_results = count;
        self
    }

    pub fn with_large_result_chars(mut self, chars: usize) -> Self {
        self.large_result_chars = chars;
        self
    }

    pub fn with_shortened_factor(mut self, factor: f64) -> Self {
        self.shortened_factor = factor;
        self
    }

    pub fn with_placeholder_text(mut self, text: impl Into<String>) -> Self {
        self.placeholder_text = text.into();
        self
    }

    /// The synthetic message substituted for one run of evicted messages.
    pub fn placeholder(&self) -> Message {
        Message::user(self.placeholder_text.clone())
    }
}

/// An eviction pass, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPass {
    ShellRedaction,
    LargeResultRedaction,
    MessageEviction,
    Integrity,
}

impl std::fmt::Display for EvictionPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPass::ShellRedaction => write!(f, "shell redaction"),
            EvictionPass::LargeResultRedaction => write!(f, "large-result redaction"),
            EvictionPass::MessageEviction => write!(f, "message eviction"),
            EvictionPass::Integrity => write!(f, "integrity"),
        }
    }
}

/// What each pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// Cost of everything pass 3 was not allowed to evict.
    pub required_tokens: usize,
    pub shell_results_redacted: usize,
    pub large_results_redacted: usize,
    pub messages_evicted: usize,
    pub placeholders_inserted: usize,
    pub pairing: PairingReport,
    /// First pass after which the log fit the budget, if any did.
    pub settled_after: Option<EvictionPass>,
}

/// Runs passes 1 to 4 against one budget.
#[derive(Debug, Clone)]
pub struct StageEvictor<'a> {
    config: &'a EvictionConfig,
    estimator: TokenEstimator,
    tags: &'a TagConfig,
}

impl<'a> StageEvictor<'a> {
    pub fn new(config: &'a EvictionConfig, estimator: TokenEstimator, tags: &'a TagConfig) -> Self {
        Self {
            config,
            estimator,
            tags,
        }
    }

    /// Shrink `messages` toward `budget` tokens.
    ///
    /// Pass 1 always runs. Later passes run only while the log is still over
    /// budget. Pass 4 always runs last.
    pub fn evict(&self, messages: Vec<Message>, budget: usize) -> (Vec<Message>, EvictionReport) {
        let mut report = EvictionReport {
            tokens_before: self.estimator.estimate_total(&messages),
            ..EvictionReport::default()
        };

        let (mut messages, redacted) = self.redact_shell_results(messages);
        report.shell_results_redacted = redacted;
        let mut total = self.estimator.estimate_total(&messages);
        trace!("After shell redaction: ~{total} tokens (budget {budget})");
        if total <= budget {
            report.settled_after = Some(EvictionPass::ShellRedaction);
        }

        if report.settled_after.is_none() {
            let (next, redacted) = self.redact_large_results(messages);
            messages = next;
            report.large_results_redacted = redacted;
            total = self.estimator.estimate_total(&messages);
            trace!("After large-result redaction: ~{total} tokens (budget {budget})");
            if total <= budget {
                report.settled_after = Some(EvictionPass::LargeResultRedaction);
            }
        }

        if report.settled_after.is_none() {
            let (next, outcome) = self.evict_messages(messages, budget);
            messages = next;
            report.required_tokens = outcome.required_tokens;
            report.messages_evicted = outcome.evicted;
            report.placeholders_inserted = outcome.placeholders;
            total = self.estimator.estimate_total(&messages);
            if total <= budget {
                report.settled_after = Some(EvictionPass::MessageEviction);
            }
        }

        let (messages, pairing) = resolve_orphans(messages);
        report.pairing = pairing;
        report.tokens_after = self.estimator.estimate_total(&messages);
        if report.settled_after.is_none() && report.tokens_after <= budget {
            report.settled_after = Some(EvictionPass::Integrity);
        }

        debug!(
            "Eviction: ~{} -> ~{} tokens (budget {budget}), {} shell / {} large redacted, {} evicted into {} placeholder(s)",
            report.tokens_before,
            report.tokens_after,
            report.shell_results_redacted,
            report.large_results_redacted,
            report.messages_evicted,
            report.placeholders_inserted,
        );
        (messages, report)
    }

    // ── Pass 1: shell redaction ────────────────────────────────────

    fn is_shell_result(&self, msg: &Message) -> bool {
        msg.role == MessageRole::Tool
            && msg.content.iter().any(|p| match p {
                ContentPart::ToolResult { tool_name, .. } => self.config.shell_tools.contains(tool_name),
                _ => false,
            })
    }

    /// Keep the newest K shell results whole; older ones keep only their
    /// command. Returns the new log and how many results were redacted.
    pub fn redact_shell_results(&self, messages: Vec<Message>) -> (Vec<Message>, usize) {
        let commands = call_commands(&messages);
        let mut seen = 0;
        let mut redacted = 0;

        let mut out: Vec<Message> = Vec::with_capacity(messages.len());
        for msg in messages.into_iter().rev() {
            if !self.is_shell_result(&msg) {
                out.push(msg);
                continue;
            }
            seen += 1;
            if seen <= self.config.keep_recent_shell_results || msg.pinned {
                out.push(msg);
                continue;
            }
            let mut changed = false;
            let content = msg
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_call_id,
                        tool_name,
                        output,
                    } if self.config.shell_tools.contains(tool_name) && !is_shell_stub(output) => {
                        changed = true;
                        let command = result_command(output)
                            .or_else(|| commands.get(tool_call_id).map(String::as_str))
                            .unwrap_or_default();
                        ContentPart::ToolResult {
                            tool_call_id: tool_call_id.clone(),
                            tool_name: tool_name.clone(),
                            output: vec![ToolOutput::json(json!({
                                "command": command,
                                "omitted": true
                            }))],
                        }
                    }
                    other => other.clone(),
                })
                .collect();
            if changed {
                redacted += 1;
                out.push(msg.with_content(content));
            } else {
                out.push(msg);
            }
        }
        out.reverse();

        if redacted > 0 {
            debug!("Redacted {redacted} older shell result(s)");
        }
        (out, redacted)
    }

    // ── Pass 2: large-result redaction ─────────────────────────────

    /// Replace every tool result larger than the threshold with a size stub.
    /// Returns the new log and how many result parts were redacted.
    pub fn redact_large_results(&self, messages: Vec<Message>) -> (Vec<Message>, usize) {
        let mut redacted = 0;
        let out = messages
            .into_iter()
            .map(|msg| {
                if msg.role != MessageRole::Tool || msg.pinned {
                    return msg;
                }
                let mut changed = false;
                let content: Vec<ContentPart> = msg
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::ToolResult {
                            tool_call_id,
                            tool_name,
                            output,
                        } if !is_stub(output) => {
                            let size = output_size(output);
                            if size <= self.config.large_result_chars {
                                return part.clone();
                            }
                            changed = true;
                            redacted += 1;
                            ContentPart::ToolResult {
                                tool_call_id: tool_call_id.clone(),
                                tool_name: tool_name.clone(),
                                output: vec![ToolOutput::json(json!({
                                    "omitted": true,
                                    "originalSize": size
                                }))],
                            }
                        }
                        other => other.clone(),
                    })
                    .collect();
                if changed { msg.with_content(content) } else { msg }
            })
            .collect();

        if redacted > 0 {
            debug!(
                "Redacted {redacted} tool result(s) over {} chars",
                self.config.large_result_chars
            );
        }
        (out, redacted)
    }

    // ── Pass 3: message eviction ───────────────────────────────────

    fn evict_messages(&self, messages: Vec<Message>, budget: usize) -> (Vec<Message>, MessageEviction) {
        let n = messages.len();
        let costs: Vec<usize> = messages
            .iter()
            .map(|m| self.estimator.estimate_message(m))
            .collect();
        let groups = PairGroups::build(&messages);

        let keep_last = self.tags.keep_last_indices(&messages);
        let protected_roots: HashSet<usize> = (0..n)
            .filter(|&i| messages[i].pinned || keep_last.contains(&i))
            .map(|i| groups.root(i))
            .collect();
        let protected: Vec<bool> = (0..n)
            .map(|i| protected_roots.contains(&groups.root(i)))
            .collect();

        let current: usize = costs.iter().sum();
        let required_tokens: usize = (0..n).filter(|&i| protected[i]).map(|i| costs[i]).sum();
        let factor = self.config.shortened_factor.clamp(0.0, 1.0);
        let allowance = (budget.saturating_sub(required_tokens) as f64 * (1.0 - factor)).floor() as usize;
        let target = current.saturating_sub(required_tokens + allowance);
        let placeholder_cost = self.estimator.estimate_message(&self.config.placeholder());

        if required_tokens > budget {
            debug!("Protected content alone needs ~{required_tokens} tokens, over budget {budget}");
        }

        // Marking proceeds one pair group at a time, oldest first, and only
        // takes groups whose eviction shrinks the log. The second sweep picks
        // up groups that became profitable by extending or joining a run
        // marked after them.
        let order = groups.in_order();
        let mut marked = vec![false; n];
        let mut gross = 0usize;
        let mut runs = 0usize;
        'sweeps: for _ in 0..2 {
            for members in &order {
                if gross >= target + runs * placeholder_cost {
                    break 'sweeps;
                }
                if protected[members[0]] || marked[members[0]] {
                    continue;
                }
                let (cost, opened) = group_delta(members, &marked, &costs);
                if cost as i64 - opened * placeholder_cost as i64 <= 0 {
                    continue;
                }
                for &i in members {
                    marked[i] = true;
                }
                gross += cost;
                runs = runs.saturating_add_signed(opened as isize);
            }
        }

        let mut out = Vec::with_capacity(n);
        let mut evicted = 0;
        let mut placeholders = 0;
        for (i, msg) in messages.into_iter().enumerate() {
            if !marked[i] {
                out.push(msg);
                continue;
            }
            evicted += 1;
            if i == 0 || !marked[i - 1] {
                placeholders += 1;
                out.push(self.config.placeholder());
            }
        }

        debug!(
            "Evicted {evicted} message(s) into {placeholders} placeholder(s); required ~{required_tokens}, target savings ~{target}"
        );
        (
            out,
            MessageEviction {
                required_tokens,
                evicted,
                placeholders,
            },
        )
    }
}

/// Cost of `members` and the net change in placeholder runs if they were
/// all marked. `members` is ascending.
fn group_delta(members: &[usize], marked: &[bool], costs: &[usize]) -> (usize, i64) {
    let mut cost = 0;
    let mut opened = 0i64;
    for (k, &i) in members.iter().enumerate() {
        let left = i > 0 && (marked[i - 1] || (k > 0 && members[k - 1] == i - 1));
        let right = i + 1 < marked.len() && marked[i + 1];
        match (left, right) {
            (false, false) => opened += 1,
            (true, true) => opened -= 1,
            _ => {}
        }
        cost += costs[i];
    }
    (cost, opened)
}

struct MessageEviction {
    required_tokens: usize,
    evicted: usize,
    placeholders: usize,
}

/// Message indices linked by shared tool-call ids, closed transitively.
struct PairGroups {
    parent: Vec<usize>,
}

impl PairGroups {
    fn build(messages: &[Message]) -> Self {
        let mut groups = Self {
            parent: (0..messages.len()).collect(),
        };
        let mut first_holder: HashMap<&str, usize> = HashMap::new();
        for (i, msg) in messages.iter().enumerate() {
            for id in msg.tool_call_ids().chain(msg.tool_result_ids()) {
                match first_holder.get(id) {
                    Some(&j) => groups.union(i, j),
                    None => {
                        first_holder.insert(id, i);
                    }
                }
            }
        }
        groups
    }

    fn root(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        // The smaller index becomes the root so roots are oldest members.
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }

    /// Groups as ascending index lists, ordered by their oldest member.
    fn in_order(&self) -> Vec<Vec<usize>> {
        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); self.parent.len()];
        for i in 0..self.parent.len() {
            by_root[self.root(i)].push(i);
        }
        by_root.into_iter().filter(|g| !g.is_empty()).collect()
    }
}

// ── Stub helpers ───────────────────────────────────────────────────

/// `input.command` of every tool call, keyed by call id.
fn call_commands(messages: &[Message]) -> HashMap<String, String> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .flat_map(|m| &m.content)
        .filter_map(|p| match p {
            ContentPart::ToolCall {
                tool_call_id,
                input,
                ..
            } => input
                .get("command")
                .and_then(Value::as_str)
                .map(|c| (tool_call_id.clone(), c.to_string())),
            _ => None,
        })
        .collect()
}

fn json_values(output: &[ToolOutput]) -> impl Iterator<Item = &Value> {
    output.iter().filter_map(|o| match o {
        ToolOutput::Json { value } => Some(value),
        ToolOutput::Media { .. } => None,
    })
}

fn result_command(output: &[ToolOutput]) -> Option<&str> {
    json_values(output).find_map(|v| v.get("command").and_then(Value::as_str))
}

/// Whether `output` is already a redaction stub of either kind.
fn is_stub(output: &[ToolOutput]) -> bool {
    matches!(output, [ToolOutput::Json { value }] if value.get("omitted") == Some(&Value::Bool(true)))
}

fn is_shell_stub(output: &[ToolOutput]) -> bool {
    is_stub(output) && result_command(output).is_some()
}

/// Characters of serialized JSON output plus the length of media payloads.
fn output_size(output: &[ToolOutput]) -> usize {
    output
        .iter()
        .map(|o| match o {
            ToolOutput::Json { value } => value.to_string().chars().count(),
            ToolOutput::Media { data, .. } => data.len(),
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::pairing::is_balanced;
    use crate::testing::{read_pair, shell_pair, synthetic_log};

    fn evictor<'a>(config: &'a EvictionConfig, tags: &'a TagConfig) -> StageEvictor<'a> {
        StageEvictor::new(config, TokenEstimator::default(), tags)
    }

    fn result_value(msg: &Message) -> &Value {
        match &msg.content[0] {
            ContentPart::ToolResult { output, .. } => match &output[0] {
                ToolOutput::Json { value } => value,
                other => panic!("unexpected output {other:?}"),
            },
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn keeps_five_most_recent_shell_results() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let mut log = vec![Message::user("run the suite")];
        for i in 0..8 {
            log.extend(shell_pair(&format!("c{i}"), &format!("make step{i}"), 500));
        }

        let (out, report) = evictor(&config, &tags).evict(log, 1_000_000);

        assert_eq!(report.shell_results_redacted, 3);
        assert_eq!(report.settled_after, Some(EvictionPass::ShellRedaction));
        let results: Vec<&Message> = out.iter().filter(|m| m.role == MessageRole::Tool).collect();
        assert_eq!(results.len(), 8);
        for (i, msg) in results.iter().enumerate() {
            let value = result_value(msg);
            if i < 3 {
                assert_eq!(value, &json!({"command": format!("make step{i}"), "omitted": true}));
            } else {
                assert_eq!(value["stdout"].as_str().map(str::len), Some(500));
            }
        }
    }

    #[test]
    fn shell_command_falls_back_to_the_call_input() {
        let config = EvictionConfig::default().with_keep_recent_shell_results(0);
        let tags = TagConfig::default();
        let log = vec![
            Message::assistant(vec![ContentPart::tool_call(
                "c1",
                "shell",
                json!({"command": "ls -la"}),
            )]),
            Message::tool_result("c1", "shell", json!({"stdout": "total 0"})),
        ];
        let (out, redacted) = evictor(&config, &tags).redact_shell_results(log);
        assert_eq!(redacted, 1);
        assert_eq!(result_value(&out[1]), &json!({"command": "ls -la", "omitted": true}));
    }

    #[test]
    fn redacted_shell_results_still_count_as_recent() {
        let config = EvictionConfig::default().with_keep_recent_shell_results(1);
        let tags = TagConfig::default();
        let mut log = Vec::new();
        log.extend(shell_pair("c1", "a", 100));
        log.extend(shell_pair("c2", "b", 100));
        let ev = evictor(&config, &tags);
        let (once, first) = ev.redact_shell_results(log);
        let (twice, second) = ev.redact_shell_results(once.clone());
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn large_results_keep_only_their_size() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let [call, result] = read_pair("c1", "big.rs", 5_000);
        let size = output_size(match &result.content[0] {
            ContentPart::ToolResult { output, .. } => output,
            _ => unreachable!(),
        });
        let log = vec![call, result];

        let (out, redacted) = evictor(&config, &tags).redact_large_results(log);

        assert_eq!(redacted, 1);
        assert_eq!(result_value(&out[1]), &json!({"omitted": true, "originalSize": size}));
    }

    #[test]
    fn small_results_are_untouched_by_size_redaction() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let log = read_pair("c1", "small.rs", 100).to_vec();
        let (out, redacted) = evictor(&config, &tags).redact_large_results(log.clone());
        assert_eq!(redacted, 0);
        assert_eq!(out, log);
    }

    #[test]
    fn consecutive_evictions_become_one_placeholder() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let mut log = vec![Message::system("sys").pinned()];
        for i in 0..10 {
            log.push(Message::user(format!("note {i}: {}", "n".repeat(600))));
        }
        log.push(Message::user("latest").pinned());

        let est = TokenEstimator::default();
        let budget = est.estimate_message(&log[0]) + est.estimate_message(&log[11]) + 200;
        let (out, report) = evictor(&config, &tags).evict(log, budget);

        assert_eq!(report.messages_evicted, 10);
        assert_eq!(report.placeholders_inserted, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].text(), DEFAULT_PLACEHOLDER_TEXT);
        assert!(!out[1].pinned);
        assert!(report.tokens_after <= budget);
    }

    #[test]
    fn keep_last_tag_survives_eviction() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let mut log = vec![
            Message::user(format!("old ask {}", "x".repeat(3_000))).with_tag("LIVE_PROMPT"),
            Message::user(format!("the live ask {}", "y".repeat(3_000)))
                .with_tag("LIVE_PROMPT")
                .keep_last("LIVE_PROMPT"),
        ];
        for i in 0..6 {
            log.push(Message::assistant_text(format!("step {i} {}", "z".repeat(3_000))));
        }

        let (out, report) = evictor(&config, &tags).evict(log, 2_500);

        assert!(report.messages_evicted > 0);
        assert!(out.iter().any(|m| m.text().starts_with("the live ask")));
        assert!(!out.iter().any(|m| m.text().starts_with("old ask")));
        assert!(report.tokens_after <= 2_500);
    }

    #[test]
    fn pairs_are_evicted_together() {
        let config = EvictionConfig::default().with_large_result_chars(usize::MAX);
        let tags = TagConfig::default();
        let mut log = vec![Message::user("go").pinned()];
        for i in 0..5 {
            log.extend(read_pair(&format!("c{i}"), "f.rs", 2_000));
        }
        let (out, report) = evictor(&config, &tags).evict(log, 2_000);
        assert!(report.messages_evicted > 0);
        assert!(is_balanced(&out));
        assert!(report.pairing.is_clean());
    }

    #[test]
    fn pinned_result_protects_its_call() {
        let config = EvictionConfig::default().with_large_result_chars(usize::MAX);
        let tags = TagConfig::default();
        let [call, result] = read_pair("keep", "notes.md", 1_500);
        let mut log = vec![call, result.pinned()];
        log.extend(read_pair("drop", "other.md", 1_500));
        let (out, _) = evictor(&config, &tags).evict(log, 1_000);
        assert!(out.iter().any(|m| m.tool_call_ids().any(|id| id == "keep")));
        assert!(!out.iter().any(|m| m.tool_call_ids().any(|id| id == "drop")));
    }

    #[test]
    fn pinned_overflow_is_best_effort() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let log = vec![
            Message::system("x".repeat(6_000)).pinned(),
            Message::user("chatter ".repeat(200)),
            Message::user("y".repeat(6_000)).pinned(),
        ];
        let (out, report) = evictor(&config, &tags).evict(log, 1_000);
        assert!(report.required_tokens > 1_000);
        assert_eq!(report.settled_after, None);
        assert!(report.tokens_after > 1_000);
        assert_eq!(out.len(), 3);
        assert!(out[0].pinned && out[2].pinned);
        assert_eq!(out[1].text(), DEFAULT_PLACEHOLDER_TEXT);
    }

    #[test]
    fn converges_when_protected_content_fits() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let est = TokenEstimator::default();
        for seed in 0..25 {
            let log = synthetic_log(seed, 30);
            let total = est.estimate_total(&log);
            let budget = total / 5;
            let (out, report) = evictor(&config, &tags).evict(log, budget);
            assert!(report.required_tokens < budget, "seed {seed}");
            assert!(report.tokens_after <= budget, "seed {seed}: {report:?}");
            assert!(is_balanced(&out), "seed {seed}");
            assert!(out.iter().any(|m| m.keep_last_tags.contains("USER_PROMPT")));
        }
    }

    #[test]
    fn messages_cheaper_than_a_placeholder_are_kept() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let est = TokenEstimator::default();
        let log = vec![
            Message::system("s".repeat(3_000)).pinned(),
            Message::user("ok"),
            Message::user("p".repeat(3_000)).pinned(),
            Message::assistant_text("a".repeat(6_000)),
        ];
        let placeholder_cost = est.estimate_message(&config.placeholder());
        assert!(est.estimate_message(&log[1]) < placeholder_cost);
        let required = est.estimate_message(&log[0]) + est.estimate_message(&log[2]);
        let budget = required + est.estimate_message(&log[1]) + placeholder_cost;

        let (out, report) = evictor(&config, &tags).evict(log, budget);

        assert_eq!(report.required_tokens, required);
        assert_eq!(report.messages_evicted, 1);
        assert_eq!(report.placeholders_inserted, 1);
        assert!(report.tokens_after <= budget, "{report:?}");
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].text(), "ok");
        assert_eq!(out[3].text(), DEFAULT_PLACEHOLDER_TEXT);
    }

    #[test]
    fn small_message_joins_a_later_run() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let log = vec![
            Message::system("sys").pinned(),
            Message::user("ok"),
            Message::assistant_text("a".repeat(6_000)),
            Message::assistant_text("b".repeat(6_000)),
            Message::user("latest").pinned(),
        ];

        // Evicting both long replies leaves "ok" plus one placeholder, which
        // is still over; "ok" then joins the run for free.
        let (out, report) = evictor(&config, &tags).evict(log, 100);

        assert_eq!(report.messages_evicted, 3);
        assert_eq!(report.placeholders_inserted, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].text(), DEFAULT_PLACEHOLDER_TEXT);
        assert!(report.tokens_after <= 100, "{report:?}");
    }

    #[test]
    fn order_is_preserved() {
        let config = EvictionConfig::default();
        let tags = TagConfig::default();
        let log: Vec<Message> = (0..20)
            .map(|i| Message::user(format!("{i:02} {}", "m".repeat(400))))
            .collect();
        let (out, _) = evictor(&config, &tags).evict(log, 800);
        let survivors: Vec<String> = out
            .iter()
            .map(Message::text)
            .filter(|t| t != DEFAULT_PLACEHOLDER_TEXT)
            .collect();
        let mut sorted = survivors.clone();
        sorted.sort();
        assert_eq!(survivors, sorted);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EvictionConfig =
            serde_json::from_value(json!({"keep_recent_shell_results": 2})).unwrap();
        assert_eq!(config.keep_recent_shell_results, 2);
        assert_eq!(config.large_result_chars, 1000);
        assert!(config.shell_tools.contains("run_terminal_command"));
    }
}

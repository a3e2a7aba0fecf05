//! The top-level entry point: decide whether to compact, run one strategy,
//! and restore tool pairing.
//!
//! [`Compactor`] composes every piece in [`context`](crate::context):
//!
//! 1. Tag hygiene drops this invocation's marker messages.
//! 2. The log is measured against the effective budget, and the cache
//!    monitor checks for an expired prompt cache.
//! 3. If the log fits and the cache is warm, the hygienic log is returned
//!    (the fast path).
//! 4. Otherwise exactly one strategy runs: [`Strategy::Evict`] for cheap
//!    incremental shrinking, or [`Strategy::Summarize`] for folding the
//!    whole log into one message.
//! 5. The orphan resolver runs on whatever the strategy produced.
//!
//! # Example
//!
//! ```
//! use cinch_compact::prelude::*;
//!
//! let config = CompactionConfig::new()
//!     .with_strategy(Strategy::Summarize)
//!     .with_max_context_tokens(2_000);
//!
//! let messages: Vec<Message> = (0..50)
//!     .map(|i| Message::user(format!("request {i}: {}", "x".repeat(200))))
//!     .collect();
//!
//! let outcome = Compactor::new(&config)
//!     .with_clock(&FixedClock(1_700_000_000_000))
//!     .compact(&messages);
//!
//! assert_eq!(outcome.action, Action::Summarized);
//! assert_eq!(outcome.messages.len(), 1);
//! assert!(outcome.status.is_within_budget());
//! ```

use crate::clock::{Clock, SystemClock};
use crate::context::budget::{BudgetConfig, TokenEstimator};
use crate::context::cache::{CacheMonitor, CacheState, DEFAULT_CACHE_TTL_MS};
use crate::context::digest::DigestRegistry;
use crate::context::eviction::{EvictionConfig, StageEvictor};
use crate::context::pairing::resolve_orphans;
use crate::context::summarizer::{Summarizer, SummarizerConfig};
use crate::context::tags::{TagConfig, apply_tag_hygiene};
use crate::events::{CompactionEvent, EventHandler, NoopHandler};
use crate::Message;
use serde::Deserialize;
use tracing::{debug, warn};

// ── Configuration ──────────────────────────────────────────────────

/// Which strategy runs when compaction is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Staged eviction: redact, then coalesce old messages into placeholders.
    #[default]
    Evict,
    /// Fold the entire log into one summary message.
    Summarize,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Evict => write!(f, "evict"),
            Strategy::Summarize => write!(f, "summarize"),
        }
    }
}

/// Everything the compactor needs besides the log.
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use cinch_compact::compactor::{CompactionConfig, Strategy};
///
/// let config: CompactionConfig = serde_json::from_str(
///     r#"{"strategy": "summarize", "budget": {"max_context_tokens": 64000}}"#,
/// ).unwrap();
/// assert_eq!(config.strategy, Strategy::Summarize);
/// assert_eq!(config.budget.max_context_tokens, 64_000);
/// assert_eq!(config.eviction.keep_recent_shell_results, 5);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub strategy: Strategy,
    pub budget: BudgetConfig,
    pub tags: TagConfig,
    /// Provider prompt-cache time-to-live in milliseconds.
    pub cache_ttl_ms: i64,
    pub estimator: TokenEstimator,
    pub eviction: EvictionConfig,
    pub summarizer: SummarizerConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            budget: BudgetConfig::default(),
            tags: TagConfig::default(),
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            estimator: TokenEstimator::default(),
            eviction: EvictionConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl CompactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.budget.max_context_tokens = tokens;
        self
    }

    pub fn with_system_prompt_tokens(mut self, tokens: usize) -> Self {
        self.budget.system_prompt_tokens = tokens;
        self
    }

    pub fn with_tool_definition_tokens(mut self, tokens: usize) -> Self {
        self.budget.tool_definition_tokens = tokens;
        self
    }

    pub fn with_tags(mut self, tags: TagConfig) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_summarizer(mut self, summarizer: SummarizerConfig) -> Self {
        self.summarizer = summarizer;
        self
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// What the compactor did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fast path: only tag hygiene was applied.
    Unchanged,
    Evicted,
    Summarized,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Unchanged => write!(f, "unchanged"),
            Action::Evicted => write!(f, "evicted"),
            Action::Summarized => write!(f, "summarized"),
        }
    }
}

/// Why a strategy ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    None,
    /// The log exceeded the effective budget.
    OverBudget,
    /// The log fit, but the prompt cache had expired.
    CacheExpiring,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::None => write!(f, "no trigger"),
            Trigger::OverBudget => write!(f, "over budget"),
            Trigger::CacheExpiring => write!(f, "cache expiring"),
        }
    }
}

/// Whether the output fits the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    WithinBudget,
    /// The log is structurally valid but `overflow` tokens over the budget.
    /// Usually protected content alone exceeds it; see
    /// [`EvictionReport::required_tokens`](crate::context::eviction::EvictionReport).
    BestEffort { overflow: usize },
}

impl BudgetStatus {
    pub fn is_within_budget(&self) -> bool {
        matches!(self, BudgetStatus::WithinBudget)
    }
}

/// The result of one [`Compactor::compact`] call.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// The replacement log.
    pub messages: Vec<Message>,
    pub action: Action,
    pub trigger: Trigger,
    /// Marker messages removed by tag hygiene.
    pub hygiene_removed: usize,
    /// Estimated cost of the input log.
    pub tokens_before: usize,
    /// Estimated cost of the output log.
    pub tokens_after: usize,
    /// Effective budget the log was measured against.
    pub budget_tokens: usize,
    pub status: BudgetStatus,
}

impl CompactionOutcome {
    /// Whether the output is identical to the input.
    pub fn is_noop(&self) -> bool {
        self.action == Action::Unchanged && self.hygiene_removed == 0
    }

    /// One-line description for logs and the CLI report.
    pub fn to_log_string(&self) -> String {
        let status = match self.status {
            BudgetStatus::WithinBudget => String::new(),
            BudgetStatus::BestEffort { overflow } => format!(", best effort ({overflow} over)"),
        };
        format!(
            "{} ({}): ~{} -> ~{} tokens of {}, {} message(s){status}",
            self.action,
            self.trigger,
            self.tokens_before,
            self.tokens_after,
            self.budget_tokens,
            self.messages.len(),
        )
    }
}

// ── Compactor ──────────────────────────────────────────────────────

/// Compacts message logs under one configuration.
///
/// Defaults to the system clock, no event handler, and the built-in
/// digest formatters.
pub struct Compactor<'a> {
    config: &'a CompactionConfig,
    clock: &'a dyn Clock,
    event_handler: &'a dyn EventHandler,
    digests: DigestRegistry,
}

impl<'a> Compactor<'a> {
    pub fn new(config: &'a CompactionConfig) -> Self {
        Self {
            config,
            clock: &SystemClock,
            event_handler: &NoopHandler,
            digests: DigestRegistry::default(),
        }
    }

    /// Source of the timestamps stamped on summary output.
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Replace the digest formatters used by the summarizer.
    pub fn with_digests(mut self, digests: DigestRegistry) -> Self {
        self.digests = digests;
        self
    }

    fn emit(&self, event: CompactionEvent<'_>) {
        self.event_handler.on_event(&event);
    }

    /// Compact `messages`. The input is never modified.
    pub fn compact(&self, messages: &[Message]) -> CompactionOutcome {
        let config = self.config;
        let estimator = config.estimator;
        let budget = config.budget.effective_budget();
        let tokens_before = estimator.estimate_total(messages);

        let (log, hygiene_removed) = apply_tag_hygiene(messages.to_vec(), &config.tags);
        if hygiene_removed > 0 {
            self.emit(CompactionEvent::TagHygiene {
                removed: hygiene_removed,
            });
        }

        let usage = estimator.usage(&log, budget);
        self.emit(CompactionEvent::Measured { usage: &usage });

        let cache = CacheMonitor::new(&config.tags.live_prompt, config.cache_ttl_ms).check(&log);
        if let CacheState::Expired { gap_ms } = cache {
            self.emit(CompactionEvent::CacheExpiring {
                gap_ms,
                ttl_ms: config.cache_ttl_ms,
            });
        }

        let trigger = if usage.is_over_budget() {
            Trigger::OverBudget
        } else if cache.will_miss() {
            Trigger::CacheExpiring
        } else {
            Trigger::None
        };

        if trigger == Trigger::None {
            debug!("Fast path: {}", usage.to_log_string());
            self.emit(CompactionEvent::FastPath);
            self.emit(CompactionEvent::Finished {
                action: Action::Unchanged,
                tokens_before,
                tokens_after: usage.estimated_tokens,
            });
            return CompactionOutcome {
                messages: log,
                action: Action::Unchanged,
                trigger,
                hygiene_removed,
                tokens_before,
                tokens_after: usage.estimated_tokens,
                budget_tokens: budget,
                status: BudgetStatus::WithinBudget,
            };
        }

        self.emit(CompactionEvent::StrategySelected {
            strategy: config.strategy,
            trigger,
        });
        let (compacted, action) = match config.strategy {
            Strategy::Evict => (self.evict(log, budget), Action::Evicted),
            Strategy::Summarize => (self.summarize(log, budget), Action::Summarized),
        };

        let (messages, pairing) = resolve_orphans(compacted);
        if !pairing.is_clean() {
            self.emit(CompactionEvent::OrphansResolved { report: &pairing });
        }

        let tokens_after = estimator.estimate_total(&messages);
        let status = if tokens_after <= budget {
            BudgetStatus::WithinBudget
        } else {
            warn!("Compacted log is ~{tokens_after} tokens, over budget {budget}");
            self.emit(CompactionEvent::OverBudget {
                tokens: tokens_after,
                budget,
            });
            BudgetStatus::BestEffort {
                overflow: tokens_after - budget,
            }
        };
        self.emit(CompactionEvent::Finished {
            action,
            tokens_before,
            tokens_after,
        });

        CompactionOutcome {
            messages,
            action,
            trigger,
            hygiene_removed,
            tokens_before,
            tokens_after,
            budget_tokens: budget,
            status,
        }
    }

    fn evict(&self, log: Vec<Message>, budget: usize) -> Vec<Message> {
        let config = self.config;
        let (out, report) =
            StageEvictor::new(&config.eviction, config.estimator, &config.tags).evict(log, budget);
        if report.shell_results_redacted > 0 {
            self.emit(CompactionEvent::ShellResultsRedacted {
                count: report.shell_results_redacted,
            });
        }
        if report.large_results_redacted > 0 {
            self.emit(CompactionEvent::LargeResultsRedacted {
                count: report.large_results_redacted,
            });
        }
        if report.messages_evicted > 0 {
            self.emit(CompactionEvent::MessagesEvicted {
                evicted: report.messages_evicted,
                placeholders: report.placeholders_inserted,
            });
        }
        if !report.pairing.is_clean() {
            self.emit(CompactionEvent::OrphansResolved {
                report: &report.pairing,
            });
        }
        match report.settled_after {
            Some(pass) => debug!("Eviction reached budget after {pass}"),
            None => debug!("Eviction could not reach budget {budget}"),
        }
        out
    }

    fn summarize(&self, log: Vec<Message>, budget: usize) -> Vec<Message> {
        let config = self.config;
        let summarizer = Summarizer::new(
            &config.summarizer,
            &config.tags,
            config.estimator,
            &self.digests,
        );
        let (out, report) = summarizer.summarize(log, budget, self.clock.now_ms());
        self.emit(CompactionEvent::Summarized { report: &report });
        out
    }
}

/// Compact `messages` with the system clock and no event handler.
pub fn compact(messages: &[Message], config: &CompactionConfig) -> CompactionOutcome {
    Compactor::new(config).compact(messages)
}

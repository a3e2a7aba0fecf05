//! Events and handlers for observing a compaction run.
//!
//! The [`Compactor`](crate::compactor::Compactor) reports each decision it
//! makes through [`CompactionEvent`] variants: which messages tag hygiene
//! dropped, whether the fast path applied, which strategy ran and why, what
//! each eviction pass removed. Callers implement [`EventHandler`] to feed
//! these into logs, metrics, or a UI.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget calls |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control |

use crate::compactor::{Action, Strategy, Trigger};
use crate::context::ContextUsage;
use crate::context::pairing::PairingReport;
use crate::context::summarizer::SummaryReport;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during one compaction.
#[derive(Debug)]
pub enum CompactionEvent<'a> {
    /// Pass 0 removed the per-invocation marker messages.
    TagHygiene { removed: usize },
    /// The log was measured against the effective budget.
    Measured { usage: &'a ContextUsage },
    /// The provider's prompt cache has expired since the last assistant turn.
    CacheExpiring { gap_ms: i64, ttl_ms: i64 },
    /// The log fits and the cache is warm; nothing else will run.
    FastPath,
    /// A strategy was chosen.
    StrategySelected { strategy: Strategy, trigger: Trigger },
    /// Pass 1 redacted older shell results.
    ShellResultsRedacted { count: usize },
    /// Pass 2 stubbed oversized tool results.
    LargeResultsRedacted { count: usize },
    /// Pass 3 coalesced messages into placeholders.
    MessagesEvicted { evicted: usize, placeholders: usize },
    /// The summarizer folded the log into one message.
    Summarized { report: &'a SummaryReport },
    /// The integrity pass removed unpaired tool calls or results.
    OrphansResolved { report: &'a PairingReport },
    /// The compacted log is still over budget; the result is best-effort.
    OverBudget { tokens: usize, budget: usize },
    /// The run is complete.
    Finished {
        action: Action,
        tokens_before: usize,
        tokens_after: usize,
    },
}

/// Handler for compaction events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```
/// use cinch_compact::events::{CompactionEvent, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: &CompactionEvent<'_>) {
///         if let CompactionEvent::MessagesEvicted { evicted, .. } = event {
///             println!("evicted {evicted}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```
/// use cinch_compact::events::{CompactionEvent, FnEventHandler};
///
/// let handler = FnEventHandler::new(|event| {
///     if let CompactionEvent::FastPath = event {
///         println!("nothing to do");
///     }
/// });
/// # let _ = handler;
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CompactionEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```
/// use cinch_compact::events::{CompositeEventHandler, LoggingHandler, NoopHandler};
///
/// let verbose = false;
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, NoopHandler);
/// # let _ = handler;
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler. When `condition` is `false`, this is a
    /// no-op.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        match event {
            CompactionEvent::TagHygiene { removed } => {
                debug!("Tag hygiene removed {removed} marker message(s)");
            }
            CompactionEvent::Measured { usage } => {
                debug!("{}", usage.to_log_string());
            }
            CompactionEvent::CacheExpiring { gap_ms, ttl_ms } => {
                info!("Prompt cache expired ({gap_ms}ms idle, ttl {ttl_ms}ms); compacting early");
            }
            CompactionEvent::FastPath => {
                debug!("Within budget and cache warm; log returned as is");
            }
            CompactionEvent::StrategySelected { strategy, trigger } => {
                info!("Compacting with {strategy} ({trigger})");
            }
            CompactionEvent::ShellResultsRedacted { count } => {
                debug!("Redacted {count} older shell result(s)");
            }
            CompactionEvent::LargeResultsRedacted { count } => {
                debug!("Redacted {count} large tool result(s)");
            }
            CompactionEvent::MessagesEvicted {
                evicted,
                placeholders,
            } => {
                info!("Evicted {evicted} message(s) into {placeholders} placeholder(s)");
            }
            CompactionEvent::Summarized { report } => {
                info!(
                    "Summarized {} message(s) into ~{} tokens{}",
                    report.messages_folded,
                    report.narrative_tokens,
                    if report.truncated { " (truncated)" } else { "" }
                );
            }
            CompactionEvent::OrphansResolved { report } => {
                debug!(
                    "Removed {} orphaned result(s) and {} orphaned call(s)",
                    report.orphan_results, report.orphan_calls
                );
            }
            CompactionEvent::OverBudget { tokens, budget } => {
                warn!("Best-effort result: ~{tokens} tokens exceeds budget {budget}");
            }
            CompactionEvent::Finished {
                action,
                tokens_before,
                tokens_after,
            } => {
                info!("Compaction {action}: ~{tokens_before} -> ~{tokens_after} tokens");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn composite_dispatches_to_every_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with_if(false, NoopHandler)
            .with_opt(Some(FnEventHandler::new(move |_| b.lock().unwrap().push("b"))))
            .with_opt(None::<NoopHandler>);

        handler.on_event(&CompactionEvent::FastPath);

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let usage = ContextUsage {
            estimated_tokens: 10,
            budget_tokens: 100,
            usage_pct: 0.1,
        };
        let summary = SummaryReport::default();
        let pairing = PairingReport::default();
        let events = [
            CompactionEvent::TagHygiene { removed: 1 },
            CompactionEvent::Measured { usage: &usage },
            CompactionEvent::CacheExpiring {
                gap_ms: 400_000,
                ttl_ms: 300_000,
            },
            CompactionEvent::FastPath,
            CompactionEvent::StrategySelected {
                strategy: Strategy::Evict,
                trigger: Trigger::OverBudget,
            },
            CompactionEvent::Summarized { report: &summary },
            CompactionEvent::OrphansResolved { report: &pairing },
            CompactionEvent::OverBudget {
                tokens: 200,
                budget: 100,
            },
            CompactionEvent::Finished {
                action: Action::Evicted,
                tokens_before: 200,
                tokens_after: 90,
            },
        ];
        for event in &events {
            LoggingHandler.on_event(event);
        }
    }
}

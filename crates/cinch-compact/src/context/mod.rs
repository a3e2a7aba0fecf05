//! The building blocks of compaction, leaves first.
//!
//! 1. **[`budget`]**: [`TokenEstimator`] prices messages and content parts,
//!    and [`BudgetConfig`] derives the effective budget after fixed
//!    per-request overhead.
//!
//! 2. **[`cache`]**: [`CacheMonitor`](cache::CacheMonitor) detects when the
//!    provider's prompt cache has already expired, which makes this the
//!    cheapest moment to shrink the prefix.
//!
//! 3. **[`pairing`]**: restores the tool-call / tool-result bijection after
//!    any destructive edit.
//!
//! 4. **[`tags`]**: tag configuration and the pass-0 hygiene that drops
//!    per-invocation marker messages.
//!
//! 5. **[`eviction`]**: staged, lossy eviction: redact old shell output,
//!    stub large results, then coalesce runs of old messages into
//!    placeholders.
//!
//! 6. **[`summarizer`]**: folds the whole log into one narrative message,
//!    using the per-tool [`digest`] registry.
//!
//! The [`Compactor`](crate::compactor::Compactor) composes all of these.

pub mod budget;
pub mod cache;
pub mod digest;
pub mod eviction;
pub mod pairing;
pub mod summarizer;
pub mod tags;

pub use budget::{BudgetConfig, ContextUsage, DEFAULT_BYTES_PER_TOKEN, TokenEstimator};
pub use tags::TagConfig;

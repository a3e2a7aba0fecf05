//! Convenience re-exports for common `cinch-compact` types.
//!
//! Meant to be glob-imported by callers that compact logs:
//!
//! ```
//! use cinch_compact::prelude::*;
//! ```
//!
//! This pulls in the message model, the compactor and its configuration,
//! clocks, and event handlers. Pass-level types (eviction reports, digest
//! registries, cache state) are not included; import those from their
//! modules directly when needed.

// ── Message model ───────────────────────────────────────────────────
pub use crate::{ContentPart, Message, MessageRole, ToolOutput};

// ── Compaction ──────────────────────────────────────────────────────
pub use crate::compactor::{
    Action, BudgetStatus, CompactionConfig, CompactionOutcome, Compactor, Strategy, Trigger,
    compact,
};
pub use crate::context::{BudgetConfig, TagConfig, TokenEstimator};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::events::{
    CompactionEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler,
};

//! Compact a conversation log so it fits the next model call.
//!
//! Reads a JSON array of messages, runs one compaction, and prints the
//! replacement log as pretty JSON.
//!
//! # Examples
//!
//! ```sh
//! # Evict against a 100k-token window
//! cinch-compact --input session.json --max-context-tokens 100000
//!
//! # Summarize instead, with settings from a file
//! cinch-compact --input session.json --config compact.json --strategy summarize
//!
//! # Pipe through, with a one-line report and debug logs on stderr
//! cat session.json | cinch-compact --report -vv > compacted.json
//! ```

use std::path::PathBuf;
use std::process;

use cinch_compact::logging::StderrLayer;
use cinch_compact::prelude::*;
use cinch_compact::snapshot;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Compact a conversation log so it fits the next model call.
#[derive(Parser)]
#[command(name = "cinch-compact")]
struct Cli {
    // ── Input / output ─────────────────────────────────────────
    /// JSON file holding the message log (defaults to stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Write the compacted log here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// JSON config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Strategy ───────────────────────────────────────────────
    /// How to shrink an over-budget log
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    // ── Budget ─────────────────────────────────────────────────
    /// Model context window in tokens
    #[arg(long)]
    max_context_tokens: Option<usize>,

    /// Tokens taken by the system prompt outside the log
    #[arg(long)]
    system_prompt_tokens: Option<usize>,

    /// Tokens taken by tool definitions outside the log
    #[arg(long)]
    tool_definition_tokens: Option<usize>,

    // ── Cache ──────────────────────────────────────────────────
    /// Provider prompt-cache time-to-live in milliseconds
    #[arg(long)]
    cache_ttl_ms: Option<i64>,

    /// Treat this Unix-millisecond instant as "now"
    #[arg(long)]
    now_ms: Option<i64>,

    // ── Diagnostics ────────────────────────────────────────────
    /// Print a one-line outcome summary to stderr
    #[arg(long)]
    report: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// No log output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

/// The file config (or defaults) with command-line overrides applied.
fn build_config(cli: &Cli) -> Result<CompactionConfig, String> {
    let mut config = match &cli.config {
        Some(path) => snapshot::read_config(path)?,
        None => CompactionConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config = config.with_strategy(strategy);
    }
    if let Some(tokens) = cli.max_context_tokens {
        config = config.with_max_context_tokens(tokens);
    }
    if let Some(tokens) = cli.system_prompt_tokens {
        config = config.with_system_prompt_tokens(tokens);
    }
    if let Some(tokens) = cli.tool_definition_tokens {
        config = config.with_tool_definition_tokens(tokens);
    }
    if let Some(ttl) = cli.cache_ttl_ms {
        config = config.with_cache_ttl_ms(ttl);
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = build_config(cli)?;
    let messages = snapshot::read_messages(cli.input.as_deref())?;

    let fixed = cli.now_ms.map(FixedClock);
    let clock: &dyn Clock = match &fixed {
        Some(clock) => clock,
        None => &SystemClock,
    };
    let outcome = Compactor::new(&config)
        .with_clock(clock)
        .with_event_handler(&LoggingHandler)
        .compact(&messages);

    if cli.report {
        eprintln!("{}", outcome.to_log_string());
    }
    snapshot::write_messages(&outcome.messages, cli.output.as_deref())
}

fn main() {
    let cli = Cli::parse();

    if let Some(level) = StderrLayer::level_for(cli.verbose, cli.quiet) {
        tracing_subscriber::registry()
            .with(StderrLayer::new(level))
            .init();
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

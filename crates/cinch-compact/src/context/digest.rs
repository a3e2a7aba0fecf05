//! Per-tool digest formatters for the summarizer.
//!
//! A digest is the one-line (occasionally few-line) description of a tool
//! call that replaces it in a summary: `Read files: a.rs, b.rs`,
//! `Edited file: src/lib.rs`, `Todos: 2/5 complete. Remaining: ...`.
//!
//! Formatters are looked up by tool name in a [`DigestRegistry`]. Unknown
//! tools fall through to a single fallback formatter, so adding a tool type
//! means registering one function without touching the others.
//!
//! # Example
//!
//! ```
//! use cinch_compact::context::digest::DigestRegistry;
//! use serde_json::json;
//!
//! let registry = DigestRegistry::default()
//!     .on("deploy", |input| format!("Deployed: {}", input["env"].as_str().unwrap_or("?")));
//!
//! assert_eq!(registry.describe("deploy", &json!({"env": "prod"})), "Deployed: prod");
//! assert_eq!(registry.describe("mystery", &json!({})), "Used tool: mystery");
//! ```

use crate::tools;
use serde_json::Value;
use std::collections::HashMap;

/// Formatter for one tool's call input.
pub type DigestFn = Box<dyn Fn(&Value) -> String + Send + Sync>;

/// Formatter used for tool names with no registered digest.
pub type FallbackFn = Box<dyn Fn(&str, &Value) -> String + Send + Sync>;

/// Preview length for terminal commands.
const COMMAND_PREVIEW_CHARS: usize = 50;
/// Preview length for spawned-agent prompts and params.
const SPAWN_PREVIEW_CHARS: usize = 1000;
/// Preview length for questions asked of the user.
const QUESTION_PREVIEW_CHARS: usize = 200;

/// Registry mapping tool names to digest formatters.
pub struct DigestRegistry {
    formatters: HashMap<String, DigestFn>,
    fallback: FallbackFn,
}

impl std::fmt::Debug for DigestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.formatters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DigestRegistry")
            .field("tools", &names)
            .finish_non_exhaustive()
    }
}

impl DigestRegistry {
    /// A registry with no tool-specific formatters; everything uses the
    /// fallback.
    pub fn empty() -> Self {
        Self {
            formatters: HashMap::new(),
            fallback: Box::new(|name, _| format!("Used tool: {name}")),
        }
    }

    /// Register a formatter for `tool_name` (builder pattern). Replaces any
    /// formatter already registered under that name.
    pub fn on(
        mut self,
        tool_name: impl Into<String>,
        formatter: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.register(tool_name, formatter);
        self
    }

    /// Register a formatter for `tool_name`.
    pub fn register(
        &mut self,
        tool_name: impl Into<String>,
        formatter: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) {
        self.formatters.insert(tool_name.into(), Box::new(formatter));
    }

    /// Replace the fallback formatter.
    pub fn with_fallback(
        mut self,
        fallback: impl Fn(&str, &Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.formatters.contains_key(tool_name)
    }

    /// Describe one tool call.
    pub fn describe(&self, tool_name: &str, input: &Value) -> String {
        match self.formatters.get(tool_name) {
            Some(formatter) => formatter(input),
            None => (self.fallback)(tool_name, input),
        }
    }
}

impl Default for DigestRegistry {
    /// The built-in formatters for the standard agent tool set.
    fn default() -> Self {
        Self::empty()
            .on(tools::READ_FILES, |i| {
                labeled_list(str_list(i, "paths"), "Read files: ", "Read files")
            })
            .on(tools::WRITE_FILE, |i| {
                labeled(str_field(i, "path"), "Wrote file: ", "Wrote file")
            })
            .on(tools::STR_REPLACE, |i| {
                labeled(str_field(i, "path"), "Edited file: ", "Edited file")
            })
            .on(tools::PROPOSE_WRITE_FILE, |i| {
                labeled(str_field(i, "path"), "Proposed write to: ", "Proposed file write")
            })
            .on(tools::PROPOSE_STR_REPLACE, |i| {
                labeled(str_field(i, "path"), "Proposed edit to: ", "Proposed file edit")
            })
            .on(tools::READ_SUBTREE, |i| {
                labeled_list(str_list(i, "paths"), "Read subtree: ", "Read subtree")
            })
            .on(tools::CODE_SEARCH, code_search)
            .on(tools::GLOB, |i| {
                labeled_list(field_of_each(i, "patterns", "pattern"), "Glob: ", "Glob search")
            })
            .on(tools::LIST_DIRECTORY, |i| {
                labeled_list(
                    field_of_each(i, "directories", "path"),
                    "Listed dirs: ",
                    "Listed directory",
                )
            })
            .on(tools::FIND_FILES, |i| {
                quoted(str_field(i, "pattern"), "Find files", "Find files")
            })
            .on(tools::RUN_TERMINAL_COMMAND, run_terminal_command)
            .on(tools::SPAWN_AGENTS, spawn_agents)
            .on(tools::SPAWN_AGENT_INLINE, spawn_agents)
            .on(tools::WRITE_TODOS, write_todos)
            .on(tools::ASK_USER, ask_user)
            .on(tools::SUGGEST_FOLLOWUPS, |_| "Suggested followups".to_string())
            .on(tools::WEB_SEARCH, |i| {
                quoted(str_field(i, "query"), "Web search", "Web search")
            })
            .on(tools::READ_DOCS, |i| {
                quoted(str_field(i, "query"), "Read docs", "Read docs")
            })
            .on(tools::SET_OUTPUT, |_| "Set output".to_string())
            .on(tools::SET_MESSAGES, |_| "Set messages".to_string())
    }
}

// ── Input helpers ──────────────────────────────────────────────────

/// First `max` characters of `text`, with `...` appended when cut.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn str_list<'a>(input: &'a Value, key: &str) -> Vec<&'a str> {
    input
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// `input[list_key][*][field]` as strings.
fn field_of_each<'a>(input: &'a Value, list_key: &str, field: &str) -> Vec<&'a str> {
    input
        .get(list_key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn labeled(value: Option<&str>, label: &str, bare: &str) -> String {
    match value {
        Some(v) => format!("{label}{v}"),
        None => bare.to_string(),
    }
}

fn labeled_list(values: Vec<&str>, label: &str, bare: &str) -> String {
    if values.is_empty() {
        bare.to_string()
    } else {
        format!("{label}{}", values.join(", "))
    }
}

fn quoted(value: Option<&str>, label: &str, bare: &str) -> String {
    match value {
        Some(v) => format!("{label}: \"{v}\""),
        None => bare.to_string(),
    }
}

// ── Formatters with structure ──────────────────────────────────────

fn code_search(input: &Value) -> String {
    match (str_field(input, "pattern"), str_field(input, "flags")) {
        (Some(pattern), Some(flags)) => format!("Code search: \"{pattern}\" ({flags})"),
        (Some(pattern), None) => format!("Code search: \"{pattern}\""),
        _ => "Code search".to_string(),
    }
}

fn run_terminal_command(input: &Value) -> String {
    match str_field(input, "command") {
        Some(command) => format!("Ran command: {}", preview(command, COMMAND_PREVIEW_CHARS)),
        None => "Ran terminal command".to_string(),
    }
}

/// `type (prompt: "...", params: {...})` for one spawned agent.
fn spawn_detail(agent_type: &str, prompt: Option<&str>, params: Option<&Value>) -> String {
    let mut extras = Vec::new();
    if let Some(prompt) = prompt.filter(|p| !p.is_empty()) {
        extras.push(format!("prompt: \"{}\"", preview(prompt, SPAWN_PREVIEW_CHARS)));
    }
    if let Some(params) = params.filter(|p| p.as_object().is_some_and(|o| !o.is_empty())) {
        extras.push(format!(
            "params: {}",
            preview(&params.to_string(), SPAWN_PREVIEW_CHARS)
        ));
    }
    if extras.is_empty() {
        agent_type.to_string()
    } else {
        format!("{agent_type} ({})", extras.join(", "))
    }
}

fn spawn_agents(input: &Value) -> String {
    let agents = input
        .get("agents")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty());
    if let Some(agents) = agents {
        let lines: Vec<String> = agents
            .iter()
            .map(|a| {
                let detail = spawn_detail(
                    str_field(a, "agent_type").unwrap_or("unknown"),
                    str_field(a, "prompt"),
                    a.get("params"),
                );
                format!("- {detail}")
            })
            .collect();
        return format!("Spawned agents:\n{}", lines.join("\n"));
    }
    match str_field(input, "agent_type") {
        Some(agent_type) => format!(
            "Spawned agent: {}",
            spawn_detail(agent_type, str_field(input, "prompt"), input.get("params"))
        ),
        None => "Spawned agent(s)".to_string(),
    }
}

fn write_todos(input: &Value) -> String {
    let Some(todos) = input.get("todos").and_then(Value::as_array) else {
        return "Updated todos".to_string();
    };
    let done = |t: &&Value| t.get("completed").and_then(Value::as_bool).unwrap_or(false);
    let completed = todos.iter().filter(done).count();
    let remaining: Vec<String> = todos
        .iter()
        .filter(|t| !done(t))
        .map(|t| format!("- {}", str_field(t, "task").unwrap_or("")))
        .collect();
    if remaining.is_empty() {
        format!("Todos: {completed}/{} complete (all done!)", todos.len())
    } else {
        format!(
            "Todos: {completed}/{} complete. Remaining:\n{}",
            todos.len(),
            remaining.join("\n")
        )
    }
}

fn ask_user(input: &Value) -> String {
    let questions = field_of_each(input, "questions", "question");
    if questions.is_empty() {
        return "Asked user question".to_string();
    }
    format!(
        "Asked user: {}",
        preview(&questions.join("; "), QUESTION_PREVIEW_CHARS)
    )
}

//! Canonical tool name constants.
//!
//! These names select a digest formatter and identify shell-style tools
//! for output redaction. They never change control flow otherwise; an
//! unknown tool name is digested by the generic fallback.

pub const READ_FILES: &str = "read_files";
pub const WRITE_FILE: &str = "write_file";
pub const STR_REPLACE: &str = "str_replace";
pub const PROPOSE_WRITE_FILE: &str = "propose_write_file";
pub const PROPOSE_STR_REPLACE: &str = "propose_str_replace";
pub const READ_SUBTREE: &str = "read_subtree";
pub const CODE_SEARCH: &str = "code_search";
pub const GLOB: &str = "glob";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const FIND_FILES: &str = "find_files";
pub const RUN_TERMINAL_COMMAND: &str = "run_terminal_command";
pub const SHELL: &str = "shell";
pub const SPAWN_AGENTS: &str = "spawn_agents";
pub const SPAWN_AGENT_INLINE: &str = "spawn_agent_inline";
pub const WRITE_TODOS: &str = "write_todos";
pub const ASK_USER: &str = "ask_user";
pub const SUGGEST_FOLLOWUPS: &str = "suggest_followups";
pub const WEB_SEARCH: &str = "web_search";
pub const READ_DOCS: &str = "read_docs";
pub const SET_OUTPUT: &str = "set_output";
pub const SET_MESSAGES: &str = "set_messages";

/// Tools whose results are bulky command output (stdout/stderr).
pub const SHELL_TOOLS: &[&str] = &[RUN_TERMINAL_COMMAND, SHELL];

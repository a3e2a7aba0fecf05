//! Log builders shared by the unit tests.

use crate::{ContentPart, Message};
use serde_json::json;

/// An assistant call to the terminal tool and its result.
pub(crate) fn shell_pair(id: &str, command: &str, stdout_len: usize) -> [Message; 2] {
    [
        Message::assistant(vec![ContentPart::tool_call(
            id,
            "run_terminal_command",
            json!({ "command": command }),
        )]),
        Message::tool_result(
            id,
            "run_terminal_command",
            json!({
                "command": command,
                "stdout": "o".repeat(stdout_len),
                "exitCode": 0
            }),
        ),
    ]
}

/// An assistant `read_files` call and a result holding `content_len` chars.
pub(crate) fn read_pair(id: &str, path: &str, content_len: usize) -> [Message; 2] {
    [
        Message::assistant(vec![ContentPart::tool_call(
            id,
            "read_files",
            json!({ "paths": [path] }),
        )]),
        Message::tool_result(
            id,
            "read_files",
            json!({ "path": path, "content": "r".repeat(content_len) }),
        ),
    ]
}

/// Deterministic pseudo-random generator for synthetic logs.
pub(crate) struct Lcg(u64);

impl Lcg {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub(crate) fn below(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound.max(1)
    }
}

/// A plausible agent log: a pinned system prompt, then `turns` rounds of
/// user prompts, assistant text, and tool pairs of varied sizes. The last
/// user prompt carries a keep-last tag.
pub(crate) fn synthetic_log(seed: u64, turns: usize) -> Vec<Message> {
    let mut rng = Lcg::new(seed);
    let mut log = vec![Message::system("You are a coding agent.").pinned()];
    let mut next_id = 0;
    for turn in 0..turns {
        let ask = format!("request {turn}: {}", "q".repeat(rng.below(400) as usize));
        let mut user = Message::user(ask).with_sent_at(turn as i64 * 1_000);
        if turn + 1 == turns {
            user = user.with_tag("USER_PROMPT").keep_last("USER_PROMPT");
        }
        log.push(user);
        for _ in 0..rng.below(4) {
            next_id += 1;
            let id = format!("call-{next_id}");
            let pair = match rng.below(3) {
                0 => shell_pair(&id, "cargo test", rng.below(3_000) as usize),
                1 => read_pair(&id, "src/lib.rs", rng.below(6_000) as usize),
                _ => read_pair(&id, "README.md", rng.below(200) as usize),
            };
            log.extend(pair);
        }
        log.push(
            Message::assistant_text(format!("done with {turn}: {}", "a".repeat(rng.below(300) as usize)))
                .with_sent_at(turn as i64 * 1_000 + 500),
        );
    }
    log
}

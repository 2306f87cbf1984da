//! Command recognition: which chat messages are tasks, and what they ask for.

use crate::channels::InboundMessage;
use crate::conversation::ConversationState;

/// Leading tokens that force a fresh agent session for one task.
pub const FRESH_TOKENS: [&str; 2] = ["--new", "-n"];

/// Why a message was not turned into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Not self-originated or missing the prefix. Ignored without a reply.
    #[error("not a command")]
    NotCommand,
    /// Prefix present but nothing to do. Answered with a usage hint.
    #[error("no task given")]
    EmptyTask,
}

/// A recognised command before the conversation state is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub task: String,
    pub start_fresh: bool,
}

/// What the agent is asked to do. `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub text: String,
    pub continue_session: bool,
}

impl Command {
    pub fn resolve(self, state: &ConversationState) -> Task {
        Task {
            continue_session: state.continuation(self.start_fresh),
            text: self.task,
        }
    }
}

/// Accept self-originated messages that start with `prefix` (case-sensitive, trailing space
/// included, so a bare `/claude` is not a command).
pub fn parse_command(msg: &InboundMessage, prefix: &str) -> Result<Command, Rejection> {
    if !msg.from_me {
        return Err(Rejection::NotCommand);
    }
    let rest = msg
        .text
        .strip_prefix(prefix)
        .ok_or(Rejection::NotCommand)?
        .trim();
    let (task, start_fresh) = match strip_fresh_token(rest) {
        Some(task) => (task, true),
        None => (rest, false),
    };
    if task.is_empty() {
        return Err(Rejection::EmptyTask);
    }
    Ok(Command {
        task: task.to_string(),
        start_fresh,
    })
}

/// A fresh token only counts when whitespace follows it; a lone `--new` is task text.
fn strip_fresh_token(s: &str) -> Option<&str> {
    FRESH_TOKENS.iter().find_map(|token| {
        let rest = s.strip_prefix(token)?;
        if rest.starts_with(char::is_whitespace) {
            Some(rest.trim_start())
        } else {
            None
        }
    })
}

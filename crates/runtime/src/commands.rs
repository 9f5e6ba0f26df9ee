//! Slash commands: `/name args` handled before any LLM call.
//!
//! A command either replies directly (`Message` - appended as a system
//! message, no LLM turn) or contributes a per-turn system note
//! (`Prompt` - the turn proceeds with the note in history).

use std::collections::HashMap;
use std::sync::Arc;

use prizm_domain::error::Result;

use crate::chat::window::{self, WindowParams};
use crate::runtime::AgentRuntime;

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Message(String),
    Prompt(String),
}

#[async_trait::async_trait]
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn run(
        &self,
        args: &str,
        runtime: &Arc<AgentRuntime>,
        scope: &str,
        session_id: &str,
    ) -> Result<CommandOutcome>;
}

pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn SlashCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register(&mut self, command: Arc<dyn SlashCommand>) {
        self.commands.insert(command.name(), command);
    }

    /// Run a command. `None` means "not a registered command" - the
    /// caller falls back to a normal LLM turn.
    pub async fn run(
        &self,
        name: &str,
        args: &str,
        runtime: &Arc<AgentRuntime>,
        scope: &str,
        session_id: &str,
    ) -> Option<CommandOutcome> {
        if name == "help" {
            let mut lines: Vec<String> = self
                .commands
                .values()
                .map(|c| format!("/{} - {}", c.name(), c.description()))
                .collect();
            lines.push("/help - list available commands".into());
            lines.sort();
            return Some(CommandOutcome::Message(lines.join("\n")));
        }

        let command = self.commands.get(name)?;
        match command.run(args, runtime, scope, session_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(CommandOutcome::Message(format!("command /{name} failed: {e}"))),
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(ClearCommand));
    registry.register(Arc::new(CompactCommand));
    registry.register(Arc::new(NoteCommand));
    registry
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-ins
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `/clear` - wipe the conversation (messages and checkpoints).
struct ClearCommand;

#[async_trait::async_trait]
impl SlashCommand for ClearCommand {
    fn name(&self) -> &'static str {
        "clear"
    }

    fn description(&self) -> &'static str {
        "clear the conversation history"
    }

    async fn run(
        &self,
        _args: &str,
        runtime: &Arc<AgentRuntime>,
        scope: &str,
        session_id: &str,
    ) -> Result<CommandOutcome> {
        let truncated = runtime.ctx.scopes.truncate_messages(scope, session_id, 0)?;
        runtime.ctx.scopes.update(scope, session_id, |s| {
            s.compressed_through_round = 0;
            s.compression_summaries.clear();
        });
        Ok(CommandOutcome::Message(format!(
            "Cleared {} messages.",
            truncated.removed_messages.len()
        )))
    }
}

/// `/compact` - fold the oldest rounds into a summary immediately.
struct CompactCommand;

#[async_trait::async_trait]
impl SlashCommand for CompactCommand {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn description(&self) -> &'static str {
        "compress the oldest conversation rounds now"
    }

    async fn run(
        &self,
        _args: &str,
        runtime: &Arc<AgentRuntime>,
        scope: &str,
        session_id: &str,
    ) -> Result<CommandOutcome> {
        let session = runtime
            .ctx
            .scopes
            .get_session(scope, session_id)
            .ok_or_else(|| {
                prizm_domain::Error::NotFound(format!("session {session_id}"))
            })?;
        let cached = runtime.ctx.config.context.cached_context_turns;
        let policy = session
            .bg_meta
            .as_ref()
            .map(|m| m.memory_policy)
            .unwrap_or_default();
        // full=0 drops the threshold to "any `cached` uncompressed rounds".
        let forced = WindowParams { full: 0, cached };
        match window::maybe_compress(runtime, &session, &policy, forced).await {
            Some(_) => Ok(CommandOutcome::Message(format!(
                "Compressed {cached} rounds into the running summary."
            ))),
            None => Ok(CommandOutcome::Message(
                "Nothing to compress yet.".into(),
            )),
        }
    }
}

/// `/note <text>` - pin a note into this turn's context.
struct NoteCommand;

#[async_trait::async_trait]
impl SlashCommand for NoteCommand {
    fn name(&self) -> &'static str {
        "note"
    }

    fn description(&self) -> &'static str {
        "pin a note into this turn's context"
    }

    async fn run(
        &self,
        args: &str,
        _runtime: &Arc<AgentRuntime>,
        _scope: &str,
        _session_id: &str,
    ) -> Result<CommandOutcome> {
        Ok(CommandOutcome::Prompt(format!("## User note\n{args}")))
    }
}

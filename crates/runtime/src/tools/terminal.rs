//! Terminal tools: one-shot exec over the worker pool, and interactive
//! terminal management. Commands matching the configured approval
//! patterns pause for a user decision before running.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;

use prizm_domain::tool::ToolDefinition;
use prizm_terminal::WorkspaceKind;

use super::{object_schema, ToolHandler, ToolInvocation, ToolOutput};

const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

fn approval_set(patterns: &[String]) -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(patterns).unwrap_or_else(|_| RegexSet::empty()))
}

pub struct Exec;

#[async_trait::async_trait]
impl ToolHandler for Exec {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_exec".into(),
            description: "Run a one-shot shell command in the workspace.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "command": {"type": "string"},
                    "cwd": {"type": "string"},
                    "workspace": {"type": "string", "enum": ["main", "session", "workflow"]},
                    "timeout_ms": {"type": "integer"},
                }),
                &["command"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let command = match inv.arg_str("command") {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(e.to_string()),
        };

        // Approval gate for dangerous commands.
        let patterns = &inv.runtime.ctx.config.terminal.approval_patterns;
        if approval_set(patterns).is_match(&command) {
            let response = inv
                .request_interaction(
                    "exec_approval",
                    serde_json::json!({ "command": command }),
                )
                .await;
            if !response.approved {
                return ToolOutput::err("command denied by user");
            }
        }

        let kind = match inv.opt_str("workspace").as_deref() {
            Some("session") => WorkspaceKind::Session,
            Some("workflow") => WorkspaceKind::Workflow,
            _ => WorkspaceKind::Main,
        };
        let cwd = inv.opt_str("cwd").unwrap_or_else(|| {
            inv.runtime
                .ctx
                .scopes
                .scope_root(&inv.scope)
                .to_string_lossy()
                .into_owned()
        });
        let _ = std::fs::create_dir_all(&cwd);
        let timeout =
            Duration::from_millis(inv.opt_u64("timeout_ms").unwrap_or(DEFAULT_EXEC_TIMEOUT_MS));

        match inv
            .runtime
            .ctx
            .exec_pool
            .exec(&inv.session_id, kind, &command, &cwd, timeout)
            .await
        {
            Ok(result) => {
                let json = serde_json::json!({
                    "timed_out": result.timed_out,
                    "exit_code": result.exit_code,
                    "output": result.output,
                });
                if result.timed_out {
                    ToolOutput::err(json.to_string())
                } else {
                    ToolOutput::ok_json(&json)
                }
            }
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

pub struct TerminalCreate;

#[async_trait::async_trait]
impl ToolHandler for TerminalCreate {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_terminal_create".into(),
            description: "Open a long-lived interactive terminal for this session.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "shell": {"type": "string"},
                    "cols": {"type": "integer"},
                    "rows": {"type": "integer"},
                }),
                &[],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let shell = inv.opt_str("shell");
        let cols = inv.opt_u64("cols").unwrap_or(120) as u16;
        let rows = inv.opt_u64("rows").unwrap_or(32) as u16;
        match inv
            .runtime
            .ctx
            .terminals
            .create(&inv.session_id, shell.as_deref(), cols, rows)
        {
            Ok(info) => ToolOutput::ok_json(&serde_json::json!({
                "terminal_id": info.id,
                "shell": info.shell,
            })),
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

pub struct TerminalWrite;

#[async_trait::async_trait]
impl ToolHandler for TerminalWrite {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_terminal_write".into(),
            description: "Write input to an interactive terminal.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "terminal_id": {"type": "string"},
                    "data": {"type": "string"},
                }),
                &["terminal_id", "data"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let (terminal_id, data) = match (inv.arg_str("terminal_id"), inv.arg_str("data")) {
            (Ok(t), Ok(d)) => (t, d),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::err(e.to_string()),
        };
        match inv.runtime.ctx.terminals.write(&terminal_id, &data) {
            Ok(()) => ToolOutput::ok("written"),
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

pub struct TerminalKill;

#[async_trait::async_trait]
impl ToolHandler for TerminalKill {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "prizm_terminal_kill".into(),
            description: "Kill an interactive terminal.".into(),
            parameters: object_schema(
                serde_json::json!({
                    "terminal_id": {"type": "string"},
                }),
                &["terminal_id"],
            ),
        }
    }

    async fn execute(&self, inv: ToolInvocation) -> ToolOutput {
        let terminal_id = match inv.arg_str("terminal_id") {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(e.to_string()),
        };
        match inv.runtime.ctx.terminals.kill(&terminal_id) {
            Ok(()) => ToolOutput::ok("killed"),
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

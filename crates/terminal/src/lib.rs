//! Terminal sessions for agents.
//!
//! Two kinds of PTY live here:
//!
//! - **Interactive terminals**: long-lived, client-attachable over
//!   WebSocket, with a bounded output ring buffer and replay on attach.
//! - **Exec workers**: reusable one-shot executors, one per
//!   `(agent session, workspace kind)`, speaking a marker protocol that
//!   brackets each command's output and exit code.

mod exec;
mod manager;
mod ring;
mod sanitize;

pub use exec::{ExecResult, ExecWorkerPool, WorkspaceKind};
pub use manager::{AttachReplay, TerminalEvent, TerminalInfo, TerminalManager};
pub use ring::OutputRing;
pub use sanitize::{is_sensitive_env_name, sanitized_env, strip_ansi};

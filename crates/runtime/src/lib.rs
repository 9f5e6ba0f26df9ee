//! The agent execution substrate: chat turns, background sub-sessions,
//! workflows, tools, and the glue that wires them onto the event bus.
//!
//! Entry point: [`AgentRuntime::new`] builds the runtime from an explicit
//! [`RuntimeContext`] - no globals - and returns an `Arc` whose weak
//! self-reference lets tools spawn background sessions and workflows
//! drive agent steps.

pub mod audit;
pub mod background;
pub mod cancel;
pub mod chat;
pub mod commands;
pub mod context;
pub mod interact;
pub mod tools;
pub mod workflow;

mod runtime;

pub use chat::ChatOptions;
pub use context::RuntimeContext;
pub use runtime::AgentRuntime;

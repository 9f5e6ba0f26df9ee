//! LLM provider abstraction.
//!
//! Concrete HTTP providers (OpenAI-compatible, Anthropic, local runtimes)
//! plug in behind [`LlmProvider`]; the runtime only ever sees the
//! provider-agnostic stream events. The [`scripted`] module ships a
//! deterministic in-process provider used throughout the test suites.

mod registry;
pub mod scripted;
mod traits;

pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};

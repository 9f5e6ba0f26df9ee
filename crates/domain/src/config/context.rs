use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sliding A/B context window parameters.
///
/// Once the uncompressed tail exceeds `full_context_turns +
/// cached_context_turns` complete rounds, the oldest
/// `cached_context_turns` rounds are folded into a summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_full_turns")]
    pub full_context_turns: usize,
    #[serde(default = "d_cached_turns")]
    pub cached_context_turns: usize,
    /// Base system prompt prepended to every turn.
    #[serde(default = "d_system_prompt")]
    pub base_system_prompt: String,
    /// Maximum tool-call loops within one turn before force-stop.
    #[serde(default = "d_max_tool_loops")]
    pub max_tool_loops: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            full_context_turns: d_full_turns(),
            cached_context_turns: d_cached_turns(),
            base_system_prompt: d_system_prompt(),
            max_tool_loops: d_max_tool_loops(),
        }
    }
}

fn d_full_turns() -> usize {
    8
}
fn d_cached_turns() -> usize {
    4
}
fn d_system_prompt() -> String {
    "You are the Prizm workspace agent. You operate on the user's local \
     workspace through the available tools."
        .into()
}
fn d_max_tool_loops() -> usize {
    25
}

use prizm_domain::session::MemoryRef;

/// Per-turn options for `AgentRuntime::chat`.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// `provider/model` spec; `None` uses the default provider.
    pub model: Option<String>,
    pub mcp_enabled: bool,
    pub include_scope_context: bool,
    /// Rendered skill manifest offered when no skill is active.
    pub skill_metadata_for_discovery: Option<String>,
    /// Instructions of the currently active skill.
    pub active_skill_instructions: Option<String>,
    pub rules_content: Option<String>,
    /// External file paths the agent may read this turn.
    pub granted_paths: Vec<String>,
    /// Tool whitelist for this turn; `None` falls back to the session's.
    pub allowed_tools: Option<Vec<String>>,
    pub allowed_mcp_server_ids: Vec<String>,
    pub thinking: bool,
    /// Pre-retrieved memory texts injected into the context block.
    pub memory_texts: Vec<String>,
    /// Ids of the injected memories, attached to the message's refs.
    pub memory_refs_injected: Vec<MemoryRef>,
    /// Prepended to the base system prompt (background contract, agent
    /// personas).
    pub system_preamble: Option<String>,
    /// Appended to the dynamic per-turn block verbatim.
    pub prompt_injection: Option<String>,
    /// Disable memory injection and extraction for this turn.
    pub skip_memory: bool,
    /// Run without any tools.
    pub skip_tools: bool,
    /// Sliding-window override (A).
    pub full_context_turns: Option<usize>,
    /// Sliding-window override (B).
    pub cached_context_turns: Option<usize>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            mcp_enabled: true,
            include_scope_context: true,
            skill_metadata_for_discovery: None,
            active_skill_instructions: None,
            rules_content: None,
            granted_paths: Vec::new(),
            allowed_tools: None,
            allowed_mcp_server_ids: Vec::new(),
            thinking: false,
            memory_texts: Vec::new(),
            memory_refs_injected: Vec::new(),
            system_preamble: None,
            prompt_injection: None,
            skip_memory: false,
            skip_tools: false,
            full_context_turns: None,
            cached_context_turns: None,
        }
    }
}

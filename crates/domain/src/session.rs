//! Agent session model.
//!
//! A session is a rooted tree: session → messages → parts. Memory refs are
//! opaque ids, never pointers, so there are no cycles to manage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::stream::{ToolCallStatus, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Tool {
        id: String,
        name: String,
        arguments: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl MessagePart {
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            MessagePart::Tool { id, .. } => Some(id),
            MessagePart::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory refs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory ids a message touched, grouped by layer. Opaque ids only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRefs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub injected: Vec<MemoryRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<MemoryRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRef {
    pub id: String,
    pub layer: String,
}

impl MemoryRefs {
    pub fn is_empty(&self) -> bool {
        self.injected.is_empty() && self.created.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "MemoryRefs::is_empty")]
    pub memory_refs: MemoryRefs,
}

impl AgentMessage {
    pub fn new(role: MessageRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: Vec::new(),
            created_at: Utc::now(),
            model: None,
            usage: None,
            reasoning: None,
            memory_refs: MemoryRefs::default(),
        }
    }

    pub fn text(role: MessageRole, content: &str) -> Self {
        let mut msg = Self::new(role);
        msg.parts.push(MessagePart::Text {
            content: content.to_owned(),
        });
        msg
    }

    /// Flattened text content of all text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Insert or merge a tool part by id.
    ///
    /// Updates are merge-by-id: a later `running → completed` replaces the
    /// earlier fields of the same id. The status transition is monotonic -
    /// once a part reaches a terminal status it never regresses.
    pub fn upsert_tool_part(
        &mut self,
        id: &str,
        name: &str,
        arguments: serde_json::Value,
        status: ToolCallStatus,
        result: Option<String>,
        is_error: bool,
    ) {
        for part in self.parts.iter_mut() {
            if part.tool_id() == Some(id) {
                if let MessagePart::Tool {
                    name: p_name,
                    arguments: p_args,
                    status: p_status,
                    result: p_result,
                    is_error: p_err,
                    ..
                } = part
                {
                    if p_status.is_terminal() && !status.is_terminal() {
                        return; // never regress out of a terminal status
                    }
                    *p_name = name.to_owned();
                    *p_args = arguments;
                    *p_status = status;
                    if result.is_some() {
                        *p_result = result;
                    }
                    *p_err = is_error;
                }
                return;
            }
        }
        self.parts.push(MessagePart::Tool {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
            result,
            status,
            is_error,
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Interactive,
    Background,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BgStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl BgStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BgTrigger {
    ToolSpawn,
    Api,
    Llm,
    Cron,
    ScheduleRemind,
    Workflow,
}

/// Target session that receives a synthetic system message when a
/// background session completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceTarget {
    pub scope: String,
    pub session_id: String,
}

/// Which extraction passes a session opts out of.
///
/// `None` fields mean "inherit the default"; merging is key-by-key, never
/// whole-object replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_per_round_extract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_narrative_batch_extract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_document_extract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_conversation_summary: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub skip_per_round_extract: bool,
    pub skip_narrative_batch_extract: bool,
    pub skip_document_extract: bool,
    pub skip_conversation_summary: bool,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            skip_per_round_extract: false,
            skip_narrative_batch_extract: false,
            skip_document_extract: false,
            skip_conversation_summary: false,
        }
    }
}

impl MemoryPolicy {
    /// Defaults applied to background sessions.
    pub fn background_defaults() -> Self {
        Self {
            skip_per_round_extract: true,
            skip_narrative_batch_extract: true,
            skip_document_extract: false,
            skip_conversation_summary: true,
        }
    }

    /// Apply an override on top of `self`. Missing keys keep the base value.
    pub fn merged_with(self, over: &MemoryPolicyOverride) -> Self {
        Self {
            skip_per_round_extract: over
                .skip_per_round_extract
                .unwrap_or(self.skip_per_round_extract),
            skip_narrative_batch_extract: over
                .skip_narrative_batch_extract
                .unwrap_or(self.skip_narrative_batch_extract),
            skip_document_extract: over
                .skip_document_extract
                .unwrap_or(self.skip_document_extract),
            skip_conversation_summary: over
                .skip_conversation_summary
                .unwrap_or(self.skip_conversation_summary),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgMeta {
    pub trigger: BgTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// Nesting depth: 0 for sessions spawned from an interactive parent.
    #[serde(default)]
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announce_target: Option<AnnounceTarget>,
    pub memory_policy: MemoryPolicy,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub scope: String,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub messages: Vec<AgentMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_meta: Option<BgMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_status: Option<BgStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_result: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of complete rounds already folded into compression summaries.
    #[serde(default)]
    pub compressed_through_round: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compression_summaries: Vec<String>,
    /// External file paths the agent has been granted read access to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted_paths: Vec<String>,
    /// Tool whitelist; `None` allows every registered tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_mcp_server_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_summary: Option<String>,
}

impl AgentSession {
    pub fn new(scope: &str, kind: SessionKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_owned(),
            kind,
            title: None,
            messages: Vec::new(),
            bg_meta: None,
            bg_status: None,
            bg_result: None,
            started_at: Utc::now(),
            finished_at: None,
            compressed_through_round: 0,
            compression_summaries: Vec::new(),
            granted_paths: Vec::new(),
            allowed_tools: None,
            allowed_mcp_server_ids: Vec::new(),
            checkpoints: Vec::new(),
            llm_summary: None,
        }
    }

    /// A session is either interactive or carries background metadata.
    pub fn is_consistent(&self) -> bool {
        match self.kind {
            SessionKind::Interactive => self.bg_meta.is_none(),
            SessionKind::Background | SessionKind::Tool => self.bg_meta.is_some(),
        }
    }

    /// Set the background status. Terminal states are sticky: once the run
    /// is completed/failed/cancelled/timeout it never flips back.
    /// Returns false if the transition was refused.
    pub fn set_bg_status(&mut self, status: BgStatus) -> bool {
        if let Some(current) = self.bg_status {
            if current.is_terminal() {
                return false;
            }
        }
        self.bg_status = Some(status);
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Count of complete user→assistant rounds.
    pub fn complete_rounds(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count()
    }
}

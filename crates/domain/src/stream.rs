use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::session::MemoryRefs;
use crate::tool::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-level stream events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during LLM streaming (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text token chunk.
    Token { text: String },

    /// Reasoning/thinking content.
    Thinking { text: String },

    /// A tool call has started streaming.
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred during streaming.
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn-level chunks (the SSE event type)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a tool invocation as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Preparing,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Events emitted during a single agent turn, one-to-one with SSE frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    /// Incremental assistant text.
    Text { text: String },

    /// Reasoning/thinking content from the model.
    Reasoning { text: String },

    /// The model began emitting a tool call (name known, args streaming).
    ToolCallPreparing { call_id: String, tool_name: String },

    /// Incremental tool-call argument JSON.
    ToolCallArgsDelta { call_id: String, delta: String },

    /// Status-bearing tool call update (running / completed / error).
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        status: ToolCallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// Incremental tool output (long-running tools).
    ToolResultChunk { call_id: String, text: String },

    /// Tool progress note (free-form).
    ToolProgress { call_id: String, message: String },

    /// The turn is blocked on a user interaction decision.
    InteractRequest {
        request_id: String,
        kind: String,
        payload: serde_json::Value,
    },

    /// Memory texts were injected into the prompt.
    MemoryInjected { count: usize },

    /// A slash command ran instead of an LLM turn.
    CommandResult { text: String },

    /// Terminal frame: the turn finished.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        message_id: String,
        tool_calls: Vec<ToolCall>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        stopped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory_refs: Option<MemoryRefs>,
    },

    /// Terminal frame: the turn failed.
    Error { message: String },
}

impl Chunk {
    /// True for the frames that end a turn stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::Done { .. } | Chunk::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_is_terminal() {
        let done = Chunk::Done {
            model: None,
            usage: None,
            message_id: "m1".into(),
            tool_calls: vec![],
            stopped: false,
            memory_refs: None,
        };
        assert!(done.is_terminal());
        assert!(!Chunk::Text { text: "x".into() }.is_terminal());
    }

    #[test]
    fn chunk_serializes_with_type_tag() {
        let json = serde_json::to_string(&Chunk::Text { text: "hi".into() }).unwrap();
        assert!(json.contains("\"type\":\"text\""));
    }

    #[test]
    fn tool_status_terminality() {
        assert!(!ToolCallStatus::Running.is_terminal());
        assert!(ToolCallStatus::Completed.is_terminal());
        assert!(ToolCallStatus::Cancelled.is_terminal());
    }
}

//! Sliding A/B context window.
//!
//! Rounds are counted as assistant messages. Once the uncompressed tail
//! reaches `A + B` rounds, exactly the oldest `B` uncompressed rounds
//! (messages `[2t, 2(t+B))` for `t = compressed_through`) are folded
//! into a summary and the boundary advances by `B`.

use prizm_domain::session::{AgentMessage, AgentSession, MemoryPolicy, MessageRole};
use prizm_events::DomainEvent;
use prizm_memory::{ExtractedMemory, MemCell, MemoryLayer, Routing};

use crate::runtime::AgentRuntime;

#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub full: usize,
    pub cached: usize,
}

/// True exactly when `complete_rounds - compressed_through >= A + B`.
pub fn compression_due(complete_rounds: usize, compressed_through: usize, p: WindowParams) -> bool {
    complete_rounds.saturating_sub(compressed_through) >= p.full + p.cached
}

/// Deterministic digest of the rounds being folded away.
pub fn summarize_rounds(messages: &[AgentMessage], first_round: usize) -> String {
    let mut lines = Vec::new();
    for (i, pair) in messages.chunks(2).enumerate() {
        let user = pair
            .first()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.text_content())
            .unwrap_or_default();
        let assistant = pair
            .get(1)
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.text_content())
            .unwrap_or_default();
        lines.push(format!(
            "round {}: user: {} | assistant: {}",
            first_round + i + 1,
            clip(&user, 160),
            clip(&assistant, 160),
        ));
    }
    lines.join("\n")
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

/// Compress if due. Returns the summary that was produced, if any.
pub async fn maybe_compress(
    runtime: &AgentRuntime,
    session: &AgentSession,
    policy: &MemoryPolicy,
    p: WindowParams,
) -> Option<String> {
    let t = session.compressed_through_round;
    if !compression_due(session.complete_rounds(), t, p) {
        return None;
    }

    let start = 2 * t;
    let end = (2 * (t + p.cached)).min(session.messages.len());
    if start >= end {
        return None;
    }
    let summary = summarize_rounds(&session.messages[start..end], t);

    runtime
        .ctx
        .bus
        .emit(DomainEvent::SessionCompressing {
            scope: session.scope.clone(),
            session_id: session.id.clone(),
            rounds: p.cached,
        })
        .await;

    runtime
        .ctx
        .scopes
        .update(&session.scope, &session.id, |s| {
            s.compressed_through_round += p.cached;
            s.compression_summaries.push(summary.clone());
        });

    if !policy.skip_conversation_summary {
        let cell = MemCell {
            memories: vec![ExtractedMemory {
                content: format!("Conversation summary:\n{summary}"),
                layer: MemoryLayer::EventLog,
                metadata: serde_json::json!({ "kind": "conversation_summary" }),
            }],
        };
        let routing = Routing {
            user_id: "default".into(),
            scope: session.scope.clone(),
            session_id: Some(session.id.clone()),
        };
        let _ = runtime.ctx.memory.process_mem_cell(&cell, &routing).await;
    }

    Some(summary)
}

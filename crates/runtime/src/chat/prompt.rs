//! Prompt assembly: ordered, individually-optional sections.
//!
//! 1. Static system prefix (base prompt + per-turn preamble).
//! 2. User-profile memory block.
//! 3. Context-memory block (scope + session level, plus injected texts)
//!    - only when memory is on and the user text passes the length gate.
//! 4. Sliding-window history.
//! 5. Dynamic per-turn block: rules, skills, command note, injection.
//! 6. The current user message.

use prizm_domain::session::{AgentMessage, AgentSession, MessagePart, MessageRole};
use prizm_domain::tool::{ContentPart, Message, MessageContent, Role};

use crate::chat::options::ChatOptions;
use crate::runtime::AgentRuntime;

pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    pub injected_memory_count: usize,
}

/// The memory gate: inject context memory only for substantive input
/// (≥ 4 chars), or any non-empty input on a fresh session.
pub fn memory_gate(user_text: &str, fresh_session: bool) -> bool {
    let len = user_text.chars().count();
    len >= 4 || (fresh_session && len >= 1)
}

pub async fn assemble(
    runtime: &AgentRuntime,
    session: &AgentSession,
    history: &[AgentMessage],
    user_text: &str,
    options: &ChatOptions,
    command_note: Option<&str>,
) -> AssembledPrompt {
    let mut messages = Vec::new();
    let mut injected = 0usize;

    // 1. Static system prefix.
    let mut system = runtime.ctx.config.context.base_system_prompt.clone();
    if let Some(preamble) = &options.system_preamble {
        system.push_str("\n\n");
        system.push_str(preamble);
    }
    messages.push(Message::system(&system));

    let memory_on = runtime.ctx.config.memory.enabled && !options.skip_memory;

    // 2. User-profile block (always-on when memory is enabled).
    if memory_on {
        if let Some(profile) = runtime.ctx.memory_reader.profile_block(&session.scope).await {
            messages.push(Message::system(&format!("## User profile\n{profile}")));
        }
    }

    // 3. Context-memory block, gated on input length.
    if memory_on && memory_gate(user_text, session.complete_rounds() == 0) {
        let mut block = String::new();
        if options.include_scope_context {
            if let Some(context) = runtime
                .ctx
                .memory_reader
                .context_block(&session.scope, &session.id)
                .await
            {
                block.push_str(&context);
                injected += 1;
            }
        }
        for text in &options.memory_texts {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(text);
            injected += 1;
        }
        if !block.is_empty() {
            messages.push(Message::system(&format!("## Relevant memory\n{block}")));
        }
    }

    // Compression summaries stand in for the folded-away rounds.
    if !session.compression_summaries.is_empty() {
        let folded = session.compression_summaries.join("\n");
        messages.push(Message::system(&format!(
            "## Earlier conversation (compressed)\n{folded}"
        )));
    }

    // 4. Sliding-window history.
    messages.extend(history_to_llm(history));

    // 5. Dynamic per-turn block.
    let mut dynamic = Vec::new();
    if let Some(rules) = &options.rules_content {
        dynamic.push(format!("## Rules\n{rules}"));
    }
    match (&options.active_skill_instructions, &options.skill_metadata_for_discovery) {
        (Some(active), _) => dynamic.push(format!("## Active skill\n{active}")),
        (None, Some(manifest)) => dynamic.push(format!("## Available skills\n{manifest}")),
        _ => {}
    }
    if let Some(note) = command_note {
        dynamic.push(note.to_owned());
    }
    if let Some(injection) = &options.prompt_injection {
        dynamic.push(injection.clone());
    }
    if !dynamic.is_empty() {
        messages.push(Message::system(&dynamic.join("\n\n")));
    }

    // 6. The current user message.
    messages.push(Message::user(user_text));

    AssembledPrompt {
        messages,
        injected_memory_count: injected,
    }
}

/// Convert stored agent messages into provider messages, expanding tool
/// parts into tool-use parts plus tool-result messages.
pub fn history_to_llm(history: &[AgentMessage]) -> Vec<Message> {
    let mut out = Vec::new();
    for msg in history {
        match msg.role {
            MessageRole::User => out.push(Message::user(&msg.text_content())),
            MessageRole::System => out.push(Message::system(&msg.text_content())),
            MessageRole::Tool => {} // tool results ride with their assistant message
            MessageRole::Assistant => {
                let mut parts = Vec::new();
                let mut results = Vec::new();
                for part in &msg.parts {
                    match part {
                        MessagePart::Text { content } => {
                            if !content.is_empty() {
                                parts.push(ContentPart::Text {
                                    text: content.clone(),
                                });
                            }
                        }
                        MessagePart::Tool {
                            id,
                            name,
                            arguments,
                            result,
                            is_error,
                            ..
                        } => {
                            parts.push(ContentPart::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: arguments.clone(),
                            });
                            if let Some(result) = result {
                                results.push(ContentPart::ToolResult {
                                    tool_use_id: id.clone(),
                                    content: result.clone(),
                                    is_error: *is_error,
                                });
                            }
                        }
                    }
                }
                if !parts.is_empty() {
                    out.push(Message {
                        role: Role::Assistant,
                        content: MessageContent::Parts(parts),
                    });
                }
                if !results.is_empty() {
                    out.push(Message {
                        role: Role::Tool,
                        content: MessageContent::Parts(results),
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use prizm_domain::stream::ToolCallStatus;

    #[test]
    fn gate_requires_four_chars_on_warm_sessions() {
        assert!(!memory_gate("hi", false));
        assert!(memory_gate("hey there", false));
        assert!(memory_gate("hi", true));
        assert!(!memory_gate("", true));
    }

    #[test]
    fn history_expands_tool_parts() {
        let mut assistant = AgentMessage::new(MessageRole::Assistant);
        assistant.parts.push(MessagePart::Text {
            content: "let me check".into(),
        });
        assistant.upsert_tool_part(
            "tc_1",
            "prizm_file_read",
            serde_json::json!({"path": "a.txt"}),
            ToolCallStatus::Completed,
            Some("contents".into()),
            false,
        );
        let history = vec![
            AgentMessage::text(MessageRole::User, "read a.txt"),
            assistant,
        ];
        let llm = history_to_llm(&history);
        assert_eq!(llm.len(), 3); // user, assistant(parts), tool results
        assert_eq!(llm[1].role, Role::Assistant);
        assert_eq!(llm[2].role, Role::Tool);
    }
}

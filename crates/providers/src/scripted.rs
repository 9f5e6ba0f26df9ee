//! Deterministic scripted provider.
//!
//! Each call to `chat_stream` pops the next scripted turn and replays its
//! events. Runtime and gateway tests drive full turns (streaming, tool
//! interleave, cancellation) without a network.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use prizm_domain::error::{Error, Result};
use prizm_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, LlmProvider};

/// One scripted LLM response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub events: Vec<StreamEvent>,
    /// Delay inserted before each event (lets cancellation tests win races).
    pub event_delay: Option<Duration>,
}

impl ScriptedTurn {
    /// A plain text answer: tokens per word plus a `Done` with usage.
    pub fn text(answer: &str) -> Self {
        let mut events: Vec<StreamEvent> = answer
            .split_inclusive(' ')
            .map(|w| StreamEvent::Token { text: w.to_owned() })
            .collect();
        events.push(StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: answer.split_whitespace().count() as u32,
                total_tokens: 10 + answer.split_whitespace().count() as u32,
            }),
            finish_reason: Some("stop".into()),
        });
        Self {
            events,
            event_delay: None,
        }
    }

    /// A single tool call followed by `Done`.
    pub fn tool_call(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> Self {
        Self {
            events: vec![
                StreamEvent::ToolCallStarted {
                    call_id: call_id.to_owned(),
                    tool_name: tool_name.to_owned(),
                },
                StreamEvent::ToolCallFinished {
                    call_id: call_id.to_owned(),
                    tool_name: tool_name.to_owned(),
                    arguments,
                },
                StreamEvent::Done {
                    usage: Some(Usage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    }),
                    finish_reason: Some("tool_calls".into()),
                },
            ],
            event_delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }
}

pub struct ScriptedProvider {
    id: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Requests observed, newest last (assertable by tests).
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            id: "scripted".into(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().push_back(turn);
    }

    /// Requests seen so far (prompt-assembly assertions).
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let turn = self
            .turns
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Upstream("scripted provider exhausted".into()))?;

        let stream = async_stream::stream! {
            for event in turn.events {
                if let Some(delay) = turn.event_delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn replays_turns_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::text("first answer"),
            ScriptedTurn::text("second"),
        ]);

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut text = String::new();
        while let Some(Ok(ev)) = stream.next().await {
            if let StreamEvent::Token { text: t } = ev {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "first answer");

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut text = String::new();
        while let Some(Ok(ev)) = stream.next().await {
            if let StreamEvent::Token { text: t } = ev {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "second");
    }

    #[tokio::test]
    async fn exhausted_script_is_an_upstream_error() {
        let provider = ScriptedProvider::new(vec![]);
        let err = provider
            .chat_stream(&ChatRequest::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Upstream(_)));
    }
}

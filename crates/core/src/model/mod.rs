// Language model abstraction
// Decision: Providers stream ModelEvents; the chat agent turns them into UI chunks
// Decision: Tool calls arrive complete (arguments parsed) so the agent never sees partial JSON
// Decision: Reasoning from earlier turns is not sent back to the model

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{MessagePart, MessageRole, ToolState, UiMessage};

mod openai;
mod scripted;

pub use openai::{OpenAiCompatibleModel, OpenAiConfig};
pub use scripted::{EchoModel, ScriptedModel, ScriptedStep};

/// Errors from a language model provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("failed to parse provider output: {0}")]
    Parse(String),

    #[error("scripted model exhausted: {0}")]
    Script(String),
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tool description offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: Value,
}

/// Provider-neutral conversation message
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// One model invocation
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Event streamed by a model during one step
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    ReasoningDelta(String),
    TextDelta(String),
    Source {
        id: String,
        url: String,
        title: Option<String>,
    },
    ToolCall(ToolCall),
    Finish { finish_reason: String },
}

pub type ModelEventStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

/// A streaming language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name used in logs
    fn name(&self) -> &str;

    /// Start one streamed completion
    async fn stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError>;
}

// ============================================
// UI history -> model messages
// ============================================

/// Convert a validated UI history into provider-neutral messages
///
/// Assistant messages are split at `step-start` boundaries so tool results land
/// right after the call that produced them. Tool parts that never reached an
/// output state are dropped, as a provider would reject an unanswered call.
pub fn to_model_messages(history: &[UiMessage]) -> Vec<ModelMessage> {
    let mut out = Vec::new();

    for message in history {
        match message.role {
            MessageRole::System => out.push(ModelMessage::System {
                content: message.text(),
            }),
            MessageRole::User => out.push(ModelMessage::User {
                content: message.text(),
            }),
            MessageRole::Assistant => {
                for step in message.parts.split(|p| matches!(p, MessagePart::StepStart)) {
                    push_assistant_step(step, &mut out);
                }
            }
        }
    }

    out
}

fn push_assistant_step(parts: &[MessagePart], out: &mut Vec<ModelMessage>) {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for part in parts {
        match part {
            MessagePart::Text { text, .. } => content.push_str(text),
            MessagePart::Tool(tool) => {
                let result = match tool.state {
                    ToolState::OutputAvailable => tool
                        .output
                        .as_ref()
                        .map(|o| serde_json::to_string(o).unwrap_or_default()),
                    ToolState::OutputError => tool.error_text.clone(),
                    ToolState::InputStreaming | ToolState::InputAvailable => None,
                };
                let Some(result) = result else { continue };
                tool_calls.push(ToolCall {
                    id: tool.tool_call_id.clone(),
                    name: tool.tool_name.clone(),
                    arguments: tool.input.clone().unwrap_or(Value::Object(Default::default())),
                });
                results.push(ModelMessage::Tool {
                    tool_call_id: tool.tool_call_id.clone(),
                    content: result,
                });
            }
            _ => {}
        }
    }

    if content.is_empty() && tool_calls.is_empty() {
        return;
    }
    out.push(ModelMessage::Assistant {
        content,
        tool_calls,
    });
    out.extend(results);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolPart;
    use serde_json::json;

    fn tool_part(id: &str, state: ToolState, output: Option<Value>) -> MessagePart {
        MessagePart::Tool(ToolPart {
            tool_name: "get_current_datetime".into(),
            dynamic: false,
            tool_call_id: id.into(),
            state,
            input: Some(json!({})),
            output,
            error_text: None,
        })
    }

    #[test]
    fn test_simple_history() {
        let history = vec![
            UiMessage::system("s", "be brief"),
            UiMessage::user("1", "hi"),
            UiMessage::assistant("2", "hello"),
        ];
        assert_eq!(
            to_model_messages(&history),
            vec![
                ModelMessage::System {
                    content: "be brief".into()
                },
                ModelMessage::User {
                    content: "hi".into()
                },
                ModelMessage::Assistant {
                    content: "hello".into(),
                    tool_calls: vec![]
                },
            ]
        );
    }

    #[test]
    fn test_tool_steps_split_and_reasoning_dropped() {
        let assistant = UiMessage {
            id: "a".into(),
            role: MessageRole::Assistant,
            parts: vec![
                MessagePart::StepStart,
                MessagePart::Reasoning {
                    text: "think".into(),
                    state: None,
                },
                tool_part("c1", ToolState::OutputAvailable, Some(json!({ "iso": "x" }))),
                tool_part("c2", ToolState::InputAvailable, None),
                MessagePart::StepStart,
                MessagePart::text("It is x."),
            ],
            metadata: None,
        };

        let messages = to_model_messages(&[UiMessage::user("u", "time?"), assistant]);
        assert_eq!(messages.len(), 4);
        match &messages[1] {
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                assert!(content.is_empty());
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].id, "c1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            messages[2],
            ModelMessage::Tool {
                tool_call_id: "c1".into(),
                content: r#"{"iso":"x"}"#.into()
            }
        );
        assert_eq!(
            messages[3],
            ModelMessage::Assistant {
                content: "It is x.".into(),
                tool_calls: vec![]
            }
        );
    }
}

// UI message types
//
// UiMessage is the message shape exchanged with the browser client: a role and
// an ordered list of typed parts (text, reasoning, tool invocations, sources).
// The client always sends its full, locally reconciled history, so these types
// round-trip through the session store unchanged apart from unknown fields on
// known part types.
//
// Decision: Parts use a hand-written Value conversion because tool parts are
// tagged "tool-{name}", which serde's internal tagging cannot express.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Assistant response (may contain tool invocations in parts)
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct UiMessage {
    /// Client-assigned message ID
    pub id: String,

    /// Message role
    pub role: MessageRole,

    /// Ordered content parts
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub parts: Vec<MessagePart>,

    /// Message-level metadata (opaque to the server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<Value>,
}

impl UiMessage {
    /// Create a user message with a single text part
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::User,
            parts: vec![MessagePart::text(text)],
            metadata: None,
        }
    }

    /// Create an assistant message with a single text part
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            parts: vec![MessagePart::text(text)],
            metadata: None,
        }
    }

    /// Create a system message with a single text part
    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::System,
            parts: vec![MessagePart::text(text)],
            metadata: None,
        }
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================
// Parts
// ============================================

/// Lifecycle state of a tool invocation part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

/// A tool invocation part (`tool-{name}` or `dynamic-tool`)
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPart {
    pub tool_name: String,
    /// Tagged `dynamic-tool` on the wire (tool name carried in a field)
    pub dynamic: bool,
    pub tool_call_id: String,
    pub state: ToolState,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error_text: Option<String>,
}

/// One content part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum MessagePart {
    /// Plain text
    Text { text: String, state: Option<String> },
    /// Model reasoning trace
    Reasoning { text: String, state: Option<String> },
    /// Tool invocation with its lifecycle state
    Tool(ToolPart),
    /// Source citation
    SourceUrl {
        source_id: String,
        url: String,
        title: Option<String>,
    },
    /// Step boundary marker
    StepStart,
    /// Any other part type (files, data parts, documents), kept verbatim
    Other(Map<String, Value>),
}

impl MessagePart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text {
            text: text.into(),
            state: None,
        }
    }

    /// Wire `type` tag of this part
    pub fn kind(&self) -> String {
        match self {
            MessagePart::Text { .. } => "text".to_string(),
            MessagePart::Reasoning { .. } => "reasoning".to_string(),
            MessagePart::Tool(tool) if tool.dynamic => "dynamic-tool".to_string(),
            MessagePart::Tool(tool) => format!("tool-{}", tool.tool_name),
            MessagePart::SourceUrl { .. } => "source-url".to_string(),
            MessagePart::StepStart => "step-start".to_string(),
            MessagePart::Other(map) => map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn require_string(map: &mut Map<String, Value>, kind: &str, key: &str) -> Result<String, String> {
    take_string(map, key).ok_or_else(|| format!("{} part is missing string field '{}'", kind, key))
}

impl TryFrom<Value> for MessagePart {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("message part must be an object".to_string());
        };
        let kind = match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err("message part is missing string field 'type'".to_string()),
        };

        match kind.as_str() {
            "text" => Ok(MessagePart::Text {
                text: require_string(&mut map, "text", "text")?,
                state: take_string(&mut map, "state"),
            }),
            "reasoning" => Ok(MessagePart::Reasoning {
                text: require_string(&mut map, "reasoning", "text")?,
                state: take_string(&mut map, "state"),
            }),
            "source-url" => Ok(MessagePart::SourceUrl {
                source_id: require_string(&mut map, "source-url", "sourceId")?,
                url: require_string(&mut map, "source-url", "url")?,
                title: take_string(&mut map, "title"),
            }),
            "step-start" => Ok(MessagePart::StepStart),
            _ if kind == "dynamic-tool" || kind.starts_with("tool-") => {
                let dynamic = kind == "dynamic-tool";
                let tool_name = if dynamic {
                    require_string(&mut map, &kind, "toolName")?
                } else {
                    kind["tool-".len()..].to_string()
                };
                if tool_name.is_empty() {
                    return Err("tool part has an empty tool name".to_string());
                }
                let state = match map.remove("state") {
                    Some(state) => serde_json::from_value(state)
                        .map_err(|e| format!("{} part has invalid state: {}", kind, e))?,
                    None => return Err(format!("{} part is missing field 'state'", kind)),
                };
                Ok(MessagePart::Tool(ToolPart {
                    tool_name,
                    dynamic,
                    tool_call_id: require_string(&mut map, &kind, "toolCallId")?,
                    state,
                    input: map.remove("input"),
                    output: map.remove("output"),
                    error_text: take_string(&mut map, "errorText"),
                }))
            }
            _ => Ok(MessagePart::Other(map)),
        }
    }
}

impl From<MessagePart> for Value {
    fn from(part: MessagePart) -> Self {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };
        let kind = part.kind();

        match part {
            MessagePart::Text { text, state } | MessagePart::Reasoning { text, state } => {
                put("type", Value::String(kind));
                put("text", Value::String(text));
                if let Some(state) = state {
                    put("state", Value::String(state));
                }
            }
            MessagePart::Tool(tool) => {
                put("type", Value::String(kind));
                if tool.dynamic {
                    put("toolName", Value::String(tool.tool_name));
                }
                put("toolCallId", Value::String(tool.tool_call_id));
                put(
                    "state",
                    serde_json::to_value(tool.state).unwrap_or(Value::Null),
                );
                if let Some(input) = tool.input {
                    put("input", input);
                }
                if let Some(output) = tool.output {
                    put("output", output);
                }
                if let Some(error_text) = tool.error_text {
                    put("errorText", Value::String(error_text));
                }
            }
            MessagePart::SourceUrl {
                source_id,
                url,
                title,
            } => {
                put("type", Value::String(kind));
                put("sourceId", Value::String(source_id));
                put("url", Value::String(url));
                if let Some(title) = title {
                    put("title", Value::String(title));
                }
            }
            MessagePart::StepStart => put("type", Value::String(kind)),
            MessagePart::Other(other) => return Value::Object(other),
        }

        Value::Object(map)
    }
}

// ============================================
// Validation
// ============================================

/// Reasons an inbound history is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("message at index {0} has an empty id")]
    EmptyId(usize),

    #[error("duplicate message id '{0}'")]
    DuplicateId(String),

    #[error("message '{0}' has a tool part with an empty toolCallId")]
    EmptyToolCallId(String),

    #[error("message '{id}' has role {role} but contains a {kind} part")]
    UnexpectedPart {
        id: String,
        role: MessageRole,
        kind: String,
    },
}

/// Check the structural rules serde cannot express
///
/// An empty history is valid (it is what a fallback start uses when the stored
/// history has expired).
pub fn validate_history(messages: &[UiMessage]) -> Result<(), HistoryError> {
    let mut seen = std::collections::HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        if message.id.trim().is_empty() {
            return Err(HistoryError::EmptyId(index));
        }
        if !seen.insert(message.id.as_str()) {
            return Err(HistoryError::DuplicateId(message.id.clone()));
        }

        for part in &message.parts {
            match part {
                MessagePart::Tool(tool) if tool.tool_call_id.is_empty() => {
                    return Err(HistoryError::EmptyToolCallId(message.id.clone()));
                }
                MessagePart::Tool(_) | MessagePart::Reasoning { .. }
                    if message.role != MessageRole::Assistant =>
                {
                    return Err(HistoryError::UnexpectedPart {
                        id: message.id.clone(),
                        role: message.role,
                        kind: part.kind(),
                    });
                }
                _ => {}
            }
        }
    }

    Ok(())
}

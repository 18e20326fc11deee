// UI message stream chunks
//
// UiMessageChunk is one event of the AI SDK v5 UI message stream protocol, the
// unit a chat run appends to its ledger and a stream responder sends as one SSE
// event. `finish` and `error` are terminal: nothing follows them in a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Generic text sent to clients when a run fails; details stay in the logs
pub const GENERIC_ERROR_TEXT: &str = "An error occurred while generating the response. Please try again.";

/// One chunk of a UI message stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiMessageChunk {
    /// Start of the assistant message
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    /// Start of one model step
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    /// The model began calling a tool
    #[serde(rename_all = "camelCase")]
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    /// Tool arguments are complete
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputAvailable {
        tool_call_id: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        output: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    /// Source citation
    #[serde(rename_all = "camelCase")]
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// End of one model step
    FinishStep,
    /// Terminal failure
    #[serde(rename_all = "camelCase")]
    Error {
        error_text: String,
    },
    /// Terminal success
    Finish,
}

impl UiMessageChunk {
    /// Create a terminal error chunk with the generic client-facing text
    pub fn generic_error() -> Self {
        UiMessageChunk::Error {
            error_text: GENERIC_ERROR_TEXT.to_string(),
        }
    }

    /// Whether this chunk ends its run's sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, UiMessageChunk::Finish | UiMessageChunk::Error { .. })
    }

    /// Whether this chunk carries reasoning output
    pub fn is_reasoning(&self) -> bool {
        matches!(
            self,
            UiMessageChunk::ReasoningStart { .. }
                | UiMessageChunk::ReasoningDelta { .. }
                | UiMessageChunk::ReasoningEnd { .. }
        )
    }

    /// Whether this chunk is a source citation
    pub fn is_source(&self) -> bool {
        matches!(self, UiMessageChunk::SourceUrl { .. })
    }

    /// Serialize for the ledger
    pub fn to_value(&self) -> Value {
        // Every variant is a plain struct of strings and JSON values
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// OpenAI-compatible chat completions model
//
// Streams /chat/completions over SSE and maps deltas to ModelEvents. Works with
// any endpoint speaking the OpenAI protocol; `reasoning_content` deltas (sent by
// several compatible providers) become reasoning events.
//
// Decision: Tool call fragments are accumulated by index and emitted once complete
// Decision: A stream that ends without a finish_reason still yields Finish("stop")

use std::collections::VecDeque;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    LanguageModel, ModelError, ModelEvent, ModelEventStream, ModelMessage, ModelRequest, ToolCall,
    ToolDefinition,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for the OpenAI-compatible model
#[derive(Clone, Default)]
pub struct OpenAiConfig {
    /// Chat completions endpoint (LLM_API_URL)
    pub api_url: Option<String>,
    /// Bearer token (LLM_API_KEY)
    pub api_key: Option<String>,
    /// Model name (LLM_MODEL)
    pub model: Option<String>,
    /// Reasoning effort hint (LLM_REASONING_EFFORT)
    pub reasoning_effort: Option<String>,
}

impl OpenAiConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("LLM_API_URL").ok(),
            api_key: std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("LLM_MODEL").ok(),
            reasoning_effort: std::env::var("LLM_REASONING_EFFORT").ok(),
        }
    }

    /// Endpoint with default
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Model name with default
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_url", &self.api_url())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model())
            .field("reasoning_effort", &self.reasoning_effort)
            .finish()
    }
}

/// Language model speaking the OpenAI chat completions protocol
#[derive(Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    reasoning_effort: Option<String>,
}

impl OpenAiCompatibleModel {
    /// Create a model against the default OpenAI endpoint
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_API_URL)
    }

    /// Create a model against a custom endpoint
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            model: model.into(),
            reasoning_effort: None,
        }
    }

    /// Build from configuration; `None` when no API key is configured
    pub fn from_config(config: &OpenAiConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let mut model = Self::with_base_url(api_key, config.model(), config.api_url());
        model.reasoning_effort = config.reasoning_effort.clone();
        Some(model)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_message(message: &ModelMessage) -> OpenAiMessage {
        match message {
            ModelMessage::System { content } => OpenAiMessage::text("system", content),
            ModelMessage::User { content } => OpenAiMessage::text("user", content),
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => OpenAiMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(content.clone())
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|tc| OpenAiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: tc.name.clone(),
                                    arguments: serde_json::to_string(&tc.arguments)
                                        .unwrap_or_default(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            ModelMessage::Tool {
                tool_call_id,
                content,
            } => OpenAiMessage {
                role: "tool".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError> {
        let body = OpenAiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            stream: true,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(&request.tools))
            },
            reasoning_effort: self.reasoning_effort.clone(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|result| result.map(|event| event.data).map_err(|e| e.to_string()))
            .boxed();

        Ok(Box::pin(stream::unfold(
            DeltaState::new(events),
            |mut state| async move {
                loop {
                    if let Some(item) = state.pending.pop_front() {
                        return Some((item, state));
                    }
                    if state.done {
                        return None;
                    }
                    match state.events.next().await {
                        Some(Ok(data)) => state.handle(&data),
                        Some(Err(e)) => {
                            state.done = true;
                            state.pending.push_back(Err(ModelError::Stream(e)));
                        }
                        None => {
                            state.finish("stop");
                            state.done = true;
                        }
                    }
                }
            },
        )))
    }
}

impl std::fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleModel")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

// ============================================================================
// Delta accumulation
// ============================================================================

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

struct DeltaState {
    events: BoxStream<'static, Result<String, String>>,
    calls: Vec<PartialCall>,
    pending: VecDeque<Result<ModelEvent, ModelError>>,
    finished: bool,
    done: bool,
}

impl DeltaState {
    fn new(events: BoxStream<'static, Result<String, String>>) -> Self {
        Self {
            events,
            calls: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            done: false,
        }
    }

    fn handle(&mut self, data: &str) {
        if data == "[DONE]" {
            self.finish("stop");
            self.done = true;
            return;
        }

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.done = true;
                self.pending.push_back(Err(ModelError::Parse(format!(
                    "Failed to parse chunk: {}",
                    e
                ))));
                return;
            }
        };
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
            self.pending.push_back(Ok(ModelEvent::ReasoningDelta(reasoning)));
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            self.pending.push_back(Ok(ModelEvent::TextDelta(content)));
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let idx = tc.index as usize;
            while self.calls.len() <= idx {
                self.calls.push(PartialCall::default());
            }
            let call = &mut self.calls[idx];
            if let Some(id) = tc.id {
                call.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    call.name = name;
                }
                if let Some(args) = function.arguments {
                    call.arguments.push_str(&args);
                }
            }
        }
        if let Some(reason) = choice.finish_reason {
            self.finish(&reason);
        }
    }

    /// Flush accumulated tool calls and emit Finish once
    fn finish(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        for call in std::mem::take(&mut self.calls) {
            let arguments = if call.arguments.trim().is_empty() {
                Ok(Value::Object(Default::default()))
            } else {
                serde_json::from_str(&call.arguments)
            };
            match arguments {
                Ok(arguments) => self.pending.push_back(Ok(ModelEvent::ToolCall(ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }))),
                Err(e) => {
                    self.pending.push_back(Err(ModelError::Parse(format!(
                        "invalid arguments for tool call {}: {}",
                        call.id, e
                    ))));
                    self.done = true;
                    return;
                }
            }
        }
        debug!(finish_reason = reason, "model stream finished");
        self.pending.push_back(Ok(ModelEvent::Finish {
            finish_reason: reason.to_string(),
        }));
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|c| format!("data: {}\n\n", c))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn mock(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    fn model(server: &MockServer) -> OpenAiCompatibleModel {
        OpenAiCompatibleModel::with_base_url(
            "test-key",
            "test-model",
            format!("{}/v1/chat/completions", server.uri()),
        )
    }

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User {
                content: "hi".into(),
            }],
            tools: vec![],
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let model = OpenAiCompatibleModel::new("secret", "m");
        let debug = format!("{:?}", model);
        assert!(debug.contains("OpenAiCompatibleModel"));
        assert!(!debug.contains("secret"));

        let config = OpenAiConfig {
            api_key: Some("secret".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("secret"));
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert!(OpenAiCompatibleModel::from_config(&OpenAiConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_streams_text_and_reasoning() {
        let server = MockServer::start().await;
        mock(
            &server,
            sse(&[
                json!({ "choices": [{ "delta": { "reasoning_content": "thinking" } }] }),
                json!({ "choices": [{ "delta": { "content": "Hel" } }] }),
                json!({ "choices": [{ "delta": { "content": "lo" } }] }),
                json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] }),
            ]),
        )
        .await;

        let events: Vec<_> = model(&server)
            .stream(request())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                ModelEvent::ReasoningDelta("thinking".into()),
                ModelEvent::TextDelta("Hel".into()),
                ModelEvent::TextDelta("lo".into()),
                ModelEvent::Finish {
                    finish_reason: "stop".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_accumulates_tool_calls() {
        let server = MockServer::start().await;
        mock(
            &server,
            sse(&[
                json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "id": "call_1", "function": { "name": "get_current_datetime", "arguments": "" } }
                ] } }] }),
                json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "function": { "arguments": "{\"a\":" } }
                ] } }] }),
                json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "function": { "arguments": "1}" } }
                ] } }] }),
                json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }] }),
            ]),
        )
        .await;

        let events: Vec<_> = model(&server)
            .stream(request())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                ModelEvent::ToolCall(ToolCall {
                    id: "call_1".into(),
                    name: "get_current_datetime".into(),
                    arguments: json!({ "a": 1 }),
                }),
                ModelEvent::Finish {
                    finish_reason: "tool_calls".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        match model(&server).stream(request()).await {
            Err(ModelError::Api { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_an_error() {
        let server = MockServer::start().await;
        mock(&server, "data: {not json\n\n".to_string()).await;

        let result: Result<Vec<_>, _> = model(&server)
            .stream(request())
            .await
            .unwrap()
            .try_collect()
            .await;
        assert!(matches!(result, Err(ModelError::Parse(_))));
    }
}

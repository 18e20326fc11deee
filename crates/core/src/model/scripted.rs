// Deterministic models for dev mode and tests
// Decision: ScriptedModel replays one scripted step per invocation and records requests
// Decision: EchoModel needs no credentials so the server runs out of the box

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::{
    LanguageModel, ModelError, ModelEvent, ModelEventStream, ModelMessage, ModelRequest, ToolCall,
};

/// One scripted model invocation
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    events: Vec<Result<ModelEvent, ModelError>>,
    request_error: Option<ModelError>,
    delay: Option<Duration>,
}

impl ScriptedStep {
    /// A step streaming the given events
    pub fn events(events: Vec<ModelEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            ..Default::default()
        }
    }

    /// A step answering with text split into the given deltas, then `stop`
    pub fn text<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<ModelEvent> = deltas
            .into_iter()
            .map(|d| ModelEvent::TextDelta(d.into()))
            .collect();
        events.push(ModelEvent::Finish {
            finish_reason: "stop".into(),
        });
        Self::events(events)
    }

    /// A step requesting the given tool calls
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        let mut events: Vec<ModelEvent> = calls.into_iter().map(ModelEvent::ToolCall).collect();
        events.push(ModelEvent::Finish {
            finish_reason: "tool_calls".into(),
        });
        Self::events(events)
    }

    /// A step whose request fails before streaming anything
    pub fn request_error(error: ModelError) -> Self {
        Self {
            request_error: Some(error),
            ..Default::default()
        }
    }

    /// Fail the stream after the events scripted so far
    pub fn then_fail(mut self, error: ModelError) -> Self {
        self.events.push(Err(error));
        self
    }

    /// Sleep before each event
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Model that replays scripted steps in order
#[derive(Debug, Default)]
pub struct ScriptedModel {
    steps: Mutex<VecDeque<ScriptedStep>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    /// Number of invocations so far
    pub fn invocations(&self) -> usize {
        self.requests.lock().len()
    }
}

fn delayed(
    events: Vec<Result<ModelEvent, ModelError>>,
    delay: Option<Duration>,
) -> ModelEventStream {
    Box::pin(stream::iter(events).then(move |event| async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        event
    }))
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError> {
        self.requests.lock().push(request);
        let step = self
            .steps
            .lock()
            .pop_front()
            .ok_or_else(|| ModelError::Script("no steps left".into()))?;

        if let Some(error) = step.request_error {
            return Err(error);
        }
        Ok(delayed(step.events, step.delay))
    }
}

/// Model that answers by echoing the latest user message word by word
#[derive(Debug, Clone)]
pub struct EchoModel {
    delay: Duration,
}

impl EchoModel {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ModelMessage::User { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or_default();

        let reply = format!("You said: {}", last_user);
        let mut events: Vec<Result<ModelEvent, ModelError>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(ModelEvent::TextDelta(word.to_string())))
            .collect();
        events.push(Ok(ModelEvent::Finish {
            finish_reason: "stop".into(),
        }));

        Ok(delayed(events, Some(self.delay)))
    }
}

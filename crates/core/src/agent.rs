// Chat agent workflow
//
// ChatWorkflow is the durable unit of work behind one assistant response: it
// runs the model/tool loop for a conversation and writes every UI chunk to the
// run ledger as it is produced. It never talks to an HTTP connection, so the
// run keeps going when the client goes away.
//
// Decision: On failure the workflow returns Err and the runner appends the
//           terminal error chunk, so a run never ends with two terminal chunks
// Decision: A step continues the loop only if the model called tools
// Decision: Text and reasoning blocks get ids unique within the message
// Decision: A resumed run keeps every step that reached finish-step and retries
//           the interrupted one; the interrupted step's open blocks are closed
//           and its unanswered tool calls marked as errors first

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use chatrun_durable::{ChunkWriter, Workflow, WorkflowError};

use crate::chunk::UiMessageChunk;
use crate::message::{validate_history, UiMessage};
use crate::model::{
    to_model_messages, LanguageModel, ModelEvent, ModelMessage, ModelRequest, ToolCall,
};
use crate::tools::{ToolOutcome, ToolRegistry};

/// Workflow type the chat agent is registered under
pub const CHAT_WORKFLOW_TYPE: &str = "chat";

const DEFAULT_MAX_STEPS: usize = 5;

/// Error text for tool calls cut off by an interrupted step
const INTERRUPTED_TOOL_TEXT: &str = "Tool call was interrupted";

/// Configuration for the chat agent
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Prepended as a system message (CHAT_SYSTEM_PROMPT)
    pub system_prompt: Option<String>,
    /// Upper bound on model invocations per run (CHAT_MAX_STEPS)
    pub max_steps: Option<usize>,
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            system_prompt: std::env::var("CHAT_SYSTEM_PROMPT")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            max_steps: std::env::var("CHAT_MAX_STEPS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Max steps with default (at least 1)
    pub fn max_steps(&self) -> usize {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1)
    }
}

/// Input recorded with each chat run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatWorkflowInput {
    pub messages: Vec<UiMessage>,
}

/// The model/tool loop as a durable workflow
pub struct ChatWorkflow {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl ChatWorkflow {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            model,
            tools,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    fn initial_conversation(&self, history: &[UiMessage]) -> Vec<ModelMessage> {
        let mut conversation = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            conversation.push(ModelMessage::System {
                content: prompt.clone(),
            });
        }
        conversation.extend(to_model_messages(history));
        conversation
    }

    fn decode_input(input: Value) -> Result<ChatWorkflowInput, WorkflowError> {
        let input: ChatWorkflowInput = serde_json::from_value(input)
            .map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;
        validate_history(&input.messages).map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;
        Ok(input)
    }

    async fn emit_start(writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        let message_id = format!("msg_{}", Uuid::now_v7().simple());
        emit(
            writer,
            UiMessageChunk::Start {
                message_id: Some(message_id),
            },
        )
        .await
    }
}

impl std::fmt::Debug for ChatWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatWorkflow")
            .field("model", &self.model.name())
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish()
    }
}

async fn emit(writer: &mut ChunkWriter, chunk: UiMessageChunk) -> Result<(), WorkflowError> {
    writer.write(chunk.to_value()).await?;
    Ok(())
}

/// Open text/reasoning blocks of the current step
#[derive(Default)]
struct Blocks {
    next_id: usize,
    text: Option<String>,
    reasoning: Option<String>,
}

impl Blocks {
    fn fresh_id(&mut self, kind: &str) -> String {
        let id = format!("{}-{}", kind, self.next_id);
        self.next_id += 1;
        id
    }

    async fn close_text(&mut self, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        if let Some(id) = self.text.take() {
            emit(writer, UiMessageChunk::TextEnd { id }).await?;
        }
        Ok(())
    }

    async fn close_reasoning(&mut self, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        if let Some(id) = self.reasoning.take() {
            emit(writer, UiMessageChunk::ReasoningEnd { id }).await?;
        }
        Ok(())
    }

    async fn close_all(&mut self, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        self.close_reasoning(writer).await?;
        self.close_text(writer).await
    }

    async fn text_delta(&mut self, writer: &mut ChunkWriter, delta: String) -> Result<(), WorkflowError> {
        self.close_reasoning(writer).await?;
        let id = match &self.text {
            Some(id) => id.clone(),
            None => {
                let id = self.fresh_id("text");
                emit(writer, UiMessageChunk::TextStart { id: id.clone() }).await?;
                self.text = Some(id.clone());
                id
            }
        };
        emit(writer, UiMessageChunk::TextDelta { id, delta }).await
    }

    async fn reasoning_delta(
        &mut self,
        writer: &mut ChunkWriter,
        delta: String,
    ) -> Result<(), WorkflowError> {
        self.close_text(writer).await?;
        let id = match &self.reasoning {
            Some(id) => id.clone(),
            None => {
                let id = self.fresh_id("reasoning");
                emit(writer, UiMessageChunk::ReasoningStart { id: id.clone() }).await?;
                self.reasoning = Some(id.clone());
                id
            }
        };
        emit(writer, UiMessageChunk::ReasoningDelta { id, delta }).await
    }
}

impl ChatWorkflow {
    /// Model/tool loop from `first_step` on, then the finish chunk
    async fn run_steps(
        &self,
        mut conversation: Vec<ModelMessage>,
        first_step: usize,
        mut blocks: Blocks,
        writer: &mut ChunkWriter,
    ) -> Result<(), WorkflowError> {
        let definitions = self.tools.definitions();

        for step in first_step..self.config.max_steps() {
            emit(writer, UiMessageChunk::StartStep).await?;

            let mut events = self
                .model
                .stream(ModelRequest {
                    messages: conversation.clone(),
                    tools: definitions.clone(),
                })
                .await
                .map_err(|e| WorkflowError::failed(format!("model request failed: {}", e)))?;

            let mut text = String::new();
            let mut calls = Vec::new();

            while let Some(event) = events.next().await {
                let event =
                    event.map_err(|e| WorkflowError::failed(format!("model stream failed: {}", e)))?;
                match event {
                    ModelEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        blocks.text_delta(writer, delta).await?;
                    }
                    ModelEvent::ReasoningDelta(delta) => {
                        blocks.reasoning_delta(writer, delta).await?;
                    }
                    ModelEvent::Source { id, url, title } => {
                        emit(
                            writer,
                            UiMessageChunk::SourceUrl {
                                source_id: id,
                                url,
                                title,
                            },
                        )
                        .await?;
                    }
                    ModelEvent::ToolCall(call) => {
                        blocks.close_all(writer).await?;
                        emit(
                            writer,
                            UiMessageChunk::ToolInputStart {
                                tool_call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                            },
                        )
                        .await?;
                        emit(
                            writer,
                            UiMessageChunk::ToolInputAvailable {
                                tool_call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                input: call.arguments.clone(),
                            },
                        )
                        .await?;
                        calls.push(call);
                    }
                    ModelEvent::Finish { finish_reason } => {
                        debug!(step, %finish_reason, "model step finished");
                    }
                }
            }
            blocks.close_all(writer).await?;

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let outcome = self.tools.execute(call).await;
                let chunk = match &outcome {
                    ToolOutcome::Output(output) => UiMessageChunk::ToolOutputAvailable {
                        tool_call_id: call.id.clone(),
                        output: output.clone(),
                    },
                    ToolOutcome::Error(error_text) => UiMessageChunk::ToolOutputError {
                        tool_call_id: call.id.clone(),
                        error_text: error_text.clone(),
                    },
                };
                emit(writer, chunk).await?;
                results.push(ModelMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: outcome.to_model_content(),
                });
            }

            emit(writer, UiMessageChunk::FinishStep).await?;
            info!(step, tool_calls = calls.len(), "completed agent step");

            let done = calls.is_empty();
            conversation.push(ModelMessage::Assistant {
                content: text,
                tool_calls: calls,
            });
            conversation.extend(results);
            if done {
                break;
            }
        }

        emit(writer, UiMessageChunk::Finish).await
    }
}

/// Steps of an interrupted run, rebuilt from its recorded chunks
#[derive(Debug, Default)]
struct Replay {
    started: bool,
    terminal: bool,
    /// Model context contributed by the steps that reached finish-step
    conversation: Vec<ModelMessage>,
    completed_steps: usize,
    /// The last finished step made no tool calls, so only finish is missing
    answered: bool,
    /// Text and reasoning blocks opened so far
    next_block_id: usize,
    /// A step that started but never reached finish-step
    interrupted: Option<StepReplay>,
}

#[derive(Debug, Default)]
struct StepReplay {
    text: String,
    calls: Vec<ToolCall>,
    results: Vec<ModelMessage>,
    answered_ids: Vec<String>,
    open_text: Option<String>,
    open_reasoning: Option<String>,
}

impl StepReplay {
    fn answer(&mut self, tool_call_id: String, outcome: ToolOutcome) {
        self.results.push(ModelMessage::Tool {
            tool_call_id: tool_call_id.clone(),
            content: outcome.to_model_content(),
        });
        self.answered_ids.push(tool_call_id);
    }

    fn unanswered_calls(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|call| !self.answered_ids.contains(&call.id))
            .map(|call| call.id.clone())
            .collect()
    }
}

impl Replay {
    fn from_chunks(chunks: &[Value]) -> Result<Self, WorkflowError> {
        let mut replay = Replay::default();
        let mut step: Option<StepReplay> = None;

        for value in chunks {
            let chunk: UiMessageChunk = serde_json::from_value(value.clone())
                .map_err(|e| WorkflowError::failed(format!("unreadable recorded chunk: {}", e)))?;
            match chunk {
                UiMessageChunk::Start { .. } => replay.started = true,
                UiMessageChunk::StartStep => step = Some(StepReplay::default()),
                UiMessageChunk::TextStart { id } => {
                    replay.next_block_id += 1;
                    if let Some(step) = step.as_mut() {
                        step.open_text = Some(id);
                    }
                }
                UiMessageChunk::TextDelta { delta, .. } => {
                    if let Some(step) = step.as_mut() {
                        step.text.push_str(&delta);
                    }
                }
                UiMessageChunk::TextEnd { .. } => {
                    if let Some(step) = step.as_mut() {
                        step.open_text = None;
                    }
                }
                UiMessageChunk::ReasoningStart { id } => {
                    replay.next_block_id += 1;
                    if let Some(step) = step.as_mut() {
                        step.open_reasoning = Some(id);
                    }
                }
                UiMessageChunk::ReasoningEnd { .. } => {
                    if let Some(step) = step.as_mut() {
                        step.open_reasoning = None;
                    }
                }
                UiMessageChunk::ToolInputAvailable {
                    tool_call_id,
                    tool_name,
                    input,
                } => {
                    if let Some(step) = step.as_mut() {
                        step.calls.push(ToolCall {
                            id: tool_call_id,
                            name: tool_name,
                            arguments: input,
                        });
                    }
                }
                UiMessageChunk::ToolOutputAvailable {
                    tool_call_id,
                    output,
                } => {
                    if let Some(step) = step.as_mut() {
                        step.answer(tool_call_id, ToolOutcome::Output(output));
                    }
                }
                UiMessageChunk::ToolOutputError {
                    tool_call_id,
                    error_text,
                } => {
                    if let Some(step) = step.as_mut() {
                        step.answer(tool_call_id, ToolOutcome::Error(error_text));
                    }
                }
                UiMessageChunk::FinishStep => {
                    if let Some(step) = step.take() {
                        replay.completed_steps += 1;
                        replay.answered = step.calls.is_empty();
                        replay.conversation.push(ModelMessage::Assistant {
                            content: step.text,
                            tool_calls: step.calls,
                        });
                        replay.conversation.extend(step.results);
                    }
                }
                UiMessageChunk::Finish | UiMessageChunk::Error { .. } => replay.terminal = true,
                UiMessageChunk::ReasoningDelta { .. }
                | UiMessageChunk::ToolInputStart { .. }
                | UiMessageChunk::SourceUrl { .. } => {}
            }
        }

        replay.interrupted = step;
        Ok(replay)
    }
}

#[async_trait]
impl Workflow for ChatWorkflow {
    fn workflow_type(&self) -> &'static str {
        CHAT_WORKFLOW_TYPE
    }

    async fn run(&self, input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        let input = Self::decode_input(input)?;
        Self::emit_start(writer).await?;

        let conversation = self.initial_conversation(&input.messages);
        self.run_steps(conversation, 0, Blocks::default(), writer).await
    }

    async fn resume(
        &self,
        input: Value,
        recorded: Vec<Value>,
        writer: &mut ChunkWriter,
    ) -> Result<(), WorkflowError> {
        let input = Self::decode_input(input)?;
        let replay = Replay::from_chunks(&recorded)?;
        if replay.terminal {
            debug!("recorded output already ends the message");
            return Ok(());
        }
        if !replay.started {
            Self::emit_start(writer).await?;
        }

        let mut blocks = Blocks {
            next_id: replay.next_block_id,
            ..Default::default()
        };
        if let Some(step) = replay.interrupted {
            blocks.text = step.open_text.clone();
            blocks.reasoning = step.open_reasoning.clone();
            blocks.close_all(writer).await?;
            for tool_call_id in step.unanswered_calls() {
                emit(
                    writer,
                    UiMessageChunk::ToolOutputError {
                        tool_call_id,
                        error_text: INTERRUPTED_TOOL_TEXT.to_string(),
                    },
                )
                .await?;
            }
            emit(writer, UiMessageChunk::FinishStep).await?;
        }

        info!(
            completed_steps = replay.completed_steps,
            recorded = recorded.len(),
            "resuming agent loop"
        );

        if replay.answered {
            return emit(writer, UiMessageChunk::Finish).await;
        }
        let mut conversation = self.initial_conversation(&input.messages);
        conversation.extend(replay.conversation);
        self.run_steps(conversation, replay.completed_steps, blocks, writer)
            .await
    }

    fn failure_chunk(&self, _message: &str) -> Option<Value> {
        Some(UiMessageChunk::generic_error().to_value())
    }
}

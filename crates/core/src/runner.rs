// Chat runner facade
// Decision: Wraps the generic WorkflowRunner with typed chat input and chunk output
// Decision: A stored chunk that no longer decodes ends the stream with an error

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::warn;

use chatrun_durable::{ChunkStream, LedgerError, RunChunk, RunId, RunnerError, WorkflowRunner};

use crate::agent::{ChatWorkflow, ChatWorkflowInput, CHAT_WORKFLOW_TYPE};
use crate::chunk::UiMessageChunk;
use crate::message::UiMessage;

/// One decoded chunk with its offset within the run
#[derive(Debug, Clone, PartialEq)]
pub struct ChatChunk {
    pub offset: i64,
    pub chunk: UiMessageChunk,
}

/// Failures while reading a chat run
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("chunk {offset} is not a valid UI message chunk: {message}")]
    Decode { offset: i64, message: String },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, StreamError>> + Send>>;

/// Starts chat runs and attaches readers to them
#[derive(Clone)]
pub struct ChatRunner {
    runner: WorkflowRunner,
}

impl ChatRunner {
    /// Register the chat workflow with `runner`
    pub fn new(runner: WorkflowRunner, workflow: ChatWorkflow) -> Self {
        runner.register(Arc::new(workflow));
        Self { runner }
    }

    /// Underlying generic runner
    pub fn runner(&self) -> &WorkflowRunner {
        &self.runner
    }

    /// Start a run producing the assistant's reply to `messages`
    pub async fn start(&self, messages: &[UiMessage]) -> Result<(RunId, ChatStream), RunnerError> {
        let input = serde_json::to_value(ChatWorkflowInput {
            messages: messages.to_vec(),
        })
        .map_err(|e| RunnerError::Ledger(LedgerError::Serialization(e.to_string())))?;

        let (run_id, stream) = self.runner.start(CHAT_WORKFLOW_TYPE, input).await?;
        Ok((run_id, decode(stream)))
    }

    /// Read an existing run from `from_offset`
    pub async fn attach(&self, run_id: RunId, from_offset: i64) -> Result<ChatStream, RunnerError> {
        let stream = self.runner.attach(run_id, from_offset).await?;
        Ok(decode(stream))
    }
}

impl std::fmt::Debug for ChatRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRunner")
            .field("worker_id", &self.runner.worker_id())
            .finish()
    }
}

fn decode(stream: ChunkStream) -> ChatStream {
    let mut failed = false;
    Box::pin(
        stream
            .map(|item| {
                let RunChunk { offset, payload } = item?;
                serde_json::from_value(payload)
                    .map(|chunk| ChatChunk { offset, chunk })
                    .map_err(|e| {
                        warn!(offset, error = %e, "undecodable chunk in run");
                        StreamError::Decode {
                            offset,
                            message: e.to_string(),
                        }
                    })
            })
            .take_while(move |item| {
                let keep = !failed;
                failed = failed || item.is_err();
                futures::future::ready(keep)
            }),
    )
}

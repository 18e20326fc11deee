//! Workflow trait definition

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::ChunkWriter;
use crate::persistence::LedgerError;

/// Error type for workflow failures
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Input could not be decoded into what the workflow expects
    #[error("invalid workflow input: {0}")]
    InvalidInput(String),

    /// The computation itself failed
    #[error("workflow failed: {0}")]
    Failed(String),

    /// Writing output to the ledger failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The workflow cannot continue a run from its recorded output
    #[error("workflow cannot resume an interrupted run")]
    NotResumable,
}

impl WorkflowError {
    /// Create a failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A long-running computation whose output is recorded as chunks
///
/// Implementations are registered once with the
/// [`WorkflowRunner`](crate::WorkflowRunner) and shared across all runs, so any
/// per-run state lives inside `run`.
///
/// # Example
///
/// ```ignore
/// use chatrun_durable::prelude::*;
///
/// struct Countdown;
///
/// #[async_trait]
/// impl Workflow for Countdown {
///     fn workflow_type(&self) -> &'static str {
///         "countdown"
///     }
///
///     async fn run(&self, input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
///         let from = input["from"].as_i64().unwrap_or(3);
///         for n in (0..=from).rev() {
///             writer.write(json!({ "n": n })).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier, recorded with each run
    fn workflow_type(&self) -> &'static str;

    /// Execute the computation, writing every output chunk through `writer`
    ///
    /// Returning `Ok` closes the run as completed; returning `Err` closes it as
    /// failed after appending [`failure_chunk`](Self::failure_chunk), if any.
    async fn run(&self, input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError>;

    /// Continue a run whose owner stopped heartbeating
    ///
    /// `recorded` holds every chunk already in the ledger (offsets
    /// `0..recorded.len()`), and `writer` appends right after them. The
    /// implementation rebuilds whatever state it needs from `recorded` and
    /// writes the remainder of the output. The default refuses, which makes
    /// the runner close the run with [`failure_chunk`](Self::failure_chunk).
    async fn resume(
        &self,
        input: Value,
        recorded: Vec<Value>,
        writer: &mut ChunkWriter,
    ) -> Result<(), WorkflowError> {
        let _ = (input, recorded, writer);
        Err(WorkflowError::NotResumable)
    }

    /// Terminal chunk appended when the run ends abnormally
    ///
    /// Used when `run` or `resume` returns an error, and when an interrupted
    /// run cannot be resumed, so readers always see a final chunk.
    fn failure_chunk(&self, message: &str) -> Option<Value> {
        let _ = message;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let error = WorkflowError::failed("something went wrong");
        assert_eq!(error.to_string(), "workflow failed: something went wrong");
    }

    #[test]
    fn test_workflow_error_from_ledger() {
        let id = uuid::Uuid::now_v7();
        let error: WorkflowError = LedgerError::RunClosed(id).into();
        assert!(matches!(error, WorkflowError::Ledger(LedgerError::RunClosed(_))));
    }
}

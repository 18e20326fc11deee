//! # Durable Run Ledger
//!
//! Storage and execution for resumable agent runs. A run is started once, its
//! output is appended to a ledger as an ordered sequence of chunks, and any number
//! of successive readers can attach to it later (from this process or another one
//! sharing the same ledger) and receive the chunks they have not seen yet.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │  (spawns runs detached from requests, heartbeats, reclaims) │
//! └─────────────────────────────────────────────────────────────┘
//!              │ ChunkWriter                 ▲ ChunkStream (attach/tail)
//!              ▼                             │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RunLedger                             │
//! │  (memory or PostgreSQL: chat_runs, chat_run_chunks)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chatrun_durable::prelude::*;
//!
//! let ledger = Arc::new(InMemoryRunLedger::new());
//! let runner = WorkflowRunner::new(ledger, RunnerConfig::default());
//! runner.register(Arc::new(MyWorkflow));
//!
//! let (run_id, stream) = runner.start(MyWorkflow::TYPE, json!({})).await?;
//! // ... connection drops ...
//! let stream = runner.attach(run_id, 2).await?; // resumes at offset 2
//! ```

pub mod engine;
pub mod persistence;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{ChunkStream, ChunkWriter, RunChunk, RunnerConfig, RunnerError, WorkflowRunner};
    pub use crate::persistence::{
        InMemoryRunLedger, LedgerError, PostgresRunLedger, RunInfo, RunLedger, RunStatus,
    };
    pub use crate::workflow::{Workflow, WorkflowError};
}

/// Identifier of a single run, assigned at start time (UUID v7)
pub type RunId = uuid::Uuid;

// Re-export key types at crate root
pub use engine::{ChunkStream, ChunkWriter, RunChunk, RunnerConfig, RunnerError, WorkflowRunner};
pub use persistence::{
    InMemoryRunLedger, LedgerError, PostgresRunLedger, RunInfo, RunLedger, RunStatus,
};
pub use workflow::{Workflow, WorkflowError};

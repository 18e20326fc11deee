//! RunLedger trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Run not found (never created, or already purged)
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Concurrency conflict (optimistic append failed)
    #[error("concurrency conflict: expected offset {expected}, got {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    /// Append attempted after the run was closed
    #[error("run {0} is already closed")]
    RunClosed(Uuid),

    /// Append attempted by a worker that no longer owns the run
    #[error("run {run_id} is owned by {owner}")]
    NotOwner { run_id: Uuid, owner: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Computation is producing chunks
    Running,

    /// Computation finished and wrote its last chunk
    Completed,

    /// Computation failed, or its owner went away and the run was reclaimed
    Failed,
}

impl RunStatus {
    /// Whether no more chunks will ever be appended
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::Serialization(format!(
                "unknown run status: {}",
                other
            ))),
        }
    }
}

/// Run information stored in the ledger
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub id: Uuid,
    pub workflow_type: String,
    pub status: RunStatus,
    pub input: serde_json::Value,
    pub error: Option<String>,
    /// Worker that executes (or executed) the run
    pub owner: String,
    /// Number of chunks appended so far; the next chunk gets this offset
    pub chunk_count: i64,
    pub heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable, append-only record of the chunks produced by runs
///
/// Offsets are zero-based and dense within a run. Implementations must be
/// thread-safe; a single writer per run is enforced through `expected_offset`.
#[async_trait]
pub trait RunLedger: Send + Sync + 'static {
    // =========================================================================
    // Run Operations
    // =========================================================================

    /// Create a new run in `running` state
    async fn create_run(
        &self,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        owner: &str,
    ) -> Result<(), LedgerError>;

    /// Get run info
    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, LedgerError>;

    /// Close a run with a final status. Closing an already closed run is a no-op.
    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), LedgerError>;

    // =========================================================================
    // Chunk Operations
    // =========================================================================

    /// Append chunks at `expected_offset` (with optimistic concurrency)
    ///
    /// Only the run's current `owner` may append; a worker whose run was
    /// claimed by another gets [`LedgerError::NotOwner`].
    /// Returns the new chunk count after appending.
    async fn append_chunks(
        &self,
        run_id: Uuid,
        owner: &str,
        expected_offset: i64,
        chunks: Vec<serde_json::Value>,
    ) -> Result<i64, LedgerError>;

    /// Load up to `limit` chunks starting at `from_offset`, in offset order
    async fn load_chunks(
        &self,
        run_id: Uuid,
        from_offset: i64,
        limit: usize,
    ) -> Result<Vec<(i64, serde_json::Value)>, LedgerError>;

    // =========================================================================
    // Ownership / Reclamation
    // =========================================================================

    /// Record that `owner` is still executing the run
    async fn heartbeat(&self, run_id: Uuid, owner: &str) -> Result<(), LedgerError>;

    /// Find running runs with no heartbeat within `stale_threshold`
    async fn find_stale_runs(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, LedgerError>;

    /// Take over a stale run
    ///
    /// Atomically makes `new_owner` the owner and refreshes the heartbeat, but
    /// only if the run is still running and has not heartbeated within
    /// `stale_threshold`. Returns the run as claimed, or `None` when another
    /// worker got there first or the owner came back.
    async fn claim_run(
        &self,
        run_id: Uuid,
        new_owner: &str,
        stale_threshold: Duration,
    ) -> Result<Option<RunInfo>, LedgerError>;

    /// Delete closed runs (and their chunks) last updated before `cutoff`
    ///
    /// Returns the number of runs deleted.
    async fn purge_closed_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trip_strings() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_status_closed() {
        assert!(!RunStatus::Running.is_closed());
        assert!(RunStatus::Completed.is_closed());
        assert!(RunStatus::Failed.is_closed());
    }
}

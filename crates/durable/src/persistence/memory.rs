//! In-memory implementation of RunLedger for dev mode and testing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// Internal run state
struct RunState {
    workflow_type: String,
    status: RunStatus,
    input: serde_json::Value,
    error: Option<String>,
    owner: String,
    chunks: Vec<serde_json::Value>,
    heartbeat_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RunState {
    fn info(&self, id: Uuid) -> RunInfo {
        RunInfo {
            id,
            workflow_type: self.workflow_type.clone(),
            status: self.status,
            input: self.input.clone(),
            error: self.error.clone(),
            owner: self.owner.clone(),
            chunk_count: self.chunks.len() as i64,
            heartbeat_at: self.heartbeat_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// In-memory implementation of RunLedger
///
/// Provides the same semantics as the PostgreSQL implementation, but all
/// data lives in this process and is lost on restart. Runs can only be
/// attached from the process that started them.
///
/// # Example
///
/// ```
/// use chatrun_durable::InMemoryRunLedger;
///
/// let ledger = InMemoryRunLedger::new();
/// assert_eq!(ledger.run_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryRunLedger {
    runs: RwLock<HashMap<Uuid, RunState>>,
}

impl InMemoryRunLedger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Move a run's last heartbeat into the past (for testing reclamation)
    pub fn backdate_heartbeat(&self, run_id: Uuid, by: Duration) {
        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.heartbeat_at -= chrono::Duration::from_std(by).unwrap_or_default();
        }
    }

    /// Move a run's last update into the past (for testing retention)
    pub fn backdate_updated_at(&self, run_id: Uuid, by: Duration) {
        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.updated_at -= chrono::Duration::from_std(by).unwrap_or_default();
        }
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.runs.write().clear();
    }
}

#[async_trait]
impl RunLedger for InMemoryRunLedger {
    async fn create_run(
        &self,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        owner: &str,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        self.runs.write().insert(
            run_id,
            RunState {
                workflow_type: workflow_type.to_string(),
                status: RunStatus::Running,
                input,
                error: None,
                owner: owner.to_string(),
                chunks: vec![],
                heartbeat_at: now,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, LedgerError> {
        let runs = self.runs.read();
        runs.get(&run_id)
            .map(|run| run.info(run_id))
            .ok_or(LedgerError::RunNotFound(run_id))
    }

    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or(LedgerError::RunNotFound(run_id))?;

        if run.status.is_closed() {
            return Ok(());
        }

        run.status = status;
        run.error = error;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn append_chunks(
        &self,
        run_id: Uuid,
        owner: &str,
        expected_offset: i64,
        chunks: Vec<serde_json::Value>,
    ) -> Result<i64, LedgerError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or(LedgerError::RunNotFound(run_id))?;

        if run.status.is_closed() {
            return Err(LedgerError::RunClosed(run_id));
        }
        if run.owner != owner {
            return Err(LedgerError::NotOwner {
                run_id,
                owner: run.owner.clone(),
            });
        }

        let current = run.chunks.len() as i64;
        if current != expected_offset {
            return Err(LedgerError::ConcurrencyConflict {
                expected: expected_offset,
                actual: current,
            });
        }

        run.chunks.extend(chunks);
        run.updated_at = Utc::now();
        Ok(run.chunks.len() as i64)
    }

    async fn load_chunks(
        &self,
        run_id: Uuid,
        from_offset: i64,
        limit: usize,
    ) -> Result<Vec<(i64, serde_json::Value)>, LedgerError> {
        let runs = self.runs.read();
        let run = runs.get(&run_id).ok_or(LedgerError::RunNotFound(run_id))?;

        let start = from_offset.max(0) as usize;
        Ok(run
            .chunks
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, chunk)| (i as i64, chunk.clone()))
            .collect())
    }

    async fn heartbeat(&self, run_id: Uuid, owner: &str) -> Result<(), LedgerError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or(LedgerError::RunNotFound(run_id))?;

        if run.owner == owner && !run.status.is_closed() {
            run.heartbeat_at = Utc::now();
        }
        Ok(())
    }

    async fn find_stale_runs(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, LedgerError> {
        let threshold = chrono::Duration::from_std(stale_threshold)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        Ok(self
            .runs
            .read()
            .iter()
            .filter(|(_, run)| run.status == RunStatus::Running && run.heartbeat_at < cutoff)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn claim_run(
        &self,
        run_id: Uuid,
        new_owner: &str,
        stale_threshold: Duration,
    ) -> Result<Option<RunInfo>, LedgerError> {
        let threshold = chrono::Duration::from_std(stale_threshold)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let now = Utc::now();

        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or(LedgerError::RunNotFound(run_id))?;

        if run.status != RunStatus::Running || run.heartbeat_at >= now - threshold {
            return Ok(None);
        }
        run.owner = new_owner.to_string();
        run.heartbeat_at = now;
        run.updated_at = now;
        Ok(Some(run.info(run_id)))
    }

    async fn purge_closed_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut runs = self.runs.write();
        let before = runs.len();
        runs.retain(|_, run| !(run.status.is_closed() && run.updated_at < cutoff));
        Ok((before - runs.len()) as u64)
    }
}

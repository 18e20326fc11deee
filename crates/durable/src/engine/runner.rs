//! Workflow runner: start runs detached from callers, attach readers to them
//!
//! A run survives the connection that started it. Its task keeps writing to
//! the ledger after every reader has gone, and heartbeats while it does so.
//! When the heartbeat stops (process crash), another runner sharing the ledger
//! claims the run in `reclaim_stale_runs` and resumes it from its recorded
//! chunks, so readers attached anywhere still receive the rest of the output.
//! Runs whose workflow cannot resume are closed with a failure chunk instead,
//! so that readers are never left waiting forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::registry::WorkflowRegistry;
use super::stream::{tail, ChunkStream, TailOptions};
use super::writer::ChunkWriter;
use crate::persistence::{LedgerError, RunLedger, RunStatus};
use crate::workflow::{Workflow, WorkflowError};
use crate::RunId;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the workflow runner
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Seconds between heartbeats of a running run (RUN_HEARTBEAT_SECS)
    pub heartbeat_secs: Option<u64>,
    /// Seconds without heartbeat before a run is reclaimed (RUN_STALE_SECS)
    pub stale_secs: Option<u64>,
    /// Seconds a closed run is kept before purge (RUN_RETENTION_SECS)
    pub retention_secs: Option<u64>,
    /// Maximum chunks loaded per ledger read
    pub batch_size: Option<usize>,
    /// Poll backoff bounds for readers, in milliseconds
    pub min_poll_ms: Option<u64>,
    pub max_poll_ms: Option<u64>,
}

impl RunnerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        Self {
            heartbeat_secs: env_parse("RUN_HEARTBEAT_SECS"),
            stale_secs: env_parse("RUN_STALE_SECS"),
            retention_secs: env_parse("RUN_RETENTION_SECS"),
            batch_size: None,
            min_poll_ms: None,
            max_poll_ms: None,
        }
    }

    /// Heartbeat interval with default (5s)
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.unwrap_or(5).max(1))
    }

    /// Stale threshold with default (30s)
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_secs.unwrap_or(30))
    }

    /// Retention of closed runs with default (24h)
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs.unwrap_or(86_400))
    }

    fn tail_options(&self) -> TailOptions {
        let min_backoff = Duration::from_millis(self.min_poll_ms.unwrap_or(100));
        TailOptions {
            batch_size: self.batch_size.unwrap_or(256).max(1),
            min_backoff,
            max_backoff: Duration::from_millis(self.max_poll_ms.unwrap_or(2_000)).max(min_backoff),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from runner operations
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// No run with this id exists in the ledger
    #[error("run not found: {0}")]
    NotFound(Uuid),

    /// No workflow registered under this type
    #[error("unknown workflow type: {0}")]
    UnknownWorkflow(String),

    /// Ledger failure
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for RunnerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::RunNotFound(id) => Self::NotFound(id),
            other => Self::Ledger(other),
        }
    }
}

// =============================================================================
// WorkflowRunner
// =============================================================================

struct RunnerInner {
    ledger: Arc<dyn RunLedger>,
    registry: RwLock<WorkflowRegistry>,
    /// Progress channels of runs executing in this process
    live: DashMap<RunId, watch::Sender<i64>>,
    config: RunnerConfig,
    worker_id: String,
}

/// Starts runs and attaches readers to them
///
/// Cheap to clone; all clones share the same registry and live-run table.
///
/// # Example
///
/// ```ignore
/// let runner = WorkflowRunner::new(Arc::new(InMemoryRunLedger::new()), RunnerConfig::default());
/// runner.register(Arc::new(ChatWorkflow::new(model, tools)));
///
/// let (run_id, stream) = runner.start("chat", input).await?;
/// ```
#[derive(Clone)]
pub struct WorkflowRunner {
    inner: Arc<RunnerInner>,
}

impl WorkflowRunner {
    /// Create a runner over a ledger with a random worker id
    pub fn new(ledger: Arc<dyn RunLedger>, config: RunnerConfig) -> Self {
        let worker_id = format!("runner-{}", Uuid::now_v7().simple());
        Self::with_worker_id(ledger, config, worker_id)
    }

    /// Create a runner with an explicit worker id (recorded as run owner)
    pub fn with_worker_id(
        ledger: Arc<dyn RunLedger>,
        config: RunnerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                ledger,
                registry: RwLock::new(WorkflowRegistry::new()),
                live: DashMap::new(),
                config,
                worker_id: worker_id.into(),
            }),
        }
    }

    /// Register a workflow type
    pub fn register(&self, workflow: Arc<dyn Workflow>) {
        info!(workflow_type = workflow.workflow_type(), "registered workflow type");
        self.inner.registry.write().register(workflow);
    }

    /// The ledger this runner writes to
    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.inner.ledger
    }

    /// Owner id recorded on runs started here
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Runner configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Number of runs currently executing in this process
    pub fn active_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Start a new run and return its id with a reader from offset 0
    ///
    /// The computation runs on its own task; dropping the returned stream does
    /// not stop it.
    pub async fn start(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<(RunId, ChunkStream), RunnerError> {
        let workflow = self
            .inner
            .registry
            .read()
            .get(workflow_type)
            .ok_or_else(|| RunnerError::UnknownWorkflow(workflow_type.to_string()))?;

        let run_id = Uuid::now_v7();
        self.inner
            .ledger
            .create_run(run_id, workflow_type, input.clone(), &self.inner.worker_id)
            .await?;

        let progress_rx = self.spawn_run(run_id, workflow, input, Execution::Fresh, 0);
        info!(%run_id, workflow_type, "started run");

        let stream = tail(
            self.inner.ledger.clone(),
            run_id,
            0,
            Some(progress_rx),
            self.inner.config.tail_options(),
        );
        Ok((run_id, stream))
    }

    /// Register a run as live here and execute it on its own task
    fn spawn_run(
        &self,
        run_id: RunId,
        workflow: Arc<dyn Workflow>,
        input: Value,
        execution: Execution,
        next_offset: i64,
    ) -> watch::Receiver<i64> {
        let (progress_tx, progress_rx) = watch::channel(next_offset);
        self.inner.live.insert(run_id, progress_tx.clone());

        let span = tracing::info_span!(
            "workflow_run",
            %run_id,
            workflow_type = workflow.workflow_type(),
            resumed = matches!(execution, Execution::Resume(_))
        );
        let writer = ChunkWriter::new(
            run_id,
            self.inner.ledger.clone(),
            self.inner.worker_id.clone(),
            next_offset,
            progress_tx,
        );
        tokio::spawn(execute(self.inner.clone(), workflow, input, execution, writer).instrument(span));
        progress_rx
    }

    /// Attach a reader to an existing run, starting at `from_offset`
    ///
    /// Works for runs still executing (here or in another process sharing the
    /// ledger) and for closed runs, which are replayed and then end.
    pub async fn attach(&self, run_id: RunId, from_offset: i64) -> Result<ChunkStream, RunnerError> {
        let info = self.inner.ledger.get_run(run_id).await?;
        let progress = self.inner.live.get(&run_id).map(|tx| tx.subscribe());

        debug!(
            %run_id,
            from_offset,
            status = %info.status,
            chunk_count = info.chunk_count,
            local = progress.is_some(),
            "attaching reader"
        );

        Ok(tail(
            self.inner.ledger.clone(),
            run_id,
            from_offset,
            progress,
            self.inner.config.tail_options(),
        ))
    }

    /// Take over runs whose owner stopped heartbeating
    ///
    /// Each stale run is claimed atomically in the ledger, so when several
    /// runners sweep at once only one of them gets it. A claimed run whose
    /// workflow is registered here is resumed on this runner from its recorded
    /// chunks; any other claimed run is closed as failed. Returns how many runs
    /// were taken over.
    pub async fn reclaim_stale_runs(&self) -> Result<usize, RunnerError> {
        let threshold = self.inner.config.stale_threshold();
        let stale = self.inner.ledger.find_stale_runs(threshold).await?;

        let mut reclaimed = 0;
        for run_id in stale {
            if self.inner.live.contains_key(&run_id) {
                // Still executing here; heartbeat is just late
                continue;
            }
            let claimed = match self
                .inner
                .ledger
                .claim_run(run_id, &self.inner.worker_id, threshold)
                .await
            {
                Ok(Some(info)) => info,
                Ok(None) | Err(LedgerError::RunNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let workflow = self.inner.registry.read().get(&claimed.workflow_type);
            match workflow {
                Some(workflow) => {
                    let recorded = load_recorded(&self.inner, run_id, claimed.chunk_count).await?;
                    warn!(
                        %run_id,
                        workflow_type = %claimed.workflow_type,
                        recorded = recorded.len(),
                        "resuming stale run"
                    );
                    self.spawn_run(
                        run_id,
                        workflow,
                        claimed.input,
                        Execution::Resume(recorded),
                        claimed.chunk_count,
                    );
                }
                None => {
                    let reason = format!(
                        "run interrupted: no workflow registered for type {}",
                        claimed.workflow_type
                    );
                    fail_run(&self.inner, run_id, None, &reason).await?;
                    warn!(%run_id, workflow_type = %claimed.workflow_type, "closed stale run that cannot resume");
                }
            }
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// Delete closed runs older than the configured retention
    pub async fn purge_expired_runs(&self) -> Result<u64, RunnerError> {
        let retention = chrono::Duration::from_std(self.inner.config.retention())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let purged = self
            .inner
            .ledger
            .purge_closed_runs(Utc::now() - retention)
            .await?;
        if purged > 0 {
            info!(purged, "purged expired runs");
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("worker_id", &self.inner.worker_id)
            .field("active", &self.inner.live.len())
            .finish()
    }
}

/// How a run's task drives its workflow
enum Execution {
    /// First execution, from offset 0
    Fresh,
    /// Continuation after the previous owner died; holds its recorded chunks
    Resume(Vec<Value>),
}

/// Load every chunk recorded for a run before it was claimed
async fn load_recorded(
    inner: &RunnerInner,
    run_id: RunId,
    chunk_count: i64,
) -> Result<Vec<Value>, LedgerError> {
    let batch = inner.config.tail_options().batch_size;
    let mut recorded = Vec::with_capacity(chunk_count.max(0) as usize);
    while (recorded.len() as i64) < chunk_count {
        let chunks = inner
            .ledger
            .load_chunks(run_id, recorded.len() as i64, batch)
            .await?;
        if chunks.is_empty() {
            break;
        }
        recorded.extend(chunks.into_iter().map(|(_, chunk)| chunk));
    }
    Ok(recorded)
}

/// Body of a run's task
async fn execute(
    inner: Arc<RunnerInner>,
    workflow: Arc<dyn Workflow>,
    input: Value,
    execution: Execution,
    mut writer: ChunkWriter,
) {
    let run_id = writer.run_id();
    let heartbeat = tokio::spawn({
        let ledger = inner.ledger.clone();
        let owner = inner.worker_id.clone();
        let period = inner.config.heartbeat_interval();
        async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = ledger.heartbeat(run_id, &owner).await {
                    warn!(%run_id, error = %e, "heartbeat failed");
                }
            }
        }
    });

    // Run on a nested task so a panic in the workflow still closes the run
    let outcome = tokio::spawn({
        let workflow = workflow.clone();
        async move {
            match execution {
                Execution::Fresh => workflow.run(input, &mut writer).await,
                Execution::Resume(recorded) => workflow.resume(input, recorded, &mut writer).await,
            }
        }
        .in_current_span()
    })
    .await;

    heartbeat.abort();

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(WorkflowError::Ledger(LedgerError::NotOwner { owner, .. }))) => {
            // Another runner claimed the run and carries it on
            warn!(%run_id, new_owner = %owner, "lost ownership of run; stopping");
            inner.live.remove(&run_id);
            return;
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(join_error) => Some(format!("workflow task aborted: {}", join_error)),
    };

    match failure {
        None => match close_owned(&inner, run_id).await {
            Ok(true) => info!(%run_id, "run completed"),
            Ok(false) => debug!(%run_id, "run no longer ours; not closing"),
            Err(e) => error!(%run_id, error = %e, "failed to close completed run"),
        },
        Some(message) => {
            warn!(%run_id, error = %message, "run failed");
            if let Err(e) = fail_run(&inner, run_id, Some(workflow.as_ref()), &message).await {
                error!(%run_id, error = %e, "failed to close failed run");
            }
        }
    }

    if let Some((_, tx)) = inner.live.remove(&run_id) {
        // Final nudge for readers waiting on this process
        tx.send_modify(|_| {});
    }
}

/// Close a run as completed if this runner still owns it
async fn close_owned(inner: &RunnerInner, run_id: RunId) -> Result<bool, LedgerError> {
    let info = inner.ledger.get_run(run_id).await?;
    if info.status.is_closed() || info.owner != inner.worker_id {
        return Ok(false);
    }
    inner
        .ledger
        .close_run(run_id, RunStatus::Completed, None)
        .await?;
    Ok(true)
}

/// Append the workflow's failure chunk (if any) and close the run as failed
///
/// Returns false if the run was already closed or now belongs to another runner.
async fn fail_run(
    inner: &RunnerInner,
    run_id: RunId,
    workflow: Option<&dyn Workflow>,
    reason: &str,
) -> Result<bool, LedgerError> {
    let info = inner.ledger.get_run(run_id).await?;
    if info.status.is_closed() || info.owner != inner.worker_id {
        return Ok(false);
    }

    if let Some(chunk) = workflow.and_then(|w| w.failure_chunk(reason)) {
        match inner
            .ledger
            .append_chunks(run_id, &inner.worker_id, info.chunk_count, vec![chunk])
            .await
        {
            Ok(next) => {
                if let Some(tx) = inner.live.get(&run_id) {
                    tx.send_replace(next);
                }
            }
            Err(LedgerError::NotOwner { .. }) => return Ok(false),
            Err(LedgerError::ConcurrencyConflict { .. }) | Err(LedgerError::RunClosed(_)) => {
                debug!(%run_id, "run changed while failing it; skipping failure chunk");
            }
            Err(e) => return Err(e),
        }
    }

    inner
        .ledger
        .close_run(run_id, RunStatus::Failed, Some(reason.to_string()))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.stale_threshold(), Duration::from_secs(30));
        assert_eq!(config.retention(), Duration::from_secs(86_400));

        let tail = config.tail_options();
        assert_eq!(tail.batch_size, 256);
        assert_eq!(tail.min_backoff, Duration::from_millis(100));
        assert_eq!(tail.max_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_heartbeat_interval_never_zero() {
        let config = RunnerConfig {
            heartbeat_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_ledger_not_found_maps_to_runner_not_found() {
        let id = Uuid::now_v7();
        let error: RunnerError = LedgerError::RunNotFound(id).into();
        assert!(matches!(error, RunnerError::NotFound(found) if found == id));

        let error: RunnerError = LedgerError::Database("down".into()).into();
        assert!(matches!(error, RunnerError::Ledger(LedgerError::Database(_))));
    }
}

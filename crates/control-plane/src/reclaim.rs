// Run reclamation loop
// Decision: Each replica sweeps independently; a run is only taken over through an
//           atomic claim on a stale heartbeat, so a live run stays with its owner
//           and a dead owner's run goes to exactly one peer, which resumes it
// Decision: Sweep failures are logged and retried on the next tick

use std::time::Duration;

use chatrun_durable::{RunnerError, WorkflowRunner};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Result of a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Runs whose owner stopped heartbeating, taken over by this replica
    pub reclaimed: usize,
    /// Closed runs deleted after their retention window
    pub purged: u64,
}

/// Reclaim stale runs, then purge expired ones
pub async fn run_sweep_once(runner: &WorkflowRunner) -> Result<SweepReport, RunnerError> {
    let reclaimed = runner.reclaim_stale_runs().await?;
    let purged = runner.purge_expired_runs().await?;
    Ok(SweepReport { reclaimed, purged })
}

/// Sweep on a fixed interval until the task is aborted
pub fn spawn_reclaim_loop(runner: WorkflowRunner, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            worker_id = %runner.worker_id(),
            interval_secs = interval.as_secs(),
            "run reclamation loop started"
        );

        loop {
            ticker.tick().await;
            match run_sweep_once(&runner).await {
                Ok(report) if report.reclaimed > 0 || report.purged > 0 => {
                    tracing::info!(
                        reclaimed = report.reclaimed,
                        purged = report.purged,
                        "run sweep finished"
                    );
                }
                Ok(_) => tracing::trace!("run sweep found nothing to do"),
                Err(e) => tracing::error!(error = %e, "run sweep failed"),
            }
        }
    })
}

//! Integration tests for WorkflowRunner over the in-memory ledger
//!
//! Run with: cargo test -p chatrun-durable --test runner_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Notify;

use chatrun_durable::prelude::*;

/// Writes `count` chunks, pausing between each
///
/// Resumable: a continued run picks up at the number of chunks recorded.
/// With `stall_after` set, it hangs once that many chunks are written, which
/// stands in for a process that stops making progress.
struct Counter {
    delay: Duration,
    stall_after: Option<usize>,
}

impl Counter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            stall_after: None,
        }
    }

    async fn count_from(
        &self,
        start: usize,
        input: &Value,
        writer: &mut ChunkWriter,
    ) -> Result<(), WorkflowError> {
        let count = input["count"]
            .as_i64()
            .ok_or_else(|| WorkflowError::InvalidInput("count".into()))?;
        for n in start as i64..count {
            if self.stall_after == Some(n as usize) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.delay).await;
            writer.write(json!({ "n": n })).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Workflow for Counter {
    fn workflow_type(&self) -> &'static str {
        "counter"
    }

    async fn run(&self, input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        self.count_from(0, &input, writer).await
    }

    async fn resume(
        &self,
        input: Value,
        recorded: Vec<Value>,
        writer: &mut ChunkWriter,
    ) -> Result<(), WorkflowError> {
        self.count_from(recorded.len(), &input, writer).await
    }

    fn failure_chunk(&self, message: &str) -> Option<Value> {
        Some(json!({ "failed": message }))
    }
}

/// Writes one chunk, then fails
struct Flaky;

#[async_trait]
impl Workflow for Flaky {
    fn workflow_type(&self) -> &'static str {
        "flaky"
    }

    async fn run(&self, _input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        writer.write(json!({ "n": 0 })).await?;
        Err(WorkflowError::failed("model unavailable"))
    }

    fn failure_chunk(&self, _message: &str) -> Option<Value> {
        Some(json!({ "type": "error" }))
    }
}

/// Blocks until released; counts how often it ran
struct Gate {
    release: Arc<Notify>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Workflow for Gate {
    fn workflow_type(&self) -> &'static str {
        "gate"
    }

    async fn run(&self, _input: Value, writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        writer.write(json!("before")).await?;
        self.release.notified().await;
        writer.write(json!("after")).await?;
        Ok(())
    }
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        min_poll_ms: Some(5),
        max_poll_ms: Some(20),
        ..Default::default()
    }
}

fn runner_with(ledger: Arc<InMemoryRunLedger>) -> WorkflowRunner {
    let runner = WorkflowRunner::new(ledger, fast_config());
    runner.register(Arc::new(Counter::new(Duration::from_millis(2))));
    runner.register(Arc::new(Flaky));
    runner
}

async fn collect(stream: ChunkStream) -> Vec<RunChunk> {
    stream.map(|c| c.unwrap()).collect().await
}

#[test_log::test(tokio::test)]
async fn test_start_streams_all_chunks_then_ends() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger.clone());

    let (run_id, stream) = runner.start("counter", json!({ "count": 4 })).await.unwrap();
    let chunks = collect(stream).await;

    let offsets: Vec<i64> = chunks.iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3]);
    assert_eq!(chunks[3].payload, json!({ "n": 3 }));

    // Close happens right after the last chunk; give the task a moment
    tokio::time::sleep(Duration::from_millis(20)).await;
    let info = ledger.get_run(run_id).await.unwrap();
    assert_eq!(info.status, RunStatus::Completed);
    assert_eq!(info.chunk_count, 4);
    assert_eq!(runner.active_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_run_continues_after_reader_drops() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger.clone());

    let (run_id, mut stream) = runner.start("counter", json!({ "count": 6 })).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.offset, 0);
    drop(stream);

    // Reconnect having seen offset 0: resume at 1
    let rest = collect(runner.attach(run_id, 1).await.unwrap()).await;
    let offsets: Vec<i64> = rest.iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![1, 2, 3, 4, 5]);
}

#[test_log::test(tokio::test)]
async fn test_attach_from_other_runner_sharing_ledger() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let owner = runner_with(ledger.clone());
    let other = runner_with(ledger.clone());

    let (run_id, _stream) = owner.start("counter", json!({ "count": 5 })).await.unwrap();

    // No live channel here, so this reader polls
    let chunks = collect(other.attach(run_id, 0).await.unwrap()).await;
    assert_eq!(chunks.len(), 5);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_readers_see_same_sequence() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger);

    let (run_id, stream) = runner.start("counter", json!({ "count": 5 })).await.unwrap();
    let second = runner.attach(run_id, 0).await.unwrap();

    let (a, b) = tokio::join!(collect(stream), collect(second));
    assert_eq!(a, b);
    assert_eq!(a.len(), 5);
}

#[test_log::test(tokio::test)]
async fn test_attach_closed_run_replays() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger);

    let (run_id, stream) = runner.start("counter", json!({ "count": 3 })).await.unwrap();
    collect(stream).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let replay = collect(runner.attach(run_id, 0).await.unwrap()).await;
    assert_eq!(replay.len(), 3);

    let tail = collect(runner.attach(run_id, 2).await.unwrap()).await;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].offset, 2);

    let nothing = collect(runner.attach(run_id, 3).await.unwrap()).await;
    assert!(nothing.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_failed_run_appends_failure_chunk() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger.clone());

    let (run_id, stream) = runner.start("flaky", json!({})).await.unwrap();
    let chunks = collect(stream).await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].payload, json!({ "type": "error" }));

    let info = ledger.get_run(run_id).await.unwrap();
    assert_eq!(info.status, RunStatus::Failed);
    assert!(info.error.unwrap().contains("model unavailable"));
}

#[test_log::test(tokio::test)]
async fn test_invalid_input_fails_run() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = runner_with(ledger.clone());

    let (run_id, stream) = runner.start("counter", json!({})).await.unwrap();
    let chunks = collect(stream).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].payload["failed"]
        .as_str()
        .unwrap()
        .contains("invalid workflow input"));
    assert_eq!(
        ledger.get_run(run_id).await.unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn test_unknown_workflow_and_unknown_run() {
    let runner = runner_with(Arc::new(InMemoryRunLedger::new()));

    let result = runner.start("nope", json!({})).await;
    assert!(matches!(result, Err(RunnerError::UnknownWorkflow(t)) if t == "nope"));

    let missing = uuid::Uuid::now_v7();
    let result = runner.attach(missing, 0).await;
    assert!(matches!(result, Err(RunnerError::NotFound(id)) if id == missing));
}

#[test_log::test]
fn test_reclaimed_run_resumes_in_another_runner() {
    let ledger = Arc::new(InMemoryRunLedger::new());

    // Process A starts the run and stops making progress after two chunks
    let runtime_a = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let runner_a = WorkflowRunner::with_worker_id(ledger.clone(), fast_config(), "worker-a");
    runner_a.register(Arc::new(Counter {
        delay: Duration::from_millis(2),
        stall_after: Some(2),
    }));
    let run_id = runtime_a.block_on(async {
        let (run_id, stream) = runner_a.start("counter", json!({ "count": 5 })).await.unwrap();
        let seen: Vec<RunChunk> = stream.take(2).map(|c| c.unwrap()).collect().await;
        assert_eq!(seen[1].payload, json!({ "n": 1 }));
        run_id
    });

    // ...and then dies
    runtime_a.shutdown_timeout(Duration::from_secs(1));
    drop(runner_a);
    ledger.backdate_heartbeat(run_id, Duration::from_secs(300));

    // Process B shares the ledger and takes the run over
    let runtime_b = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    runtime_b.block_on(async {
        let runner_b = WorkflowRunner::with_worker_id(ledger.clone(), fast_config(), "worker-b");
        runner_b.register(Arc::new(Counter::new(Duration::from_millis(2))));
        let runner_c = runner_with(ledger.clone());

        assert_eq!(runner_b.reclaim_stale_runs().await.unwrap(), 1);
        // The claim refreshed the heartbeat, so a second sweeper finds nothing
        assert_eq!(runner_c.reclaim_stale_runs().await.unwrap(), 0);

        // Client saw offsets 0 and 1 from A; reattaches through B
        let rest = collect(runner_b.attach(run_id, 2).await.unwrap()).await;
        let payloads: Vec<Value> = rest.iter().map(|c| c.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![json!({ "n": 2 }), json!({ "n": 3 }), json!({ "n": 4 })]
        );
        assert_eq!(rest[0].offset, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let info = ledger.get_run(run_id).await.unwrap();
        assert_eq!(info.status, RunStatus::Completed);
        assert_eq!(info.owner, "worker-b");
        assert_eq!(info.chunk_count, 5);

        // Full replay from the start is seamless across the two owners
        let all = collect(runner_c.attach(run_id, 0).await.unwrap()).await;
        let ns: Vec<i64> = all.iter().map(|c| c.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    });
}

#[test_log::test(tokio::test)]
async fn test_reclaim_fails_runs_that_cannot_resume() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let release = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));

    // The owner's process "dies": its run is left running in the ledger
    let run_id = uuid::Uuid::now_v7();
    ledger
        .create_run(run_id, "flaky", json!({}), "dead-worker")
        .await
        .unwrap();
    ledger
        .append_chunks(run_id, "dead-worker", 0, vec![json!({ "n": 0 })])
        .await
        .unwrap();
    ledger.backdate_heartbeat(run_id, Duration::from_secs(300));

    // No runner knows this type at all
    let orphan_id = uuid::Uuid::now_v7();
    ledger
        .create_run(orphan_id, "retired", json!({}), "dead-worker")
        .await
        .unwrap();
    ledger.backdate_heartbeat(orphan_id, Duration::from_secs(300));

    let survivor = runner_with(ledger.clone());
    survivor.register(Arc::new(Gate {
        release: release.clone(),
        runs: runs.clone(),
    }));

    // A healthy local run must not be reclaimed even with a late heartbeat
    let (local_id, _stream) = survivor.start("gate", json!({})).await.unwrap();
    ledger.backdate_heartbeat(local_id, Duration::from_secs(300));

    let reader = survivor.attach(run_id, 1).await.unwrap();

    let reclaimed = survivor.reclaim_stale_runs().await.unwrap();
    assert_eq!(reclaimed, 2);

    let chunks = collect(reader).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].offset, 1);
    assert_eq!(chunks[0].payload, json!({ "type": "error" }));

    let info = ledger.get_run(run_id).await.unwrap();
    assert_eq!(info.status, RunStatus::Failed);
    assert!(info.error.unwrap().contains("cannot resume"));

    let orphan = ledger.get_run(orphan_id).await.unwrap();
    assert_eq!(orphan.status, RunStatus::Failed);
    assert_eq!(orphan.chunk_count, 0);

    assert_eq!(
        ledger.get_run(local_id).await.unwrap().status,
        RunStatus::Running
    );

    // Idempotent
    assert_eq!(survivor.reclaim_stale_runs().await.unwrap(), 0);

    release.notify_one();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_fenced_owner_stops_without_closing_run() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let release = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let slow = WorkflowRunner::with_worker_id(ledger.clone(), fast_config(), "worker-slow");
    slow.register(Arc::new(Gate {
        release: release.clone(),
        runs: runs.clone(),
    }));
    let (run_id, mut stream) = slow.start("gate", json!({})).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().payload, json!("before"));

    // Someone else takes the run over while the gate is closed
    ledger.backdate_heartbeat(run_id, Duration::from_secs(300));
    ledger
        .claim_run(run_id, "worker-new", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    release.notify_one();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let info = ledger.get_run(run_id).await.unwrap();
    assert_eq!(info.status, RunStatus::Running);
    assert_eq!(info.owner, "worker-new");
    assert_eq!(info.chunk_count, 1);
    assert_eq!(slow.active_count(), 0);
}

#[tokio::test]
async fn test_purge_expired_runs() {
    let ledger = Arc::new(InMemoryRunLedger::new());
    let runner = WorkflowRunner::new(
        ledger.clone(),
        RunnerConfig {
            retention_secs: Some(60),
            ..fast_config()
        },
    );
    runner.register(Arc::new(Counter::new(Duration::ZERO)));

    let (old, stream) = runner.start("counter", json!({ "count": 1 })).await.unwrap();
    collect(stream).await;
    let (fresh, stream) = runner.start("counter", json!({ "count": 1 })).await.unwrap();
    collect(stream).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    ledger.backdate_updated_at(old, Duration::from_secs(120));

    assert_eq!(runner.purge_expired_runs().await.unwrap(), 1);
    assert!(matches!(
        runner.attach(old, 0).await,
        Err(RunnerError::NotFound(_))
    ));
    assert!(runner.attach(fresh, 0).await.is_ok());
}

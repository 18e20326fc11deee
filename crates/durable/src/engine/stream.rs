//! Replay-then-follow readers over a run's chunks

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::persistence::{LedgerError, RunLedger};
use crate::RunId;

/// One chunk of a run's output with its position in the run
#[derive(Debug, Clone, PartialEq)]
pub struct RunChunk {
    /// Zero-based, dense position within the run
    pub offset: i64,
    pub payload: Value,
}

/// Stream of a run's chunks, ending after the last chunk of a closed run
///
/// A ledger failure is yielded once as `Err` and ends the stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<RunChunk, LedgerError>> + Send>>;

/// Tuning for how readers wait for new chunks
#[derive(Debug, Clone, Copy)]
pub(crate) struct TailOptions {
    pub batch_size: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

struct TailState {
    next_offset: i64,
    backoff: Duration,
    progress: Option<watch::Receiver<i64>>,
    done: bool,
}

/// Build a reader that yields every chunk at or after `from_offset`
///
/// Chunks already in the ledger are delivered immediately. When caught up, the
/// reader waits for either a progress notification from a writer in this
/// process or a poll interval (exponential backoff), whichever comes first,
/// so runs written by other processes are followed too.
pub(crate) fn tail(
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    from_offset: i64,
    progress: Option<watch::Receiver<i64>>,
    options: TailOptions,
) -> ChunkStream {
    let initial = TailState {
        next_offset: from_offset.max(0),
        backoff: options.min_backoff,
        progress,
        done: false,
    };

    stream::unfold(initial, move |mut state| {
        let ledger = ledger.clone();
        async move {
            if state.done {
                return None;
            }

            loop {
                let chunks = match ledger
                    .load_chunks(run_id, state.next_offset, options.batch_size)
                    .await
                {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        warn!(%run_id, error = %e, "failed to load chunks");
                        state.done = true;
                        return Some((stream::iter(vec![Err(e)]), state));
                    }
                };

                if let Some((last, _)) = chunks.last() {
                    state.next_offset = last + 1;
                    state.backoff = options.min_backoff;
                    let items: Vec<_> = chunks
                        .into_iter()
                        .map(|(offset, payload)| Ok(RunChunk { offset, payload }))
                        .collect();
                    return Some((stream::iter(items), state));
                }

                let info = match ledger.get_run(run_id).await {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(%run_id, error = %e, "failed to read run status");
                        state.done = true;
                        return Some((stream::iter(vec![Err(e)]), state));
                    }
                };

                if info.status.is_closed() {
                    if state.next_offset >= info.chunk_count {
                        debug!(%run_id, next_offset = state.next_offset, "reader reached end of run");
                        return None;
                    }
                    // Chunks landed between the load and the status read
                    continue;
                }

                wait_for_progress(&mut state).await;
                state.backoff = (state.backoff * 2).min(options.max_backoff);
            }
        }
    })
    .flatten()
    .boxed()
}

async fn wait_for_progress(state: &mut TailState) {
    let backoff = state.backoff;
    match state.progress.as_mut() {
        Some(rx) => {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Writer is gone; fall back to polling
                        state.progress = None;
                    }
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        None => tokio::time::sleep(backoff).await,
    }
}

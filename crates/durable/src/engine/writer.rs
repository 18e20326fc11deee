//! Chunk writer handed to a running workflow

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::persistence::{LedgerError, RunLedger};
use crate::RunId;

/// Appends a run's output to the ledger, one offset at a time
///
/// Each successful write is durable before `write` returns, and wakes up any
/// reader in this process that is tailing the run. Writes are fenced by the
/// run's owner: once another worker claims the run, they fail with
/// [`LedgerError::NotOwner`].
pub struct ChunkWriter {
    run_id: RunId,
    ledger: Arc<dyn RunLedger>,
    owner: String,
    next_offset: i64,
    progress: watch::Sender<i64>,
}

impl ChunkWriter {
    pub(crate) fn new(
        run_id: RunId,
        ledger: Arc<dyn RunLedger>,
        owner: impl Into<String>,
        next_offset: i64,
        progress: watch::Sender<i64>,
    ) -> Self {
        Self {
            run_id,
            ledger,
            owner: owner.into(),
            next_offset,
            progress,
        }
    }

    /// Run this writer belongs to
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Offset the next written chunk will get
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    /// Append one chunk; returns the offset it was stored at
    pub async fn write(&mut self, chunk: Value) -> Result<i64, LedgerError> {
        let offset = self.next_offset;
        self.write_all(vec![chunk]).await?;
        Ok(offset)
    }

    /// Append several chunks atomically, in order
    pub async fn write_all(&mut self, chunks: Vec<Value>) -> Result<(), LedgerError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let next = self
            .ledger
            .append_chunks(self.run_id, &self.owner, self.next_offset, chunks)
            .await?;
        trace!(run_id = %self.run_id, next, "wrote chunks");
        self.next_offset = next;
        self.progress.send_replace(next);
        Ok(())
    }
}

impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("run_id", &self.run_id)
            .field("owner", &self.owner)
            .field("next_offset", &self.next_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryRunLedger;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_assigns_dense_offsets_and_notifies() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        let run_id = uuid::Uuid::now_v7();
        ledger
            .create_run(run_id, "test", json!({}), "w")
            .await
            .unwrap();

        let (tx, mut rx) = watch::channel(0);
        let mut writer = ChunkWriter::new(run_id, ledger.clone(), "w", 0, tx);

        assert_eq!(writer.write(json!("a")).await.unwrap(), 0);
        assert_eq!(writer.write(json!("b")).await.unwrap(), 1);
        writer.write_all(vec![json!("c"), json!("d")]).await.unwrap();
        writer.write_all(vec![]).await.unwrap();

        assert_eq!(writer.next_offset(), 4);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 4);

        let stored = ledger.load_chunks(run_id, 0, 10).await.unwrap();
        let values: Vec<_> = stored.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
    }

    #[tokio::test]
    async fn test_writer_fenced_after_claim() {
        let ledger = Arc::new(InMemoryRunLedger::new());
        let run_id = uuid::Uuid::now_v7();
        ledger
            .create_run(run_id, "test", json!({}), "w")
            .await
            .unwrap();
        let (tx, _rx) = watch::channel(0);
        let mut writer = ChunkWriter::new(run_id, ledger.clone(), "w", 0, tx);
        writer.write(json!("a")).await.unwrap();

        ledger.backdate_heartbeat(run_id, std::time::Duration::from_secs(60));
        ledger
            .claim_run(run_id, "other", std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let result = writer.write(json!("b")).await;
        assert!(matches!(result, Err(LedgerError::NotOwner { .. })));
        assert_eq!(writer.next_offset(), 1);
    }
}

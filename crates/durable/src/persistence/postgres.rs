//! PostgreSQL implementation of RunLedger
//!
//! Shared persistence so that a run started by one process can be attached
//! from another:
//! - Optimistic concurrency control via the run's chunk count (row lock)
//! - Heartbeat-based detection of runs whose owner went away, and an atomic
//!   owner swap so exactly one worker takes over such a run
//! - Retention purge of closed runs (chunks cascade)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

/// PostgreSQL implementation of RunLedger
///
/// # Example
///
/// ```ignore
/// use chatrun_durable::PostgresRunLedger;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/chatrun").await?;
/// let ledger = PostgresRunLedger::new(pool);
/// ledger.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresRunLedger {
    pool: PgPool,
}

impl PostgresRunLedger {
    /// Create a new PostgreSQL ledger with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the ledger schema (`chat_runs`, `chat_run_chunks`)
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))
    }
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn row_to_info(row: &PgRow) -> Result<RunInfo, LedgerError> {
    let status: String = row.get("status");
    Ok(RunInfo {
        id: row.get("id"),
        workflow_type: row.get("workflow_type"),
        status: status.parse()?,
        input: row.get("input"),
        error: row.get("error"),
        owner: row.get("owner"),
        chunk_count: row.get("chunk_count"),
        heartbeat_at: row.get("heartbeat_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl RunLedger for PostgresRunLedger {
    #[instrument(skip(self, input))]
    async fn create_run(
        &self,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        owner: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO chat_runs (id, workflow_type, status, input, owner)
            VALUES ($1, $2, 'running', $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(workflow_type)
        .bind(&input)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create run: {}", e);
            db_err(e)
        })?;

        debug!(%run_id, %workflow_type, "created run");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_type, status, input, error, owner, chunk_count,
                   heartbeat_at, created_at, updated_at
            FROM chat_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get run: {}", e);
            db_err(e)
        })?
        .ok_or(LedgerError::RunNotFound(run_id))?;

        row_to_info(&row)
    }

    #[instrument(skip(self, error))]
    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_runs
            SET status = $2, error = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(status.to_string())
        .bind(&error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // Either already closed (no-op) or missing
            let exists = sqlx::query("SELECT 1 FROM chat_runs WHERE id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(LedgerError::RunNotFound(run_id));
            }
        }

        debug!(%run_id, %status, "closed run");
        Ok(())
    }

    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()))]
    async fn append_chunks(
        &self,
        run_id: Uuid,
        owner: &str,
        expected_offset: i64,
        chunks: Vec<serde_json::Value>,
    ) -> Result<i64, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            SELECT status, owner, chunk_count
            FROM chat_runs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(LedgerError::RunNotFound(run_id))?;

        let status: String = row.get("status");
        if status.parse::<RunStatus>()?.is_closed() {
            return Err(LedgerError::RunClosed(run_id));
        }

        let current_owner: String = row.get("owner");
        if current_owner != owner {
            return Err(LedgerError::NotOwner {
                run_id,
                owner: current_owner,
            });
        }

        let current: i64 = row.get("chunk_count");
        if current != expected_offset {
            return Err(LedgerError::ConcurrencyConflict {
                expected: expected_offset,
                actual: current,
            });
        }

        let mut next = current;
        for payload in chunks {
            sqlx::query(
                r#"
                INSERT INTO chat_run_chunks (run_id, chunk_offset, payload)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(run_id)
            .bind(next)
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            next += 1;
        }

        sqlx::query(
            r#"
            UPDATE chat_runs
            SET chunk_count = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(next)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(%run_id, next, "appended chunks");
        Ok(next)
    }

    #[instrument(skip(self))]
    async fn load_chunks(
        &self,
        run_id: Uuid,
        from_offset: i64,
        limit: usize,
    ) -> Result<Vec<(i64, serde_json::Value)>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_offset, payload
            FROM chat_run_chunks
            WHERE run_id = $1 AND chunk_offset >= $2
            ORDER BY chunk_offset
            LIMIT $3
            "#,
        )
        .bind(run_id)
        .bind(from_offset.max(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load chunks: {}", e);
            db_err(e)
        })?;

        if rows.is_empty() {
            // Distinguish "nothing new yet" from "no such run"
            self.get_run(run_id).await?;
        }

        Ok(rows
            .iter()
            .map(|row| (row.get("chunk_offset"), row.get("payload")))
            .collect())
    }

    #[instrument(skip(self))]
    async fn heartbeat(&self, run_id: Uuid, owner: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE chat_runs
            SET heartbeat_at = NOW()
            WHERE id = $1 AND owner = $2 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_stale_runs(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, LedgerError> {
        let threshold = chrono::Duration::from_std(stale_threshold)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        let rows = sqlx::query(
            r#"
            SELECT id FROM chat_runs
            WHERE status = 'running' AND heartbeat_at < $1
            ORDER BY heartbeat_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self))]
    async fn claim_run(
        &self,
        run_id: Uuid,
        new_owner: &str,
        stale_threshold: Duration,
    ) -> Result<Option<RunInfo>, LedgerError> {
        let threshold = chrono::Duration::from_std(stale_threshold)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        let row = sqlx::query(
            r#"
            UPDATE chat_runs
            SET owner = $2, heartbeat_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND heartbeat_at < $3
            RETURNING id, workflow_type, status, input, error, owner, chunk_count,
                      heartbeat_at, created_at, updated_at
            "#,
        )
        .bind(run_id)
        .bind(new_owner)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim run: {}", e);
            db_err(e)
        })?;

        match row {
            Some(row) => {
                debug!(%run_id, %new_owner, "claimed stale run");
                row_to_info(&row).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn purge_closed_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM chat_runs
            WHERE status <> 'running' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "purged closed runs");
        }
        Ok(purged)
    }
}

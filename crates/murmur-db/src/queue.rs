//! Durable FIFO work queue over the `work_queue` table.
//!
//! One logical queue per stage key. `pop_batch` removes items with
//! `FOR UPDATE SKIP LOCKED`, so concurrent consumers never double-pop a
//! row; a consumer that crashes after popping loses its batch, which the
//! pipeline tolerates because producers are re-triggerable through the
//! cursor-anchored source APIs.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

/// Queue contract shared by the harvesters (producers) and the
/// pre-processor / comment workers (consumers).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append one payload to the tail of `stage`.
    async fn push(&self, stage: &str, payload: &Value) -> Result<(), DbError>;

    /// Append a batch of payloads, preserving order. Returns the number pushed.
    async fn push_many(&self, stage: &str, payloads: &[Value]) -> Result<usize, DbError>;

    /// Remove and return up to `n` payloads from the head of `stage`.
    async fn pop_batch(&self, stage: &str, n: i64) -> Result<Vec<Value>, DbError>;

    /// Number of items currently queued in `stage`.
    async fn len(&self, stage: &str) -> Result<i64, DbError>;
}

#[async_trait]
impl WorkQueue for PgPool {
    async fn push(&self, stage: &str, payload: &Value) -> Result<(), DbError> {
        sqlx::query("INSERT INTO work_queue (stage, payload) VALUES ($1, $2)")
            .bind(stage)
            .bind(payload)
            .execute(self)
            .await?;
        Ok(())
    }

    async fn push_many(&self, stage: &str, payloads: &[Value]) -> Result<usize, DbError> {
        if payloads.is_empty() {
            return Ok(0);
        }
        // One statement per item keeps insertion order deterministic and the
        // failure unit small; batches are bounded by the harvest page limit.
        let mut tx = self.begin().await?;
        for payload in payloads {
            sqlx::query("INSERT INTO work_queue (stage, payload) VALUES ($1, $2)")
                .bind(stage)
                .bind(payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(payloads.len())
    }

    async fn pop_batch(&self, stage: &str, n: i64) -> Result<Vec<Value>, DbError> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "DELETE FROM work_queue \
             WHERE id IN ( \
                 SELECT id FROM work_queue \
                 WHERE stage = $1 \
                 ORDER BY id \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING payload",
        )
        .bind(stage)
        .bind(n)
        .fetch_all(self)
        .await?;
        Ok(rows.into_iter().map(|(payload,)| payload).collect())
    }

    async fn len(&self, stage: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_queue WHERE stage = $1")
            .bind(stage)
            .fetch_one(self)
            .await?;
        Ok(count)
    }
}

//! Shared pagination cursor store with optimistic concurrency control.
//!
//! One row per source holds the `(min_id, max_id)` pair plus a version
//! counter. Readers take the version with the id; a commit is a single
//! `UPDATE ... WHERE version = $read` — if another harvester committed in
//! between, zero rows match and the caller gets [`CommitOutcome::Conflict`],
//! discards its fetched batch, and re-reads. Exactly one writer wins per
//! read version, so many concurrent stateless harvesters advance the cursor
//! as if a single sequential reader were running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::Direction;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `harvest_cursors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CursorRow {
    pub source_key: String,
    pub min_id: String,
    pub max_id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The versioned snapshot a harvester anchors its fetch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRead {
    pub version: i64,
    pub id: String,
}

/// Result of an optimistic cursor commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The stored version matched and the cursor advanced.
    Committed,
    /// Another writer advanced the cursor first; re-read and retry.
    Conflict,
}

/// Storage contract for the per-source cursor pair.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the cursor id for one direction, with its version. `None` means
    /// the source has never been seeded.
    async fn read(
        &self,
        source_key: &str,
        direction: Direction,
    ) -> Result<Option<CursorRead>, DbError>;

    /// Seed both ends of the cursor pair from a single item id. Returns
    /// `false` if a row already existed (another worker seeded first).
    async fn seed(&self, source_key: &str, id: &str) -> Result<bool, DbError>;

    /// Compare-and-swap one end of the cursor pair. Succeeds only if the
    /// stored version still equals `version`.
    async fn commit(
        &self,
        source_key: &str,
        direction: Direction,
        version: i64,
        new_id: &str,
    ) -> Result<CommitOutcome, DbError>;
}

#[async_trait]
impl CursorStore for PgPool {
    async fn read(
        &self,
        source_key: &str,
        direction: Direction,
    ) -> Result<Option<CursorRead>, DbError> {
        let row = get_cursor(self, source_key).await?;
        Ok(row.map(|r| CursorRead {
            version: r.version,
            id: match direction {
                Direction::Older => r.min_id,
                Direction::Newer => r.max_id,
            },
        }))
    }

    async fn seed(&self, source_key: &str, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO harvest_cursors (source_key, min_id, max_id) \
             VALUES ($1, $2, $2) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(source_key)
        .bind(id)
        .execute(self)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(
        &self,
        source_key: &str,
        direction: Direction,
        version: i64,
        new_id: &str,
    ) -> Result<CommitOutcome, DbError> {
        // Two static statements instead of interpolating the column name.
        let sql = match direction {
            Direction::Older => {
                "UPDATE harvest_cursors \
                 SET min_id = $3, version = version + 1, updated_at = now() \
                 WHERE source_key = $1 AND version = $2"
            }
            Direction::Newer => {
                "UPDATE harvest_cursors \
                 SET max_id = $3, version = version + 1, updated_at = now() \
                 WHERE source_key = $1 AND version = $2"
            }
        };

        let result = sqlx::query(sql)
            .bind(source_key)
            .bind(version)
            .bind(new_id)
            .execute(self)
            .await?;

        if result.rows_affected() > 0 {
            Ok(CommitOutcome::Committed)
        } else {
            Ok(CommitOutcome::Conflict)
        }
    }
}

/// Fetch the full cursor row for a source, or `None` if never seeded.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_cursor(pool: &PgPool, source_key: &str) -> Result<Option<CursorRow>, DbError> {
    let row = sqlx::query_as::<_, CursorRow>(
        "SELECT source_key, min_id, max_id, version, created_at, updated_at \
         FROM harvest_cursors \
         WHERE source_key = $1",
    )
    .bind(source_key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// List all cursor rows, ordered by source key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_cursors(pool: &PgPool) -> Result<Vec<CursorRow>, DbError> {
    let rows = sqlx::query_as::<_, CursorRow>(
        "SELECT source_key, min_id, max_id, version, created_at, updated_at \
         FROM harvest_cursors \
         ORDER BY source_key",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

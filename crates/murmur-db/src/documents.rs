//! Document store operations: sink upserts, keyword routing, annotation.
//!
//! Documents live in logical indexes (the `index_name` column) and are
//! keyed by their source-native id, so every write here is an upsert and
//! repeated delivery of the same record converges to one row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

/// A validated record ready for the sink.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Source-native immutable id, unique within the source.
    pub source_id: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Flattened source-specific fields.
    pub extra: Value,
}

/// Outcome of a bulk upsert: successes commit even when siblings fail.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub succeeded: usize,
    pub failed: usize,
    /// One `(source_id, reason)` pair per failed document.
    pub failures: Vec<(String, String)>,
}

/// A full row from the `documents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub index_name: String,
    pub source_id: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub extra: Value,
    pub routed: Value,
    pub sentiment_negative: Option<f32>,
    pub sentiment_neutral: Option<f32>,
    pub sentiment_positive: Option<f32>,
    pub sentiment_label: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A document selected for annotation: id plus whatever content it carries.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnannotatedDoc {
    pub source_id: String,
    pub content: Option<String>,
}

/// Sink contract: idempotent bulk upsert keyed by source-native id.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert a batch into `index`. Per-document failures are collected in
    /// the report; they never roll back sibling documents.
    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[StoredDocument],
    ) -> Result<UpsertReport, DbError>;
}

/// Queries the keyword router needs.
#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// Ids of documents in `from_index` not yet routed to `to_index` whose
    /// content phrase-matches any keyword (case-insensitive).
    async fn unrouted_matches(
        &self,
        from_index: &str,
        to_index: &str,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DbError>;

    /// Copy a document to `to_index` under the same id (upsert).
    async fn copy_document(
        &self,
        from_index: &str,
        to_index: &str,
        source_id: &str,
    ) -> Result<(), DbError>;

    /// Record that the document has been routed to `to_index`. Last-write-wins
    /// and re-marking are both safe.
    async fn mark_routed(
        &self,
        from_index: &str,
        source_id: &str,
        to_index: &str,
    ) -> Result<(), DbError>;
}

/// Queries the annotation worker needs.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Documents in `index` with no sentiment label yet, oldest-ingested first.
    async fn unannotated(&self, index: &str, limit: i64) -> Result<Vec<UnannotatedDoc>, DbError>;

    /// Write sentiment scores and label back onto one document.
    async fn write_annotation(
        &self,
        index: &str,
        source_id: &str,
        negative: f32,
        neutral: f32,
        positive: f32,
        label: &str,
    ) -> Result<(), DbError>;
}

#[async_trait]
impl DocumentSink for PgPool {
    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[StoredDocument],
    ) -> Result<UpsertReport, DbError> {
        let mut report = UpsertReport::default();
        for doc in docs {
            let result = sqlx::query(
                "INSERT INTO documents \
                     (index_name, source_id, author, content, created_at, extra) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (index_name, source_id) DO UPDATE SET \
                     author = EXCLUDED.author, \
                     content = EXCLUDED.content, \
                     created_at = EXCLUDED.created_at, \
                     extra = EXCLUDED.extra, \
                     updated_at = now()",
            )
            .bind(index)
            .bind(&doc.source_id)
            .bind(&doc.author)
            .bind(&doc.content)
            .bind(doc.created_at)
            .bind(&doc.extra)
            .execute(self)
            .await;

            match result {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    tracing::warn!(
                        index,
                        source_id = %doc.source_id,
                        error = %e,
                        "document upsert failed; continuing with batch"
                    );
                    report.failed += 1;
                    report.failures.push((doc.source_id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl RoutingStore for PgPool {
    async fn unrouted_matches(
        &self,
        from_index: &str,
        to_index: &str,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DbError> {
        let patterns: Vec<String> = keywords
            .iter()
            .map(|k| format!("%{}%", escape_like(k)))
            .collect();

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT source_id FROM documents \
             WHERE index_name = $1 \
               AND NOT (routed ? $2) \
               AND content ILIKE ANY($3) \
             ORDER BY ingested_at, source_id \
             LIMIT $4",
        )
        .bind(from_index)
        .bind(to_index)
        .bind(&patterns)
        .bind(limit)
        .fetch_all(self)
        .await?;
        Ok(ids)
    }

    async fn copy_document(
        &self,
        from_index: &str,
        to_index: &str,
        source_id: &str,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "INSERT INTO documents \
                 (index_name, source_id, author, content, created_at, extra) \
             SELECT $2, source_id, author, content, created_at, extra \
             FROM documents \
             WHERE index_name = $1 AND source_id = $3 \
             ON CONFLICT (index_name, source_id) DO UPDATE SET \
                 author = EXCLUDED.author, \
                 content = EXCLUDED.content, \
                 created_at = EXCLUDED.created_at, \
                 extra = EXCLUDED.extra, \
                 updated_at = now()",
        )
        .bind(from_index)
        .bind(to_index)
        .bind(source_id)
        .execute(self)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn mark_routed(
        &self,
        from_index: &str,
        source_id: &str,
        to_index: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE documents \
             SET routed = routed || jsonb_build_object($3::text, true), \
                 updated_at = now() \
             WHERE index_name = $1 AND source_id = $2",
        )
        .bind(from_index)
        .bind(source_id)
        .bind(to_index)
        .execute(self)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AnnotationStore for PgPool {
    async fn unannotated(&self, index: &str, limit: i64) -> Result<Vec<UnannotatedDoc>, DbError> {
        let rows = sqlx::query_as::<_, UnannotatedDoc>(
            "SELECT source_id, content FROM documents \
             WHERE index_name = $1 AND sentiment_label IS NULL \
             ORDER BY ingested_at, source_id \
             LIMIT $2",
        )
        .bind(index)
        .bind(limit)
        .fetch_all(self)
        .await?;
        Ok(rows)
    }

    async fn write_annotation(
        &self,
        index: &str,
        source_id: &str,
        negative: f32,
        neutral: f32,
        positive: f32,
        label: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE documents \
             SET sentiment_negative = $3, \
                 sentiment_neutral = $4, \
                 sentiment_positive = $5, \
                 sentiment_label = $6, \
                 updated_at = now() \
             WHERE index_name = $1 AND source_id = $2",
        )
        .bind(index)
        .bind(source_id)
        .bind(negative)
        .bind(neutral)
        .bind(positive)
        .bind(label)
        .execute(self)
        .await?;
        Ok(())
    }
}

/// Fetch a single document, or `None` if absent.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_document(
    pool: &PgPool,
    index: &str,
    source_id: &str,
) -> Result<Option<DocumentRow>, DbError> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT index_name, source_id, author, content, created_at, extra, routed, \
                sentiment_negative, sentiment_neutral, sentiment_positive, sentiment_label, \
                ingested_at, updated_at \
         FROM documents \
         WHERE index_name = $1 AND source_id = $2",
    )
    .bind(index)
    .bind(source_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Count documents in a logical index.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_documents(pool: &PgPool, index: &str) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE index_name = $1")
        .bind(index)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Escape `%` and `_` so configured keywords match literally under ILIKE.
fn escape_like(keyword: &str) -> String {
    keyword.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_passes_plain_words() {
        assert_eq!(escape_like("election"), "election");
    }

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("100%_sure"), "100\\%\\_sure");
    }
}

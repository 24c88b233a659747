//! In-memory implementation of the store and queue contracts.
//!
//! Mirrors the Postgres semantics closely enough for worker tests and local
//! experiments: CAS on a version counter, FIFO queues, upsert-by-id
//! documents with routed markers and sentiment fields. Not durable and not
//! meant for production use.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use murmur_core::Direction;
use serde_json::Value;

use crate::cursors::{CommitOutcome, CursorRead, CursorStore};
use crate::documents::{
    AnnotationStore, DocumentSink, RoutingStore, StoredDocument, UnannotatedDoc, UpsertReport,
};
use crate::queue::WorkQueue;
use crate::DbError;

#[derive(Debug, Clone)]
struct MemCursor {
    min_id: String,
    max_id: String,
    version: i64,
}

/// An in-memory document, exposed for test assertions.
#[derive(Debug, Clone)]
pub struct MemDoc {
    pub author: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub extra: Value,
    pub routed: HashSet<String>,
    pub sentiment: Option<(f32, f32, f32, String)>,
}

#[derive(Default)]
struct Inner {
    cursors: HashMap<String, MemCursor>,
    queues: HashMap<String, VecDeque<Value>>,
    documents: HashMap<(String, String), MemDoc>,
    /// Fault injection: sink upserts for these ids fail with a reason.
    rejected_sink_ids: HashSet<String>,
    /// Fault injection: annotation writes for these ids fail.
    rejected_annotation_ids: HashSet<String>,
    /// Fault injection: every queue push fails while set.
    fail_pushes: bool,
}

/// Shared in-memory store implementing every storage trait in this crate.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent queue pushes fail, simulating a crash between
    /// cursor commit and queue push.
    pub fn fail_pushes(&self, on: bool) {
        self.inner.lock().expect("memory store lock").fail_pushes = on;
    }

    /// Make sink upserts for `source_id` fail, simulating a per-document
    /// store rejection inside a bulk batch.
    pub fn reject_sink_id(&self, source_id: &str) {
        self.inner
            .lock()
            .expect("memory store lock")
            .rejected_sink_ids
            .insert(source_id.to_string());
    }

    /// Make annotation writes for `source_id` fail, simulating a
    /// per-document store failure mid-pass.
    pub fn reject_annotation_id(&self, source_id: &str) {
        self.inner
            .lock()
            .expect("memory store lock")
            .rejected_annotation_ids
            .insert(source_id.to_string());
    }

    /// Snapshot of a document for assertions.
    #[must_use]
    pub fn document(&self, index: &str, source_id: &str) -> Option<MemDoc> {
        self.inner
            .lock()
            .expect("memory store lock")
            .documents
            .get(&(index.to_string(), source_id.to_string()))
            .cloned()
    }

    /// Number of documents in a logical index.
    #[must_use]
    pub fn document_count(&self, index: &str) -> usize {
        self.inner
            .lock()
            .expect("memory store lock")
            .documents
            .keys()
            .filter(|(idx, _)| idx == index)
            .count()
    }

    /// Insert a document directly, bypassing the queue (test setup).
    pub fn insert_document(&self, index: &str, doc: &StoredDocument) {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.documents.insert(
            (index.to_string(), doc.source_id.clone()),
            MemDoc {
                author: doc.author.clone(),
                content: doc.content.clone(),
                created_at: doc.created_at,
                extra: doc.extra.clone(),
                routed: HashSet::new(),
                sentiment: None,
            },
        );
    }

    /// Current cursor version for a source, if seeded.
    #[must_use]
    pub fn cursor_version(&self, source_key: &str) -> Option<i64> {
        self.inner
            .lock()
            .expect("memory store lock")
            .cursors
            .get(source_key)
            .map(|c| c.version)
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn read(
        &self,
        source_key: &str,
        direction: Direction,
    ) -> Result<Option<CursorRead>, DbError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.cursors.get(source_key).map(|c| CursorRead {
            version: c.version,
            id: match direction {
                Direction::Older => c.min_id.clone(),
                Direction::Newer => c.max_id.clone(),
            },
        }))
    }

    async fn seed(&self, source_key: &str, id: &str) -> Result<bool, DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.cursors.contains_key(source_key) {
            return Ok(false);
        }
        inner.cursors.insert(
            source_key.to_string(),
            MemCursor {
                min_id: id.to_string(),
                max_id: id.to_string(),
                version: 0,
            },
        );
        Ok(true)
    }

    async fn commit(
        &self,
        source_key: &str,
        direction: Direction,
        version: i64,
        new_id: &str,
    ) -> Result<CommitOutcome, DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let Some(cursor) = inner.cursors.get_mut(source_key) else {
            return Ok(CommitOutcome::Conflict);
        };
        if cursor.version != version {
            return Ok(CommitOutcome::Conflict);
        }
        match direction {
            Direction::Older => cursor.min_id = new_id.to_string(),
            Direction::Newer => cursor.max_id = new_id.to_string(),
        }
        cursor.version += 1;
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn push(&self, stage: &str, payload: &Value) -> Result<(), DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.fail_pushes {
            return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
        }
        inner
            .queues
            .entry(stage.to_string())
            .or_default()
            .push_back(payload.clone());
        Ok(())
    }

    async fn push_many(&self, stage: &str, payloads: &[Value]) -> Result<usize, DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.fail_pushes {
            return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
        }
        let queue = inner.queues.entry(stage.to_string()).or_default();
        for payload in payloads {
            queue.push_back(payload.clone());
        }
        Ok(payloads.len())
    }

    async fn pop_batch(&self, stage: &str, n: i64) -> Result<Vec<Value>, DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let Some(queue) = inner.queues.get_mut(stage) else {
            return Ok(Vec::new());
        };
        let take = usize::try_from(n).unwrap_or(0).min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn len(&self, stage: &str) -> Result<i64, DbError> {
        let inner = self.inner.lock().expect("memory store lock");
        let len = inner.queues.get(stage).map_or(0, VecDeque::len);
        Ok(i64::try_from(len).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl DocumentSink for MemoryStore {
    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[StoredDocument],
    ) -> Result<UpsertReport, DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let mut report = UpsertReport::default();
        for doc in docs {
            if inner.rejected_sink_ids.contains(&doc.source_id) {
                report.failed += 1;
                report
                    .failures
                    .push((doc.source_id.clone(), "rejected by store".to_string()));
                continue;
            }
            let key = (index.to_string(), doc.source_id.clone());
            let entry = inner.documents.entry(key).or_insert_with(|| MemDoc {
                author: None,
                content: None,
                created_at: None,
                extra: Value::Null,
                routed: HashSet::new(),
                sentiment: None,
            });
            entry.author.clone_from(&doc.author);
            entry.content.clone_from(&doc.content);
            entry.created_at = doc.created_at;
            entry.extra = doc.extra.clone();
            report.succeeded += 1;
        }
        Ok(report)
    }
}

#[async_trait]
impl RoutingStore for MemoryStore {
    async fn unrouted_matches(
        &self,
        from_index: &str,
        to_index: &str,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DbError> {
        let inner = self.inner.lock().expect("memory store lock");
        let mut ids: Vec<String> = inner
            .documents
            .iter()
            .filter(|((idx, _), doc)| {
                idx == from_index
                    && !doc.routed.contains(to_index)
                    && doc.content.as_ref().is_some_and(|content| {
                        let haystack = content.to_lowercase();
                        keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
                    })
            })
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        ids.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(ids)
    }

    async fn copy_document(
        &self,
        from_index: &str,
        to_index: &str,
        source_id: &str,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let source = inner
            .documents
            .get(&(from_index.to_string(), source_id.to_string()))
            .cloned()
            .ok_or(DbError::NotFound)?;
        inner.documents.insert(
            (to_index.to_string(), source_id.to_string()),
            MemDoc {
                routed: HashSet::new(),
                sentiment: None,
                ..source
            },
        );
        Ok(())
    }

    async fn mark_routed(
        &self,
        from_index: &str,
        source_id: &str,
        to_index: &str,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if let Some(doc) = inner
            .documents
            .get_mut(&(from_index.to_string(), source_id.to_string()))
        {
            doc.routed.insert(to_index.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn unannotated(&self, index: &str, limit: i64) -> Result<Vec<UnannotatedDoc>, DbError> {
        let inner = self.inner.lock().expect("memory store lock");
        let mut docs: Vec<UnannotatedDoc> = inner
            .documents
            .iter()
            .filter(|((idx, _), doc)| idx == index && doc.sentiment.is_none())
            .map(|((_, id), doc)| UnannotatedDoc {
                source_id: id.clone(),
                content: doc.content.clone(),
            })
            .collect();
        docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        docs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(docs)
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
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.rejected_annotation_ids.contains(source_id) {
            return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
        }
        if let Some(doc) = inner
            .documents
            .get_mut(&(index.to_string(), source_id.to_string()))
        {
            doc.sentiment = Some((negative, neutral, positive, label.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cursor_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        store.seed("reddit:test", "100").await.unwrap();

        let read = CursorStore::read(&store, "reddit:test", Direction::Newer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.version, 0);
        assert_eq!(read.id, "100");

        let first = store
            .commit("reddit:test", Direction::Newer, read.version, "105")
            .await
            .unwrap();
        assert_eq!(first, CommitOutcome::Committed);

        // Second writer holding the same read version must lose.
        let second = store
            .commit("reddit:test", Direction::Newer, read.version, "110")
            .await
            .unwrap();
        assert_eq!(second, CommitOutcome::Conflict);

        let fresh = CursorStore::read(&store, "reddit:test", Direction::Newer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.version, 1);
        assert_eq!(fresh.id, "105");
    }

    #[tokio::test]
    async fn seed_is_first_writer_wins() {
        let store = MemoryStore::new();
        assert!(store.seed("s", "1").await.unwrap());
        assert!(!store.seed("s", "2").await.unwrap());
        let read = CursorStore::read(&store, "s", Direction::Older)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.id, "1");
    }

    #[tokio::test]
    async fn queue_is_fifo_and_pop_removes() {
        let store = MemoryStore::new();
        store
            .push_many("stage", &[json!({"id": "a"}), json!({"id": "b"})])
            .await
            .unwrap();
        store.push("stage", &json!({"id": "c"})).await.unwrap();
        assert_eq!(WorkQueue::len(&store, "stage").await.unwrap(), 3);

        let batch = store.pop_batch("stage", 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["id"], "a");
        assert_eq!(batch[1]["id"], "b");
        assert_eq!(WorkQueue::len(&store, "stage").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_from_unknown_stage_is_empty() {
        let store = MemoryStore::new();
        assert!(store.pop_batch("nothing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_upsert_is_idempotent_by_id() {
        let store = MemoryStore::new();
        let v1 = StoredDocument {
            source_id: "p1".to_string(),
            author: Some("alice".to_string()),
            content: Some("first".to_string()),
            created_at: None,
            extra: json!({}),
        };
        let v2 = StoredDocument {
            content: Some("second".to_string()),
            ..v1.clone()
        };

        store.bulk_upsert("posts", &[v1]).await.unwrap();
        store.bulk_upsert("posts", &[v2]).await.unwrap();

        assert_eq!(store.document_count("posts"), 1);
        let doc = store.document("posts", "p1").unwrap();
        assert_eq!(doc.content.as_deref(), Some("second"));
    }
}

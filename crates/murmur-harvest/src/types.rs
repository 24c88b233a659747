use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A harvested item after normalization, ready for the queue.
///
/// Nested source structures (award lists, flair lists, media metadata) have
/// already been flattened into delimited strings inside `extra`, so the
/// record is a flat map of scalars by the time it leaves the harvester and
/// the sink schema's field count stays bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPost {
    /// Source-native immutable id, unique within the source.
    pub id: String,
    /// Cursor key of the feed this came from.
    pub source_key: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Flattened source-specific fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// What a harvest tick accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    /// New items were fetched, the cursor advanced, and the batch is queued.
    Harvested,
    /// The source had nothing beyond the current cursor. Not an error.
    Empty,
}

/// Structured result of one harvest tick, returned to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub source_key: String,
    pub status: TickStatus,
    /// Items returned by the source API.
    pub fetched: usize,
    /// Items that normalized cleanly and reached the queue.
    pub queued: usize,
    /// Items dropped by normalization (logged individually).
    pub skipped: usize,
    /// The committed cursor boundary, when the cursor advanced.
    pub new_id: Option<String>,
    /// CAS attempts consumed, including the winning one.
    pub commit_attempts: u32,
}

impl TickReport {
    pub(crate) fn empty(source_key: &str, commit_attempts: u32) -> Self {
        Self {
            source_key: source_key.to_string(),
            status: TickStatus::Empty,
            fetched: 0,
            queued: 0,
            skipped: 0,
            new_id: None,
            commit_attempts,
        }
    }
}

/// Structured result of one comment-backlog tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommentReport {
    /// Post ids taken off the backlog.
    pub posts_processed: usize,
    /// Normalized comments pushed to the comments stage.
    pub comments_queued: usize,
    /// Post ids put back on the backlog after a rate limit.
    pub requeued: usize,
    /// Post ids whose comment fetch failed and was skipped.
    pub failed: usize,
}

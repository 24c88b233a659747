//! Stateless harvest and comment-backlog workers.
//!
//! [`harvest_tick`] runs one pagination step for one source and direction:
//! read the shared cursor, fetch one page past it, normalize, commit the new
//! boundary with compare-and-swap, and only then push the batch to the work
//! queue. Any number of identical workers can tick the same source; CAS
//! guarantees exactly one of them advances the cursor per version, and the
//! losers discard their batches, so the queue never sees a page twice.
//!
//! The commit-then-push order means a crash between the two loses one page
//! of queue payloads but never duplicates them; the documents themselves are
//! re-fetchable by resetting the cursor.

use serde_json::{json, Value};

use murmur_core::{Direction, COMMENT_BACKLOG_STAGE, REDDIT_COMMENTS_STAGE};
use murmur_db::{CommitOutcome, CursorStore, WorkQueue};

use crate::error::HarvestError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::source::{CommentSource, FeedSource, HarvestItem};
use crate::types::{CommentReport, NormalizedPost, TickReport, TickStatus};

/// Knobs for one harvest tick.
#[derive(Debug, Clone)]
pub struct HarvestParams {
    /// Queue stage the normalized batch is pushed to.
    pub stage: String,
    pub direction: Direction,
    pub page_limit: u32,
    pub retry: RetryPolicy,
    /// CAS attempts before the tick gives up on a contended cursor.
    pub max_commit_attempts: u32,
}

/// Run one harvest step for `source` against the shared cursor in `store`.
///
/// An unseeded source is seeded from its single most recent item, which is
/// itself queued; subsequent ticks page outward from there. An up-to-date
/// source yields [`TickStatus::Empty`], which is a normal outcome, not an
/// error.
///
/// # Errors
///
/// - [`HarvestError::NoData`] if the source is unseeded and has no items.
/// - [`HarvestError::ConflictExhausted`] if every CAS attempt lost the race.
/// - [`HarvestError::CommitUnqueued`] if the cursor advanced but the queue
///   push failed; the tick is **not** a success in that case.
/// - Fetch errors once the retry budget is spent.
pub async fn harvest_tick<S, St>(
    source: &S,
    store: &St,
    params: &HarvestParams,
) -> Result<TickReport, HarvestError>
where
    S: FeedSource,
    St: CursorStore + WorkQueue,
{
    let source_key = source.source_key();

    let mut attempts = 0u32;
    let (posts, fetched, skipped, new_id, commit_attempts) = loop {
        let cursor = match store.read(source_key, params.direction).await? {
            Some(cursor) => cursor,
            None => match seed_cursor(source, store, params).await? {
                SeedOutcome::Seeded(report) => return Ok(report),
                // Another worker seeded between our read and our insert.
                SeedOutcome::Lost(cursor) => cursor,
            },
        };

        attempts += 1;
        let items = retry_with_backoff(params.retry, || {
            source.fetch_page(&cursor.id, params.page_limit, params.direction)
        })
        .await?;

        if items.is_empty() {
            return Ok(TickReport::empty(source_key, attempts - 1));
        }

        // The boundary is the last item in fetch order, whether or not it
        // normalized cleanly; skipping a malformed item must not stall the
        // cursor on it forever.
        let new_id = items
            .last()
            .map(|item| item.item_id().to_string())
            .unwrap_or_default();
        let (posts, skipped) = normalize_items(&items, source_key);
        let fetched = items.len();

        match store
            .commit(source_key, params.direction, cursor.version, &new_id)
            .await?
        {
            CommitOutcome::Committed => break (posts, fetched, skipped, new_id, attempts),
            CommitOutcome::Conflict => {
                if attempts >= params.max_commit_attempts {
                    return Err(HarvestError::ConflictExhausted {
                        source_key: source_key.to_string(),
                        attempts,
                    });
                }
                tracing::debug!(
                    source_key,
                    attempt = attempts,
                    "cursor advanced concurrently, discarding batch and re-reading"
                );
            }
        }
    };

    let queued = push_batch(source, store, &params.stage, &posts, source_key).await?;
    tracing::info!(
        source_key,
        direction = %params.direction,
        fetched,
        queued,
        skipped,
        new_id = %new_id,
        commit_attempts,
        "harvest tick committed"
    );

    Ok(TickReport {
        source_key: source_key.to_string(),
        status: TickStatus::Harvested,
        fetched,
        queued,
        skipped,
        new_id: Some(new_id),
        commit_attempts,
    })
}

enum SeedOutcome {
    /// We won the seed race; the seed item is queued and the tick is done.
    Seeded(TickReport),
    /// Another worker seeded first; continue with its cursor.
    Lost(murmur_db::CursorRead),
}

async fn seed_cursor<S, St>(
    source: &S,
    store: &St,
    params: &HarvestParams,
) -> Result<SeedOutcome, HarvestError>
where
    S: FeedSource,
    St: CursorStore + WorkQueue,
{
    let source_key = source.source_key();
    let latest = retry_with_backoff(params.retry, || source.fetch_latest())
        .await?
        .ok_or_else(|| HarvestError::NoData {
            source_key: source_key.to_string(),
        })?;

    if !store.seed(source_key, latest.item_id()).await? {
        let cursor = store
            .read(source_key, params.direction)
            .await?
            .ok_or(murmur_db::DbError::NotFound)?;
        return Ok(SeedOutcome::Lost(cursor));
    }

    let (posts, skipped) = normalize_items(std::slice::from_ref(&latest), source_key);
    let queued = push_batch(source, store, &params.stage, &posts, source_key).await?;
    tracing::info!(
        source_key,
        seed_id = latest.item_id(),
        "seeded cursor from latest item"
    );

    Ok(SeedOutcome::Seeded(TickReport {
        source_key: source_key.to_string(),
        status: TickStatus::Harvested,
        fetched: 1,
        queued,
        skipped,
        new_id: Some(latest.item_id().to_string()),
        commit_attempts: 0,
    }))
}

fn normalize_items<I: HarvestItem>(items: &[I], source_key: &str) -> (Vec<NormalizedPost>, usize) {
    let mut posts = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for item in items {
        match item.normalize(source_key) {
            Ok(post) => posts.push(post),
            Err(err) => {
                skipped += 1;
                tracing::warn!(
                    source_key,
                    item_id = item.item_id(),
                    error = %err,
                    "dropping item that failed normalization"
                );
            }
        }
    }
    (posts, skipped)
}

/// Push the normalized batch, plus comment-backlog ids for sources that have
/// comment threads. The cursor is already committed by the time this runs, so
/// a push failure is surfaced as [`HarvestError::CommitUnqueued`] rather than
/// silently reported as success.
async fn push_batch<S, St>(
    source: &S,
    store: &St,
    stage: &str,
    posts: &[NormalizedPost],
    source_key: &str,
) -> Result<usize, HarvestError>
where
    S: FeedSource,
    St: WorkQueue,
{
    let payloads: Vec<Value> = posts
        .iter()
        .map(|post| serde_json::to_value(post).unwrap_or(Value::Null))
        .collect();

    let queued = store.push_many(stage, &payloads).await.map_err(|err| {
        HarvestError::CommitUnqueued {
            source_key: source_key.to_string(),
            queued: 0,
            total: payloads.len(),
            source: err,
        }
    })?;

    if source.wants_comments() && !posts.is_empty() {
        let backlog: Vec<Value> = posts
            .iter()
            .map(|post| json!({"post_id": post.id, "source_key": source_key}))
            .collect();
        // Comments are a best-effort supplement; a backlog push failure must
        // not mask the successfully queued post batch.
        if let Err(err) = store.push_many(COMMENT_BACKLOG_STAGE, &backlog).await {
            tracing::warn!(
                source_key,
                error = %err,
                "failed to push post ids to the comment backlog"
            );
        }
    }

    Ok(queued)
}

/// Drain up to `batch_size` post ids from the comment backlog and queue their
/// normalized comment threads.
///
/// A rate limit that survives the retry budget puts the current id and every
/// remaining one back on the backlog and ends the tick early; they will be
/// retried on the next tick. Other per-post failures are logged and skipped.
///
/// # Errors
///
/// Returns a store error if the backlog cannot be popped or the comments
/// stage cannot be pushed.
pub async fn comment_tick<S, St>(
    source: &S,
    store: &St,
    batch_size: i64,
    retry: RetryPolicy,
) -> Result<CommentReport, HarvestError>
where
    S: CommentSource,
    St: WorkQueue,
{
    let source_key = source.source_key();
    let payloads = store.pop_batch(COMMENT_BACKLOG_STAGE, batch_size).await?;
    let mut report = CommentReport::default();
    let mut pending = payloads.into_iter();

    while let Some(payload) = pending.next() {
        let Some(post_id) = payload
            .get("post_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
        else {
            report.failed += 1;
            tracing::warn!(source_key, %payload, "dropping malformed backlog entry");
            continue;
        };

        match retry_with_backoff(retry, || source.fetch_comments(&post_id)).await {
            Ok(comments) => {
                let (posts, skipped) = normalize_items(&comments, source_key);
                if skipped > 0 {
                    tracing::warn!(source_key, post_id, skipped, "comments dropped");
                }
                let values: Vec<Value> = posts
                    .iter()
                    .map(|post| serde_json::to_value(post).unwrap_or(Value::Null))
                    .collect();
                let queued = store.push_many(REDDIT_COMMENTS_STAGE, &values).await?;
                report.posts_processed += 1;
                report.comments_queued += queued;
            }
            Err(HarvestError::RateLimited { .. }) => {
                store.push(COMMENT_BACKLOG_STAGE, &payload).await?;
                report.requeued += 1;
                for rest in pending.by_ref() {
                    store.push(COMMENT_BACKLOG_STAGE, &rest).await?;
                    report.requeued += 1;
                }
                tracing::warn!(
                    source_key,
                    requeued = report.requeued,
                    "rate limited while draining comment backlog, requeued remainder"
                );
                break;
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(source_key, post_id, error = %err, "comment fetch failed");
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde::de::Error as _;
    use serde_json::json;

    use murmur_db::{CommitOutcome, CursorRead, DbError, MemoryStore};

    use super::*;

    #[derive(Debug, Clone)]
    struct ScriptedItem {
        id: String,
        bad: bool,
    }

    fn item(id: &str) -> ScriptedItem {
        ScriptedItem {
            id: id.to_string(),
            bad: false,
        }
    }

    fn bad_item(id: &str) -> ScriptedItem {
        ScriptedItem {
            id: id.to_string(),
            bad: true,
        }
    }

    impl HarvestItem for ScriptedItem {
        fn item_id(&self) -> &str {
            &self.id
        }

        fn normalize(&self, source_key: &str) -> Result<NormalizedPost, HarvestError> {
            if self.bad {
                return Err(HarvestError::Deserialize {
                    context: format!("{source_key} item {}", self.id),
                    source: serde_json::Error::custom("scripted failure"),
                });
            }
            Ok(NormalizedPost {
                id: self.id.clone(),
                source_key: source_key.to_string(),
                author: None,
                content: Some(format!("post {}", self.id)),
                created_at: None,
                extra: BTreeMap::new(),
            })
        }
    }

    struct ScriptedFeed {
        key: String,
        latest: Option<ScriptedItem>,
        pages: Mutex<VecDeque<Vec<ScriptedItem>>>,
        repeat_page: Vec<ScriptedItem>,
        comments: bool,
    }

    impl ScriptedFeed {
        fn new(key: &str) -> Self {
            Self {
                key: key.to_string(),
                latest: None,
                pages: Mutex::new(VecDeque::new()),
                repeat_page: Vec::new(),
                comments: false,
            }
        }

        fn with_page(self, page: Vec<ScriptedItem>) -> Self {
            self.pages.lock().unwrap().push_back(page);
            self
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        type Item = ScriptedItem;

        fn source_key(&self) -> &str {
            &self.key
        }

        fn wants_comments(&self) -> bool {
            self.comments
        }

        async fn fetch_latest(&self) -> Result<Option<ScriptedItem>, HarvestError> {
            Ok(self.latest.clone())
        }

        async fn fetch_page(
            &self,
            _anchor: &str,
            _limit: u32,
            _direction: Direction,
        ) -> Result<Vec<ScriptedItem>, HarvestError> {
            let mut pages = self.pages.lock().unwrap();
            Ok(pages.pop_front().unwrap_or_else(|| self.repeat_page.clone()))
        }
    }

    fn params() -> HarvestParams {
        HarvestParams {
            stage: "test:posts".to_string(),
            direction: Direction::Newer,
            page_limit: 40,
            retry: RetryPolicy {
                max_retries: 0,
                backoff_base_ms: 0,
            },
            max_commit_attempts: 3,
        }
    }

    #[tokio::test]
    async fn first_tick_seeds_cursor_and_queues_seed_item() {
        let mut feed = ScriptedFeed::new("test:source");
        feed.latest = Some(item("100"));
        let store = MemoryStore::new();

        let report = harvest_tick(&feed, &store, &params()).await.unwrap();

        assert_eq!(report.status, TickStatus::Harvested);
        assert_eq!(report.queued, 1);
        assert_eq!(report.new_id.as_deref(), Some("100"));
        assert_eq!(store.cursor_version("test:source"), Some(0));

        let batch = store.pop_batch("test:posts", 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["id"], "100");
    }

    #[tokio::test]
    async fn unseeded_source_with_no_items_is_no_data() {
        let feed = ScriptedFeed::new("test:source");
        let store = MemoryStore::new();
        let result = harvest_tick(&feed, &store, &params()).await;
        assert!(matches!(result, Err(HarvestError::NoData { .. })));
        assert_eq!(store.cursor_version("test:source"), None);
    }

    #[tokio::test]
    async fn tick_advances_cursor_and_queues_batch_in_order() {
        let feed = ScriptedFeed::new("test:source").with_page(vec![
            item("101"),
            item("102"),
            item("103"),
            item("104"),
            item("105"),
        ]);
        let store = MemoryStore::new();
        store.seed("test:source", "100").await.unwrap();

        let report = harvest_tick(&feed, &store, &params()).await.unwrap();

        assert_eq!(report.status, TickStatus::Harvested);
        assert_eq!(report.fetched, 5);
        assert_eq!(report.queued, 5);
        assert_eq!(report.new_id.as_deref(), Some("105"));
        assert_eq!(report.commit_attempts, 1);
        assert_eq!(store.cursor_version("test:source"), Some(1));

        let batch = store.pop_batch("test:posts", 10).await.unwrap();
        let ids: Vec<&str> = batch.iter().filter_map(|v| v["id"].as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103", "104", "105"]);
    }

    #[tokio::test]
    async fn empty_page_is_empty_status_and_no_commit() {
        let feed = ScriptedFeed::new("test:source").with_page(Vec::new());
        let store = MemoryStore::new();
        store.seed("test:source", "100").await.unwrap();

        let report = harvest_tick(&feed, &store, &params()).await.unwrap();

        assert_eq!(report.status, TickStatus::Empty);
        assert_eq!(report.fetched, 0);
        assert!(report.new_id.is_none());
        assert_eq!(store.cursor_version("test:source"), Some(0));
        assert_eq!(WorkQueue::len(&store, "test:posts").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_empty_ticks_stay_empty() {
        let feed = ScriptedFeed::new("test:source");
        let store = MemoryStore::new();
        store.seed("test:source", "105").await.unwrap();

        for _ in 0..3 {
            let report = harvest_tick(&feed, &store, &params()).await.unwrap();
            assert_eq!(report.status, TickStatus::Empty);
        }
        assert_eq!(store.cursor_version("test:source"), Some(0));
    }

    #[tokio::test]
    async fn normalization_failures_are_skipped_without_stalling_the_cursor() {
        let feed = ScriptedFeed::new("test:source")
            .with_page(vec![item("101"), bad_item("102"), item("103")]);
        let store = MemoryStore::new();
        store.seed("test:source", "100").await.unwrap();

        let report = harvest_tick(&feed, &store, &params()).await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.queued, 2);
        assert_eq!(report.skipped, 1);
        // The boundary still moves past the malformed item.
        assert_eq!(report.new_id.as_deref(), Some("103"));
    }

    /// Wraps a real store but loses every CAS, as if another worker always
    /// commits first.
    struct AlwaysConflicting {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CursorStore for AlwaysConflicting {
        async fn read(
            &self,
            source_key: &str,
            direction: Direction,
        ) -> Result<Option<CursorRead>, DbError> {
            self.inner.read(source_key, direction).await
        }

        async fn seed(&self, source_key: &str, id: &str) -> Result<bool, DbError> {
            self.inner.seed(source_key, id).await
        }

        async fn commit(
            &self,
            _source_key: &str,
            _direction: Direction,
            _version: i64,
            _new_id: &str,
        ) -> Result<CommitOutcome, DbError> {
            Ok(CommitOutcome::Conflict)
        }
    }

    #[async_trait]
    impl WorkQueue for AlwaysConflicting {
        async fn push(&self, stage: &str, payload: &serde_json::Value) -> Result<(), DbError> {
            self.inner.push(stage, payload).await
        }

        async fn push_many(
            &self,
            stage: &str,
            payloads: &[serde_json::Value],
        ) -> Result<usize, DbError> {
            self.inner.push_many(stage, payloads).await
        }

        async fn pop_batch(
            &self,
            stage: &str,
            n: i64,
        ) -> Result<Vec<serde_json::Value>, DbError> {
            self.inner.pop_batch(stage, n).await
        }

        async fn len(&self, stage: &str) -> Result<i64, DbError> {
            self.inner.len(stage).await
        }
    }

    #[tokio::test]
    async fn contended_cursor_exhausts_bounded_attempts_and_queues_nothing() {
        let mut feed = ScriptedFeed::new("test:source");
        feed.repeat_page = vec![item("101")];
        let store = AlwaysConflicting {
            inner: MemoryStore::new(),
        };
        store.inner.seed("test:source", "100").await.unwrap();

        let result = harvest_tick(&feed, &store, &params()).await;

        match result {
            Err(HarvestError::ConflictExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected ConflictExhausted, got {other:?}"),
        }
        assert_eq!(WorkQueue::len(&store, "test:posts").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_failure_after_commit_is_not_reported_as_success() {
        let feed = ScriptedFeed::new("test:source").with_page(vec![item("101"), item("102")]);
        let store = MemoryStore::new();
        store.seed("test:source", "100").await.unwrap();
        store.fail_pushes(true);

        let result = harvest_tick(&feed, &store, &params()).await;

        match result {
            Err(HarvestError::CommitUnqueued { queued, total, .. }) => {
                assert_eq!(queued, 0);
                assert_eq!(total, 2);
            }
            other => panic!("expected CommitUnqueued, got {other:?}"),
        }
        // The cursor did advance; the caller must know the batch is lost.
        assert_eq!(store.cursor_version("test:source"), Some(1));
    }

    #[tokio::test]
    async fn comment_sources_feed_the_backlog() {
        let mut feed =
            ScriptedFeed::new("reddit:test").with_page(vec![item("t3_a"), item("t3_b")]);
        feed.comments = true;
        let store = MemoryStore::new();
        store.seed("reddit:test", "t3_0").await.unwrap();

        harvest_tick(&feed, &store, &params()).await.unwrap();

        let backlog = store.pop_batch(COMMENT_BACKLOG_STAGE, 10).await.unwrap();
        let ids: Vec<&str> = backlog
            .iter()
            .filter_map(|v| v["post_id"].as_str())
            .collect();
        assert_eq!(ids, vec!["t3_a", "t3_b"]);
    }

    enum CommentScript {
        Comments(Vec<ScriptedItem>),
        RateLimited,
        Broken,
    }

    struct ScriptedComments {
        script: CommentScript,
    }

    #[async_trait]
    impl CommentSource for ScriptedComments {
        type Item = ScriptedItem;

        fn source_key(&self) -> &str {
            "reddit:test"
        }

        async fn fetch_comments(&self, _post_id: &str) -> Result<Vec<ScriptedItem>, HarvestError> {
            match &self.script {
                CommentScript::Comments(items) => Ok(items.clone()),
                CommentScript::RateLimited => Err(HarvestError::RateLimited {
                    source_key: "reddit:test".to_string(),
                    retry_after_secs: Some(0),
                }),
                CommentScript::Broken => Err(HarvestError::UnexpectedStatus {
                    status: 404,
                    url: "u".to_string(),
                }),
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    #[tokio::test]
    async fn comment_tick_queues_normalized_comments() {
        let store = MemoryStore::new();
        store
            .push(COMMENT_BACKLOG_STAGE, &json!({"post_id": "t3_a"}))
            .await
            .unwrap();
        let source = ScriptedComments {
            script: CommentScript::Comments(vec![item("t1_x"), item("t1_y")]),
        };

        let report = comment_tick(&source, &store, 10, fast_retry()).await.unwrap();

        assert_eq!(report.posts_processed, 1);
        assert_eq!(report.comments_queued, 2);
        assert_eq!(report.requeued, 0);
        assert_eq!(
            WorkQueue::len(&store, REDDIT_COMMENTS_STAGE).await.unwrap(),
            2
        );
        assert_eq!(WorkQueue::len(&store, COMMENT_BACKLOG_STAGE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn comment_tick_requeues_remainder_on_rate_limit() {
        let store = MemoryStore::new();
        for id in ["t3_a", "t3_b", "t3_c"] {
            store
                .push(COMMENT_BACKLOG_STAGE, &json!({"post_id": id}))
                .await
                .unwrap();
        }
        let source = ScriptedComments {
            script: CommentScript::RateLimited,
        };

        let report = comment_tick(&source, &store, 10, fast_retry()).await.unwrap();

        assert_eq!(report.posts_processed, 0);
        assert_eq!(report.requeued, 3);
        assert_eq!(WorkQueue::len(&store, COMMENT_BACKLOG_STAGE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn comment_tick_skips_failing_posts_and_continues() {
        let store = MemoryStore::new();
        store
            .push(COMMENT_BACKLOG_STAGE, &json!({"post_id": "t3_gone"}))
            .await
            .unwrap();
        store.push(COMMENT_BACKLOG_STAGE, &json!({"nope": 1})).await.unwrap();
        let source = ScriptedComments {
            script: CommentScript::Broken,
        };

        let report = comment_tick(&source, &store, 10, fast_retry()).await.unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.requeued, 0);
        assert_eq!(WorkQueue::len(&store, COMMENT_BACKLOG_STAGE).await.unwrap(), 0);
    }
}

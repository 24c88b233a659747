//! Live integration tests for murmur-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/murmur-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory. Run with `cargo test -- --ignored` and a
//! `DATABASE_URL` pointing at a Postgres the harness may create databases on.

use murmur_core::Direction;
use murmur_db::{
    count_documents, get_cursor, get_document, CommitOutcome, CursorStore, DocumentSink,
    RoutingStore, StoredDocument, WorkQueue,
};
use serde_json::json;

fn doc(id: &str, content: &str) -> StoredDocument {
    StoredDocument {
        source_id: id.to_string(),
        author: Some("tester".to_string()),
        content: Some(content.to_string()),
        created_at: None,
        extra: json!({}),
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn cursor_seed_then_conflicting_commits(pool: sqlx::PgPool) {
    assert!(pool.seed("reddit:melbourne", "t3_100").await.unwrap());
    // Second seed is a no-op: first writer wins.
    assert!(!pool.seed("reddit:melbourne", "t3_999").await.unwrap());

    let read = pool
        .read("reddit:melbourne", Direction::Newer)
        .await
        .unwrap()
        .expect("cursor row should exist");
    assert_eq!(read.version, 0);
    assert_eq!(read.id, "t3_100");

    let won = pool
        .commit("reddit:melbourne", Direction::Newer, read.version, "t3_105")
        .await
        .unwrap();
    assert_eq!(won, CommitOutcome::Committed);

    // A racer holding the stale version must observe a conflict.
    let lost = pool
        .commit("reddit:melbourne", Direction::Newer, read.version, "t3_110")
        .await
        .unwrap();
    assert_eq!(lost, CommitOutcome::Conflict);

    let row = get_cursor(&pool, "reddit:melbourne").await.unwrap().unwrap();
    assert_eq!(row.max_id, "t3_105");
    assert_eq!(row.min_id, "t3_100", "older direction untouched");
    assert_eq!(row.version, 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn commit_directions_are_independent_columns(pool: sqlx::PgPool) {
    pool.seed("mastodon:example.social", "500").await.unwrap();

    let newer = pool
        .read("mastodon:example.social", Direction::Newer)
        .await
        .unwrap()
        .unwrap();
    pool.commit(
        "mastodon:example.social",
        Direction::Newer,
        newer.version,
        "510",
    )
    .await
    .unwrap();

    let older = pool
        .read("mastodon:example.social", Direction::Older)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(older.id, "500", "newer commit must not move min_id");
    let outcome = pool
        .commit(
            "mastodon:example.social",
            Direction::Older,
            older.version,
            "490",
        )
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Committed);

    let row = get_cursor(&pool, "mastodon:example.social")
        .await
        .unwrap()
        .unwrap();
    assert_eq!((row.min_id.as_str(), row.max_id.as_str()), ("490", "510"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn queue_pop_batch_removes_in_order(pool: sqlx::PgPool) {
    pool.push_many(
        "reddit:melbourne:posts",
        &[json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})],
    )
    .await
    .unwrap();
    assert_eq!(pool.len("reddit:melbourne:posts").await.unwrap(), 3);

    let batch = pool.pop_batch("reddit:melbourne:posts", 2).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(pool.len("reddit:melbourne:posts").await.unwrap(), 1);

    // Unknown stage pops nothing.
    assert!(pool.pop_batch("no-such-stage", 5).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn sink_upsert_is_idempotent_by_source_id(pool: sqlx::PgPool) {
    let report = pool
        .bulk_upsert("reddit-posts", &[doc("t3_1", "first version")])
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let report = pool
        .bulk_upsert("reddit-posts", &[doc("t3_1", "second version")])
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(count_documents(&pool, "reddit-posts").await.unwrap(), 1);
    let row = get_document(&pool, "reddit-posts", "t3_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.content.as_deref(), Some("second version"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn routing_marks_and_copies_once(pool: sqlx::PgPool) {
    pool.bulk_upsert(
        "mastodon-posts",
        &[
            doc("1", "talking about the election today"),
            doc("2", "nothing relevant here"),
        ],
    )
    .await
    .unwrap();

    let keywords = vec!["election".to_string()];
    let matches = pool
        .unrouted_matches("mastodon-posts", "election-posts", &keywords, 100)
        .await
        .unwrap();
    assert_eq!(matches, vec!["1".to_string()]);

    pool.copy_document("mastodon-posts", "election-posts", "1")
        .await
        .unwrap();
    pool.mark_routed("mastodon-posts", "1", "election-posts")
        .await
        .unwrap();

    assert_eq!(count_documents(&pool, "election-posts").await.unwrap(), 1);
    let again = pool
        .unrouted_matches("mastodon-posts", "election-posts", &keywords, 100)
        .await
        .unwrap();
    assert!(again.is_empty(), "marked document must not match again");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn annotation_predicate_excludes_labelled_docs(pool: sqlx::PgPool) {
    use murmur_db::AnnotationStore;

    pool.bulk_upsert("election-posts", &[doc("1", "great news"), doc("2", "bad news")])
        .await
        .unwrap();

    let pending = pool.unannotated("election-posts", 10).await.unwrap();
    assert_eq!(pending.len(), 2);

    pool.write_annotation("election-posts", "1", 0.1, 0.2, 0.7, "positive")
        .await
        .unwrap();

    let pending = pool.unannotated("election-posts", 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source_id, "2");

    let row = get_document(&pool, "election-posts", "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.sentiment_label.as_deref(), Some("positive"));
    assert!(row.sentiment_positive.unwrap() > 0.6);
}

//! Queue-to-store pre-processor.
//!
//! Pops a batch of raw payloads from one queue stage, validates and shapes
//! them into documents, and bulk-upserts them into the sink index. Popping
//! and storing are separate steps, so a crash in between loses at most one
//! batch; it never duplicates documents because the upsert is keyed by
//! source id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use murmur_db::{DocumentSink, StoredDocument, WorkQueue};

use crate::error::PipelineError;

/// What one drain pass accomplished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    /// Payloads taken off the queue.
    pub popped: usize,
    /// Documents the sink accepted.
    pub stored: usize,
    /// Payloads dropped by validation (logged individually).
    pub invalid: usize,
    /// Documents the sink rejected, with per-id reasons.
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

/// Fields lifted out of the payload into dedicated document columns;
/// everything else stays in `extra`.
const LIFTED_FIELDS: &[&str] = &["id", "author", "content", "created_at"];

/// Validate one raw payload into a document.
///
/// A payload must be a JSON object with a non-empty string `id`. Anything
/// else is malformed and gets dropped, not stored half-shaped.
fn shape_document(payload: &Value) -> Option<StoredDocument> {
    let object = payload.as_object()?;
    let source_id = object.get("id")?.as_str().filter(|id| !id.is_empty())?;

    let created_at = object
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(err) => {
                tracing::warn!(
                    source_id,
                    raw,
                    error = %err,
                    "unparsable created_at, storing document without timestamp"
                );
                None
            }
        });

    let extra: serde_json::Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !LIFTED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Some(StoredDocument {
        source_id: source_id.to_string(),
        author: object
            .get("author")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        content: object
            .get("content")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        created_at,
        extra: Value::Object(extra),
    })
}

/// Drain up to `batch_size` payloads from `stage` into `index`.
///
/// Malformed payloads are dropped with a warning. Sink rejections are
/// per-document: the rest of the batch still lands, and each rejection is
/// reported with its reason.
///
/// # Errors
///
/// Returns [`PipelineError::Store`] if the queue pop or the bulk upsert
/// fails as a whole.
pub async fn drain<Q, S>(
    queue: &Q,
    sink: &S,
    stage: &str,
    index: &str,
    batch_size: i64,
) -> Result<DrainReport, PipelineError>
where
    Q: WorkQueue,
    S: DocumentSink,
{
    let payloads = queue.pop_batch(stage, batch_size).await?;
    let mut report = DrainReport {
        popped: payloads.len(),
        ..DrainReport::default()
    };

    let mut documents = Vec::with_capacity(payloads.len());
    for payload in &payloads {
        match shape_document(payload) {
            Some(doc) => documents.push(doc),
            None => {
                report.invalid += 1;
                tracing::warn!(stage, %payload, "dropping malformed queue payload");
            }
        }
    }

    if !documents.is_empty() {
        let upsert = sink.bulk_upsert(index, &documents).await?;
        report.stored = upsert.succeeded;
        report.failed = upsert.failed;
        report.failures = upsert.failures;
    }

    tracing::info!(
        stage,
        index,
        popped = report.popped,
        stored = report.stored,
        invalid = report.invalid,
        failed = report.failed,
        "drain pass complete"
    );
    Ok(report)
}

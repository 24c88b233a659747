//! In-place sentiment annotation of stored documents.
//!
//! Resumption is driven by the store itself: a document with no sentiment
//! label is pending, so the worker needs no cursor of its own and can be
//! stopped and restarted at any point. Documents without usable text are
//! labelled `unscored` so a batch can never get stuck on them.

use serde::Serialize;

use murmur_db::AnnotationStore;

use crate::error::SentimentError;
use crate::scorer::Scorer;

/// Label written to documents whose content cannot be scored at all.
pub const UNSCORED_LABEL: &str = "unscored";

/// What one annotation pass accomplished.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnnotateReport {
    /// Pending documents pulled from the store.
    pub scanned: usize,
    /// Documents that received class scores and a label.
    pub annotated: usize,
    /// Documents with no text, marked `unscored`.
    pub skipped: usize,
    /// Documents whose scoring or annotation write failed, left pending
    /// for the next pass.
    pub failed: usize,
}

/// Annotate up to `batch_size` pending documents in `index`.
///
/// Scoring failures and per-document write failures leave the document
/// pending and are counted in `failed`; the pass continues with the rest
/// of the batch. A pass over a fully annotated index scans zero documents.
///
/// # Errors
///
/// Returns [`SentimentError::Store`] only if the pending batch cannot be
/// selected. Per-document scorer and write failures do not abort the pass.
pub async fn annotate<St, Sc>(
    store: &St,
    scorer: &Sc,
    index: &str,
    batch_size: i64,
) -> Result<AnnotateReport, SentimentError>
where
    St: AnnotationStore,
    Sc: Scorer + ?Sized,
{
    let pending = store.unannotated(index, batch_size).await?;
    let mut report = AnnotateReport {
        scanned: pending.len(),
        ..AnnotateReport::default()
    };

    for doc in pending {
        let text = doc.content.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            match store
                .write_annotation(index, &doc.source_id, 0.0, 0.0, 0.0, UNSCORED_LABEL)
                .await
            {
                Ok(()) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        index,
                        source_id = %doc.source_id,
                        error = %err,
                        "annotation write failed, leaving document pending"
                    );
                }
            }
            continue;
        }

        match scorer.score(text).await {
            Ok(scores) => {
                let written = store
                    .write_annotation(
                        index,
                        &doc.source_id,
                        scores.negative,
                        scores.neutral,
                        scores.positive,
                        scores.label(),
                    )
                    .await;
                match written {
                    Ok(()) => report.annotated += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(
                            index,
                            source_id = %doc.source_id,
                            error = %err,
                            "annotation write failed, leaving document pending"
                        );
                    }
                }
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    index,
                    source_id = %doc.source_id,
                    error = %err,
                    "scoring failed, leaving document pending"
                );
            }
        }
    }

    tracing::info!(
        index,
        scanned = report.scanned,
        annotated = report.annotated,
        skipped = report.skipped,
        failed = report.failed,
        "annotation pass complete"
    );
    Ok(report)
}

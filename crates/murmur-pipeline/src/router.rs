//! Keyword routing between logical indexes.
//!
//! Copies documents whose content matches any configured keyword from one
//! index into another, marking each source document with a per-destination
//! routed flag so re-runs skip it. The copy happens before the mark: a
//! crash in between re-copies on the next run, which the keyed upsert
//! absorbs.

use serde::Serialize;

use murmur_core::KeywordRoute;
use murmur_db::RoutingStore;

use crate::error::PipelineError;

/// What one routing pass accomplished.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RouteReport {
    /// Unrouted documents that matched a keyword this pass.
    pub matched: usize,
    /// Documents copied and marked.
    pub copied: usize,
    /// Documents whose copy or mark failed, left unmarked for retry.
    pub failed: usize,
}

/// Run one bounded routing pass for `route`.
///
/// At most `route.max_docs` documents move per pass; a backlog larger than
/// that drains across successive passes.
///
/// # Errors
///
/// Returns [`PipelineError::Store`] if the match query fails. Per-document
/// copy failures are counted and logged, not fatal.
pub async fn route<St>(store: &St, route: &KeywordRoute) -> Result<RouteReport, PipelineError>
where
    St: RoutingStore,
{
    let matches = store
        .unrouted_matches(
            &route.from_index,
            &route.to_index,
            &route.keywords,
            route.max_docs,
        )
        .await?;
    let mut report = RouteReport {
        matched: matches.len(),
        ..RouteReport::default()
    };

    for source_id in &matches {
        let outcome = async {
            store
                .copy_document(&route.from_index, &route.to_index, source_id)
                .await?;
            store
                .mark_routed(&route.from_index, source_id, &route.to_index)
                .await
        }
        .await;

        match outcome {
            Ok(()) => report.copied += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    from_index = %route.from_index,
                    to_index = %route.to_index,
                    source_id = %source_id,
                    error = %err,
                    "routing copy failed, document stays unrouted"
                );
            }
        }
    }

    tracing::info!(
        from_index = %route.from_index,
        to_index = %route.to_index,
        matched = report.matched,
        copied = report.copied,
        failed = report.failed,
        "routing pass complete"
    );
    Ok(report)
}

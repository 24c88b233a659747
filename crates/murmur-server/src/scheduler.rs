//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring pipeline jobs: harvesting, comment-backlog draining,
//! pre-processing, keyword routing, and sentiment annotation. Every job is
//! a thin wrapper over [`JobContext`], the same driving logic the trigger
//! endpoints use, so a manual trigger and a scheduled run behave
//! identically.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use murmur_core::Direction;

use crate::jobs::JobContext;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process — dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(ctx: Arc<JobContext>) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_harvest_job(&scheduler, Arc::clone(&ctx)).await?;
    register_comments_job(&scheduler, Arc::clone(&ctx)).await?;
    register_preprocess_job(&scheduler, Arc::clone(&ctx)).await?;
    register_routes_job(&scheduler, Arc::clone(&ctx)).await?;
    register_annotate_job(&scheduler, ctx).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Every 5 minutes, tick each configured source toward the live edge.
async fn register_harvest_job(
    scheduler: &JobScheduler,
    ctx: Arc<JobContext>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 */5 * * * *", move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            tracing::info!("scheduler: starting harvest pass");
            ctx.harvest_all(Direction::Newer).await;
            tracing::info!("scheduler: harvest pass complete");
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

/// Every 2 minutes, drain one batch of the comment backlog.
async fn register_comments_job(
    scheduler: &JobScheduler,
    ctx: Arc<JobContext>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 */2 * * * *", move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            match ctx.comment_backlog_tick().await {
                Ok(report) => {
                    tracing::info!(
                        posts = report.posts_processed,
                        comments = report.comments_queued,
                        requeued = report.requeued,
                        "scheduler: comment backlog pass complete"
                    );
                }
                Err(e) => tracing::error!(error = %e, "scheduler: comment backlog pass failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

/// Every minute, at :30, drain one batch from every queue stage.
async fn register_preprocess_job(
    scheduler: &JobScheduler,
    ctx: Arc<JobContext>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("30 * * * * *", move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            match ctx.preprocess_all().await {
                Ok(outcomes) => {
                    let stored: usize = outcomes.iter().map(|o| o.report.stored).sum();
                    if stored > 0 {
                        tracing::info!(stored, "scheduler: pre-process pass complete");
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler: pre-process pass failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

/// Every 10 minutes, run one bounded pass of every keyword route.
async fn register_routes_job(
    scheduler: &JobScheduler,
    ctx: Arc<JobContext>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 */10 * * * *", move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            match ctx.run_routes().await {
                Ok(outcomes) => {
                    let copied: usize = outcomes.iter().map(|o| o.report.copied).sum();
                    if copied > 0 {
                        tracing::info!(copied, "scheduler: routing pass complete");
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler: routing pass failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

/// Every 5 minutes, offset from the harvest job, annotate pending documents.
async fn register_annotate_job(
    scheduler: &JobScheduler,
    ctx: Arc<JobContext>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 3-59/5 * * * *", move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            match ctx.annotate_all().await {
                Ok(outcomes) => {
                    let annotated: usize = outcomes.iter().map(|o| o.report.annotated).sum();
                    if annotated > 0 {
                        tracing::info!(annotated, "scheduler: annotation pass complete");
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler: annotation pass failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

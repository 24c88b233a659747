//! Shared driving logic for the scheduler and the trigger endpoints.
//!
//! Both surfaces run the same operations: one harvest tick per configured
//! source, a comment-backlog tick, queue draining, keyword routing, and an
//! annotation pass. [`JobContext`] owns the pool and configuration and is
//! cloned into every scheduled job and request handler.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;

use murmur_core::{
    AppConfig, Direction, MastodonSourceConfig, RedditSourceConfig, SourcesConfig,
    COMMENT_BACKLOG_STAGE, REDDIT_COMMENTS_INDEX, REDDIT_COMMENTS_STAGE,
};
use murmur_harvest::{
    comment_tick, harvest_tick, CommentReport, HarvestError, HarvestParams, MastodonSource,
    RedditCredentials, RedditSource, RetryPolicy, TickReport,
};
use murmur_pipeline::{drain, route, DrainReport, PipelineError, RouteReport};
use murmur_sentiment::{annotate, AnnotateReport, HttpScorer, LexiconScorer, Scorer, SentimentError};

/// One drained stage in a pre-processing pass.
#[derive(Debug, Serialize)]
pub struct StageDrain {
    pub stage: String,
    pub index: String,
    #[serde(flatten)]
    pub report: DrainReport,
}

/// One executed route in a routing pass.
#[derive(Debug, Serialize)]
pub struct RouteOutcome {
    pub from_index: String,
    pub to_index: String,
    #[serde(flatten)]
    pub report: RouteReport,
}

/// One annotated index in an annotation pass.
#[derive(Debug, Serialize)]
pub struct IndexAnnotation {
    pub index: String,
    #[serde(flatten)]
    pub report: AnnotateReport,
}

#[derive(Clone)]
pub struct JobContext {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub sources: Arc<SourcesConfig>,
}

impl JobContext {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.harvest_max_retries,
            backoff_base_ms: self.config.harvest_backoff_base_ms,
        }
    }

    fn harvest_params(&self, stage: String, page_limit: u32, direction: Direction) -> HarvestParams {
        HarvestParams {
            stage,
            direction,
            page_limit,
            retry: self.retry_policy(),
            max_commit_attempts: self.config.harvest_max_commit_attempts,
        }
    }

    fn reddit_credentials(&self) -> Result<RedditCredentials, HarvestError> {
        match (&self.config.reddit_client_id, &self.config.reddit_client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(RedditCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                user_agent: self.config.user_agent.clone(),
            }),
            _ => Err(HarvestError::Config {
                source_key: "reddit".to_string(),
                reason: "REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET are required".to_string(),
            }),
        }
    }

    async fn reddit_source(&self, cfg: &RedditSourceConfig) -> Result<RedditSource, HarvestError> {
        let credentials = self.reddit_credentials()?;
        RedditSource::connect(&credentials, &cfg.subreddit, self.config.fetch_timeout_secs).await
    }

    fn mastodon_source(&self, cfg: &MastodonSourceConfig) -> Result<MastodonSource, HarvestError> {
        MastodonSource::new(
            &cfg.server,
            &cfg.source_key(),
            &self.config.user_agent,
            self.config.fetch_timeout_secs,
        )
    }

    /// Run one harvest tick for a configured subreddit.
    ///
    /// # Errors
    ///
    /// Propagates [`HarvestError`] from the source client or the tick.
    pub async fn harvest_reddit(
        &self,
        cfg: &RedditSourceConfig,
        direction: Direction,
    ) -> Result<TickReport, HarvestError> {
        let source = self.reddit_source(cfg).await?;
        let params = self.harvest_params(cfg.posts_stage(), cfg.page_limit, direction);
        harvest_tick(&source, &self.pool, &params).await
    }

    /// Run one harvest tick for a configured Mastodon server.
    ///
    /// # Errors
    ///
    /// Propagates [`HarvestError`] from the source client or the tick.
    pub async fn harvest_mastodon(
        &self,
        cfg: &MastodonSourceConfig,
        direction: Direction,
    ) -> Result<TickReport, HarvestError> {
        let source = self.mastodon_source(cfg)?;
        let params = self.harvest_params(cfg.posts_stage(), cfg.page_limit, direction);
        harvest_tick(&source, &self.pool, &params).await
    }

    /// Tick every configured source once, logging failures per source.
    pub async fn harvest_all(&self, direction: Direction) {
        for cfg in &self.sources.reddit {
            match self.harvest_reddit(cfg, direction).await {
                Ok(report) => {
                    tracing::debug!(source_key = %cfg.source_key(), status = ?report.status, "harvest tick done");
                }
                Err(e) => {
                    tracing::error!(source_key = %cfg.source_key(), error = %e, "harvest tick failed");
                }
            }
        }
        for cfg in &self.sources.mastodon {
            match self.harvest_mastodon(cfg, direction).await {
                Ok(report) => {
                    tracing::debug!(source_key = %cfg.source_key(), status = ?report.status, "harvest tick done");
                }
                Err(e) => {
                    tracing::error!(source_key = %cfg.source_key(), error = %e, "harvest tick failed");
                }
            }
        }
    }

    /// Drain one batch of the comment backlog through the first configured
    /// subreddit's API client. Reports an empty pass when no subreddits are
    /// configured.
    ///
    /// # Errors
    ///
    /// Propagates [`HarvestError`] from the source client or the tick.
    pub async fn comment_backlog_tick(&self) -> Result<CommentReport, HarvestError> {
        let Some(cfg) = self.sources.reddit.first() else {
            return Ok(CommentReport::default());
        };
        let source = self.reddit_source(cfg).await?;
        comment_tick(
            &source,
            &self.pool,
            self.config.preprocess_batch_size,
            self.retry_policy(),
        )
        .await
    }

    /// Every queue stage this deployment uses, for the status endpoint.
    pub fn known_stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self
            .drain_targets()
            .into_iter()
            .map(|(stage, _)| stage)
            .collect();
        if !self.sources.reddit.is_empty() {
            stages.push(COMMENT_BACKLOG_STAGE.to_string());
        }
        stages
    }

    /// `(stage, index)` pairs the pre-processor drains, derived from the
    /// source configuration plus the comment stage.
    fn drain_targets(&self) -> Vec<(String, String)> {
        let mut targets: Vec<(String, String)> = self
            .sources
            .reddit
            .iter()
            .map(|cfg| (cfg.posts_stage(), cfg.index.clone()))
            .chain(
                self.sources
                    .mastodon
                    .iter()
                    .map(|cfg| (cfg.posts_stage(), cfg.index.clone())),
            )
            .collect();
        if !self.sources.reddit.is_empty() {
            targets.push((
                REDDIT_COMMENTS_STAGE.to_string(),
                REDDIT_COMMENTS_INDEX.to_string(),
            ));
        }
        targets
    }

    /// Drain one batch from every configured stage into its index.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a queue pop or bulk upsert fails.
    pub async fn preprocess_all(&self) -> Result<Vec<StageDrain>, PipelineError> {
        let mut outcomes = Vec::new();
        for (stage, index) in self.drain_targets() {
            let report = drain(
                &self.pool,
                &self.pool,
                &stage,
                &index,
                self.config.preprocess_batch_size,
            )
            .await?;
            outcomes.push(StageDrain {
                stage,
                index,
                report,
            });
        }
        Ok(outcomes)
    }

    /// Run one bounded pass of every configured keyword route.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a match query fails.
    pub async fn run_routes(&self) -> Result<Vec<RouteOutcome>, PipelineError> {
        let mut outcomes = Vec::new();
        for keyword_route in &self.sources.routes {
            let report = route(&self.pool, keyword_route).await?;
            outcomes.push(RouteOutcome {
                from_index: keyword_route.from_index.clone(),
                to_index: keyword_route.to_index.clone(),
                report,
            });
        }
        Ok(outcomes)
    }

    fn scorer(&self) -> Box<dyn Scorer> {
        match &self.config.scoring_url {
            Some(url) => Box::new(HttpScorer::new(url)),
            None => Box::new(LexiconScorer),
        }
    }

    /// Every index that receives documents, deduplicated: harvest indexes,
    /// the comments index, and route destinations.
    pub fn annotate_indexes(&self) -> Vec<String> {
        let mut indexes: Vec<String> = self
            .sources
            .reddit
            .iter()
            .map(|cfg| cfg.index.clone())
            .chain(self.sources.mastodon.iter().map(|cfg| cfg.index.clone()))
            .chain(self.sources.routes.iter().map(|r| r.to_index.clone()))
            .collect();
        if !self.sources.reddit.is_empty() {
            indexes.push(REDDIT_COMMENTS_INDEX.to_string());
        }
        indexes.sort();
        indexes.dedup();
        indexes
    }

    /// Run one annotation pass over every index.
    ///
    /// # Errors
    ///
    /// Returns [`SentimentError::Store`] if the document store fails.
    pub async fn annotate_all(&self) -> Result<Vec<IndexAnnotation>, SentimentError> {
        let scorer = self.scorer();
        let mut outcomes = Vec::new();
        for index in self.annotate_indexes() {
            let report = annotate(
                &self.pool,
                scorer.as_ref(),
                &index,
                self.config.annotate_batch_size,
            )
            .await?;
            outcomes.push(IndexAnnotation { index, report });
        }
        Ok(outcomes)
    }
}

//! Command implementations: load config, wire sources, run one pass, print
//! the resulting report as JSON so runs are scriptable.

use std::sync::Arc;

use anyhow::Context as _;
use sqlx::PgPool;

use murmur_core::{
    AppConfig, Direction, MastodonSourceConfig, RedditSourceConfig, SourcesConfig,
    COMMENT_BACKLOG_STAGE, REDDIT_COMMENTS_INDEX, REDDIT_COMMENTS_STAGE,
};
use murmur_db::WorkQueue;
use murmur_harvest::{
    comment_tick, harvest_tick, HarvestParams, MastodonSource, RedditCredentials, RedditSource,
    RetryPolicy,
};
use murmur_sentiment::{HttpScorer, LexiconScorer, Scorer};

/// Loaded configuration plus a connected pool, shared by every command.
pub struct Context {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub sources: Arc<SourcesConfig>,
}

impl Context {
    /// Load config and sources, connect the pool.
    ///
    /// # Errors
    ///
    /// Fails when configuration is invalid or the database is unreachable.
    pub async fn load() -> anyhow::Result<Self> {
        let config = Arc::new(murmur_core::load_app_config()?);
        let sources = Arc::new(
            SourcesConfig::from_path(&config.sources_path)
                .context("failed to load sources config")?,
        );
        let pool_config = murmur_db::PoolConfig::from_app_config(&config);
        let pool = murmur_db::connect_pool(&config.database_url, pool_config)
            .await
            .context("failed to connect to the database")?;
        Ok(Self {
            pool,
            config,
            sources,
        })
    }

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

    fn reddit_credentials(&self) -> anyhow::Result<RedditCredentials> {
        match (&self.config.reddit_client_id, &self.config.reddit_client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(RedditCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                user_agent: self.config.user_agent.clone(),
            }),
            _ => anyhow::bail!("REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET are required"),
        }
    }

    async fn reddit_source(&self, cfg: &RedditSourceConfig) -> anyhow::Result<RedditSource> {
        let credentials = self.reddit_credentials()?;
        Ok(
            RedditSource::connect(&credentials, &cfg.subreddit, self.config.fetch_timeout_secs)
                .await?,
        )
    }

    fn mastodon_source(&self, cfg: &MastodonSourceConfig) -> anyhow::Result<MastodonSource> {
        Ok(MastodonSource::new(
            &cfg.server,
            &cfg.source_key(),
            &self.config.user_agent,
            self.config.fetch_timeout_secs,
        )?)
    }

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

    fn annotate_indexes(&self) -> Vec<String> {
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

    fn scorer(&self) -> Box<dyn Scorer> {
        match &self.config.scoring_url {
            Some(url) => Box::new(HttpScorer::new(url)),
            None => Box::new(LexiconScorer),
        }
    }
}

fn print_report<T: serde::Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub async fn migrate(ctx: &Context) -> anyhow::Result<()> {
    murmur_db::run_migrations(&ctx.pool).await?;
    println!("migrations applied");
    Ok(())
}

pub async fn harvest(
    ctx: &Context,
    source_key: Option<&str>,
    direction: &str,
) -> anyhow::Result<()> {
    let direction: Direction = direction
        .parse()
        .map_err(|reason: String| anyhow::anyhow!(reason))?;

    let mut matched = false;
    for cfg in &ctx.sources.reddit {
        if source_key.is_some_and(|key| key != cfg.source_key()) {
            continue;
        }
        matched = true;
        let source = ctx.reddit_source(cfg).await?;
        let params = ctx.harvest_params(cfg.posts_stage(), cfg.page_limit, direction);
        let report = harvest_tick(&source, &ctx.pool, &params).await?;
        print_report(&report)?;
    }
    for cfg in &ctx.sources.mastodon {
        if source_key.is_some_and(|key| key != cfg.source_key()) {
            continue;
        }
        matched = true;
        let source = ctx.mastodon_source(cfg)?;
        let params = ctx.harvest_params(cfg.posts_stage(), cfg.page_limit, direction);
        let report = harvest_tick(&source, &ctx.pool, &params).await?;
        print_report(&report)?;
    }

    if let Some(key) = source_key {
        anyhow::ensure!(matched, "source {key} is not configured");
    }
    Ok(())
}

pub async fn comments(ctx: &Context) -> anyhow::Result<()> {
    let Some(cfg) = ctx.sources.reddit.first() else {
        anyhow::bail!("no reddit sources configured");
    };
    let source = ctx.reddit_source(cfg).await?;
    let report = comment_tick(
        &source,
        &ctx.pool,
        ctx.config.preprocess_batch_size,
        ctx.retry_policy(),
    )
    .await?;
    print_report(&report)
}

pub async fn preprocess(ctx: &Context) -> anyhow::Result<()> {
    for (stage, index) in ctx.drain_targets() {
        let report = murmur_pipeline::drain(
            &ctx.pool,
            &ctx.pool,
            &stage,
            &index,
            ctx.config.preprocess_batch_size,
        )
        .await?;
        println!("{stage} -> {index}");
        print_report(&report)?;
    }
    Ok(())
}

pub async fn routes(ctx: &Context) -> anyhow::Result<()> {
    for keyword_route in &ctx.sources.routes {
        let report = murmur_pipeline::route(&ctx.pool, keyword_route).await?;
        println!(
            "{} -> {}",
            keyword_route.from_index, keyword_route.to_index
        );
        print_report(&report)?;
    }
    Ok(())
}

pub async fn annotate(ctx: &Context, index: Option<&str>) -> anyhow::Result<()> {
    let scorer = ctx.scorer();
    let indexes = match index {
        Some(one) => vec![one.to_string()],
        None => ctx.annotate_indexes(),
    };
    for index in indexes {
        let report = murmur_sentiment::annotate(
            &ctx.pool,
            scorer.as_ref(),
            &index,
            ctx.config.annotate_batch_size,
        )
        .await?;
        println!("{index}");
        print_report(&report)?;
    }
    Ok(())
}

pub async fn cursors(ctx: &Context) -> anyhow::Result<()> {
    let rows = murmur_db::list_cursors(&ctx.pool).await?;
    if rows.is_empty() {
        println!("no cursors seeded yet");
        return Ok(());
    }
    for row in rows {
        println!(
            "{}  min={}  max={}  v{}  updated {}",
            row.source_key, row.min_id, row.max_id, row.version, row.updated_at
        );
    }
    Ok(())
}

pub async fn queues(ctx: &Context) -> anyhow::Result<()> {
    let mut stages = ctx.drain_targets();
    if !ctx.sources.reddit.is_empty() {
        stages.push((COMMENT_BACKLOG_STAGE.to_string(), String::new()));
    }
    for (stage, _) in stages {
        let depth = ctx.pool.len(&stage).await?;
        println!("{stage}  {depth}");
    }
    Ok(())
}

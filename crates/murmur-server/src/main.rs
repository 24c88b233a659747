mod api;
mod jobs;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState};
use crate::jobs::JobContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(murmur_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let sources = Arc::new(murmur_core::SourcesConfig::from_path(&config.sources_path)?);
    tracing::info!(
        reddit = sources.reddit.len(),
        mastodon = sources.mastodon.len(),
        routes = sources.routes.len(),
        "loaded sources config"
    );

    let pool_config = murmur_db::PoolConfig::from_app_config(&config);
    let pool = murmur_db::connect_pool(&config.database_url, pool_config).await?;
    murmur_db::run_migrations(&pool).await?;

    let ctx = Arc::new(JobContext {
        pool,
        config: Arc::clone(&config),
        sources,
    });

    let _scheduler = scheduler::build_scheduler(Arc::clone(&ctx)).await?;

    let app = build_app(AppState { ctx });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

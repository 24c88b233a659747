mod run;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "murmur-cli")]
#[command(about = "Operational commands for the murmuration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations.
    Migrate,
    /// Run one harvest tick for one source, or all configured sources.
    Harvest {
        /// Cursor key, e.g. `reddit:melbourne` or `mastodon:mastodon.au`.
        /// Omit to tick every configured source.
        source_key: Option<String>,
        /// Pagination direction: `older` or `newer`.
        #[arg(long, default_value = "newer")]
        direction: String,
    },
    /// Drain one batch of the comment backlog.
    Comments,
    /// Drain one batch from every queue stage into its index.
    Preprocess,
    /// Run one bounded pass of every keyword route.
    Route,
    /// Run one annotation pass over every index (or one, if given).
    Annotate { index: Option<String> },
    /// Print every source cursor with its version.
    Cursors,
    /// Print the depth of every known queue stage.
    Queues,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let ctx = run::Context::load().await?;

    match cli.command {
        Commands::Migrate => run::migrate(&ctx).await,
        Commands::Harvest {
            source_key,
            direction,
        } => run::harvest(&ctx, source_key.as_deref(), &direction).await,
        Commands::Comments => run::comments(&ctx).await,
        Commands::Preprocess => run::preprocess(&ctx).await,
        Commands::Route => run::routes(&ctx).await,
        Commands::Annotate { index } => run::annotate(&ctx, index.as_deref()).await,
        Commands::Cursors => run::cursors(&ctx).await,
        Commands::Queues => run::queues(&ctx).await,
    }
}

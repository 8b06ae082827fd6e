use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fossick_github::{SearchClient, SearchConfig};
use fossick_storage::RepoStore;
use fossick_sync::{Config, Refresher, Scheduler};
use fossick_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fossick")]
#[command(about = "Finds and scores potentially-abandoned open-source repositories")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run migrations, the background scheduler, and the HTTP API (default).
    Serve,
    /// Run a single refresh cycle and exit.
    Sync,
    /// Apply the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            let pool = fossick_storage::connect(&config.database_url).await?;
            fossick_storage::migrate(&pool).await?;
        }
        Commands::Sync => {
            let pool = fossick_storage::connect(&config.database_url).await?;
            fossick_storage::migrate(&pool).await?;
            let store = RepoStore::new(pool);
            let refresher = build_refresher(&config, store)?;
            match refresher.run_unconditional().await {
                Some(outcome) => println!(
                    "sync complete: run_id={} fetched={} upserted={} failed={} rate_limited={}",
                    outcome.run_id,
                    outcome.fetched,
                    outcome.upserted,
                    outcome.failed,
                    outcome.rate_limited
                ),
                None => println!("sync skipped: refresh already in progress"),
            }
        }
        Commands::Serve => {
            let pool = fossick_storage::connect(&config.database_url).await?;
            fossick_storage::migrate(&pool).await?;
            let store = RepoStore::new(pool);
            let refresher = Arc::new(build_refresher(&config, store.clone())?);

            Scheduler::new(Arc::clone(&refresher), store.clone(), config.refresh_interval)
                .start()
                .await;

            info!(port = config.port, "starting server");
            fossick_web::serve(AppState { store, refresher }, config.port).await?;
        }
    }

    Ok(())
}

fn build_refresher(config: &Config, store: RepoStore) -> Result<Refresher> {
    let source = SearchClient::new(SearchConfig {
        token: config.github_token.clone(),
        user_agent: config.user_agent.clone(),
        timeout: config.http_timeout,
    })?;
    Ok(Refresher::new(
        config.refresh_cooldown,
        Arc::new(source),
        Arc::new(store),
    ))
}

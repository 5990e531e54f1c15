use clap::{Parser, Subcommand};
use pgsync_config::Config;
use std::path::PathBuf;
use sync_service::services::SyncEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgsync", about = "Incremental Postgres to document-index replicator")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "CONFIG_FILE", default_value = "/app/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream live row changes into the targets until terminated
    Listen,
    /// Reindex every configured index, then exit
    Index,
    /// Reserved
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    let engine = SyncEngine::from_config(&config).await?;
    engine.prepare().await?;

    match cli.command {
        Command::Listen => engine.listen().await?,
        Command::Index => {
            engine.full_reindex().await?;
            info!("Full reindex finished");
        }
        Command::Stats => anyhow::bail!("Not implemented"),
    }
    Ok(())
}

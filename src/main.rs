use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ludorush::config::Config;
use ludorush::matchmaking::MatchmakingQueue;
use ludorush::persistence::InMemoryRepository;
use ludorush::registry::GameRegistry;
use ludorush::transport::ws::{self, AppState};
use ludorush::wallet::WalletLedger;
use ludorush::Result;

#[derive(Debug, Parser)]
#[command(name = "ludorush", version, about = "Authoritative Ludo game server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging (overrides the configured log level)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        port = config.server.listen_port,
        roll_timeout = ?config.timing.roll_timeout,
        reconnect_window = ?config.timing.reconnect_window,
        "starting ludorush"
    );

    // Single-node wiring; swap the repository for a SQL-backed
    // implementation in a real deployment.
    let repository = Arc::new(InMemoryRepository::new());
    let wallet = Arc::new(WalletLedger::new(repository.clone()));
    let registry = GameRegistry::new(wallet.clone(), repository.clone(), config.timing.clone());
    let matchmaking = MatchmakingQueue::new(
        wallet.clone(),
        registry.clone(),
        config.matchmaking.clone(),
    );

    ws::serve(
        &config,
        AppState {
            registry,
            matchmaking,
        },
    )
    .await
}

//! Tagboard CLI
//!
//! Command-line interface for the Tagboard mention tracker

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tagboard_config::Config;
use tagboard_core::TagboardRuntime;
use tagboard_storage::MentionStore;
use tagboard_telegram::TelegramAdapter;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tagboard")]
#[command(about = "Telegram mention leaderboard bot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground
    Start,

    /// Print a chat's mention leaderboard from the local database
    Stats {
        /// Numeric Telegram chat id
        #[arg(long)]
        chat_id: i64,

        /// Maximum number of rows
        #[arg(long, default_value_t = tagboard_core::LEADERBOARD_LIMIT)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref().map(Path::new))
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Start => start(config, &cli.log_level).await,
        Commands::Stats { chat_id, limit } => stats(config, chat_id, limit),
    }
}

async fn start(config: Config, log_level: &str) -> Result<()> {
    config.validate()?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let log_level = config.core.log_level.as_deref().unwrap_or(log_level);
    let _logging_guard = logging::init_logging(&data_dir.join("logs"), log_level)?;

    let db_path = config.db_path();
    let store = MentionStore::new(&db_path)
        .with_context(|| format!("failed to open mention store at {}", db_path.display()))?;
    info!("Mention store opened at {}", db_path.display());

    let runtime = TagboardRuntime::new(store);
    let adapter = Arc::new(
        TelegramAdapter::new(&config.telegram, data_dir).with_event_bus(runtime.event_bus().clone()),
    );

    let poller = Arc::clone(&adapter);
    tokio::spawn(async move {
        if let Err(err) = poller.poll().await {
            error!("Telegram polling stopped: {}", err);
        }
    });

    let outbound_rx = runtime.event_bus().outbound_subscribe();
    let sender = Arc::clone(&adapter);
    tokio::spawn(async move {
        sender.run_outbound_handler(outbound_rx).await;
    });

    runtime.run().await
}

fn stats(config: Config, chat_id: i64, limit: u32) -> Result<()> {
    let db_path = config.db_path();
    let store = MentionStore::new(&db_path)
        .with_context(|| format!("failed to open mention store at {}", db_path.display()))?;

    let rows = store.leaderboard(chat_id, limit)?;
    println!("{}", tagboard_core::format_leaderboard(&rows));
    Ok(())
}

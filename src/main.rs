use anyhow::Result;
use clap::Parser;
use signal_relay_bot::{BotConfig, Roles, SignalDispatcher, StateStore, TelegramBotHandler};
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Trading signal relay bot")]
struct Cli {
    /// Validate configuration and exit without starting polling
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BotConfig::from_env();
    let token = config.token()?.to_string();
    let store = StateStore::load(&config.state_path).await?;

    if config.is_open_mode() {
        warn!("BOT_MASTER_ID is not set. Trading commands are available to every user.");
    }
    if !config.admin_ids.is_empty() {
        info!("Loaded {} admin ids", config.admin_ids.len());
    }

    if cli.check {
        info!("Configuration validated. Exiting due to --check flag.");
        return Ok(());
    }

    info!(
        "Bot is starting with state file at {}",
        config.state_path.display()
    );
    let dispatcher = SignalDispatcher::new(store, Roles::from_config(&config));
    TelegramBotHandler::new(dispatcher)
        .run(Bot::new(token))
        .await;

    Ok(())
}

use anyhow::Result;
use polygon_swap_bot::{bot::SwapBot, config::Config, credentials::load_trading_account, TradeError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Polygon Swap Bot");

    // Load configuration
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    // Without a signing key there is nothing to do: fail before the loop starts.
    let account = config
        .wallet
        .private_key
        .as_deref()
        .ok_or_else(|| TradeError::Credential("PRIVATE_KEY is not set".to_string()))
        .and_then(|raw| load_trading_account(raw, config.blockchain.chain_id))
        .map_err(|e| {
            error!("Fatal [{}]: {}", e.kind(), e);
            e
        })?;

    // Initialize the bot
    let bot = SwapBot::new(config, account).await.map_err(|e| {
        error!("Failed to initialize bot: {}", e);
        e
    })?;

    // Handle graceful shutdown
    let stop_handle = bot.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            stop_handle.stop();
        }
    });

    let metrics = bot.run().await;
    info!("\n{}", metrics.generate_report());

    info!("Polygon Swap Bot shutdown complete");
    Ok(())
}

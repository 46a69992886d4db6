use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    blockchain::{BlockchainClient, LedgerGateway},
    bot::{
        metrics::SessionMetrics,
        scheduler::{stop_channel, ScheduleController, StopHandle},
        timer::{Timer, TokioTimer},
    },
    config::{Config, TradeConfig},
    credentials::TradingAccount,
    dex::OkxDexClient,
};

/// Wires the aggregator client, the ledger client and the controller together.
pub struct SwapBot {
    controller: ScheduleController,
    stop_handle: StopHandle,
}

impl SwapBot {
    pub async fn new(config: Config, account: TradingAccount) -> Result<Self> {
        info!("Initializing Swap Bot");

        let trade_config = TradeConfig::new(&config.trading)?;
        let timer: Arc<dyn Timer> = Arc::new(TokioTimer);

        // Initialize aggregator client
        let dex = Arc::new(OkxDexClient::new(
            &config.aggregator,
            config.blockchain.chain_id,
        )?);
        info!("Aggregator client initialized: {}", config.aggregator.base_url);

        // Initialize blockchain client
        let ledger = Arc::new(BlockchainClient::new(&config, dex.clone(), timer.clone()).await?);
        info!("Blockchain client initialized");

        info!("Trading wallet: {:?}", account.address());
        match ledger.get_balance(account.address()).await {
            Ok(balance) => info!(
                "Starting balance: {} (trade needs {})",
                balance,
                trade_config.required_balance()
            ),
            Err(e) => warn!("Could not read starting balance [{}]: {}", e.kind(), e),
        }

        let (stop_handle, stop_signal) = stop_channel();
        let controller =
            ScheduleController::new(trade_config, account, dex, ledger, timer, stop_signal);

        info!("Swap Bot initialized successfully");

        Ok(Self {
            controller,
            stop_handle,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub async fn run(self) -> SessionMetrics {
        self.controller.run().await
    }
}

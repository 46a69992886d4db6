use anyhow::{anyhow, Result};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::blockchain::{parse_address, ConfirmationPolicy, NATIVE_TOKEN};
use crate::types::{AssetPair, Slippage};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub blockchain: BlockchainConfig,
    pub aggregator: AggregatorConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BlockchainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_confirmation_max_attempts")]
    pub confirmation_max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AggregatorConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TradingConfig {
    pub source_token: String,
    pub destination_token: String,
    pub source_symbol: String,
    pub destination_symbol: String,
    pub amount: String,
    pub min_expected_amount: String,
    pub slippage: String,
    pub fee_reserve: String,
    pub poll_interval_seconds: u64,
    pub cooldown_seconds: u64,
    pub max_daily_trades: u32,
    #[serde(default = "default_failed_trade_backoff_seconds")]
    pub failed_trade_backoff_seconds: u64,
    #[serde(default = "default_error_recovery_seconds")]
    pub error_recovery_seconds: u64,
}

#[derive(Deserialize, Serialize, Clone, Default)]
pub struct WalletConfig {
    pub private_key: Option<String>,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_confirmation_poll_ms() -> u64 {
    2_000
}

fn default_confirmation_max_attempts() -> u32 {
    30
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_failed_trade_backoff_seconds() -> u64 {
    30
}

fn default_error_recovery_seconds() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("SWAPBOT").separator("__"));

        // Override RPC URL from environment if present
        if let Ok(rpc_url) = std::env::var("POLYGON_RPC_URL") {
            settings = settings.set_override("blockchain.rpc_url", rpc_url)?;
        }

        if let Ok(private_key) = std::env::var("PRIVATE_KEY") {
            settings = settings.set_override("wallet.private_key", private_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }
}

impl BlockchainConfig {
    pub fn confirmation_policy(&self) -> Result<ConfirmationPolicy> {
        if self.confirmation_max_attempts == 0 {
            return Err(anyhow!("Invalid confirmation_max_attempts: must be at least 1"));
        }

        Ok(ConfirmationPolicy {
            poll_interval: Duration::from_millis(self.confirmation_poll_ms),
            max_attempts: self.confirmation_max_attempts,
        })
    }
}

/// Validated, immutable trading parameters.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    pub pair: AssetPair,
    /// Trade size in the source token's smallest unit.
    pub amount: U256,
    pub min_expected_amount: U256,
    pub slippage: Slippage,
    /// Native-token margin that must remain available for gas.
    pub fee_reserve: U256,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub max_daily_trades: u32,
    pub failed_trade_backoff: Duration,
    pub error_recovery_delay: Duration,
}

impl TradeConfig {
    pub fn new(config: &TradingConfig) -> Result<Self> {
        let pair = AssetPair {
            source: parse_address(&config.source_token)?,
            destination: parse_address(&config.destination_token)?,
            source_symbol: config.source_symbol.clone(),
            destination_symbol: config.destination_symbol.clone(),
        };

        // Balance checks and the fee reserve are expressed in the native token.
        if pair.source != NATIVE_TOKEN {
            return Err(anyhow!(
                "source_token must be the native token placeholder {:?}",
                NATIVE_TOKEN
            ));
        }

        if pair.source == pair.destination {
            return Err(anyhow!("source and destination tokens must differ"));
        }

        let amount = parse_amount("amount", &config.amount)?;
        if amount.is_zero() {
            return Err(anyhow!("Invalid amount: must be a positive integer"));
        }

        let min_expected_amount = parse_amount("min_expected_amount", &config.min_expected_amount)?;
        let fee_reserve = parse_amount("fee_reserve", &config.fee_reserve)?;

        let slippage = config
            .slippage
            .parse::<Slippage>()
            .map_err(|e| anyhow!("Invalid slippage: {}", e))?;

        if config.max_daily_trades == 0 {
            return Err(anyhow!("Invalid max_daily_trades: must be at least 1"));
        }

        if config.poll_interval_seconds == 0 {
            return Err(anyhow!("Invalid poll_interval_seconds: must be at least 1"));
        }

        Ok(Self {
            pair,
            amount,
            min_expected_amount,
            slippage,
            fee_reserve,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            cooldown: Duration::from_secs(config.cooldown_seconds),
            max_daily_trades: config.max_daily_trades,
            failed_trade_backoff: Duration::from_secs(config.failed_trade_backoff_seconds),
            error_recovery_delay: Duration::from_secs(config.error_recovery_seconds),
        })
    }

    /// Balance needed before a trade is considered: trade size plus the gas margin.
    pub fn required_balance(&self) -> U256 {
        self.amount.saturating_add(self.fee_reserve)
    }
}

fn parse_amount(field: &str, value: &str) -> Result<U256> {
    U256::from_dec_str(value.trim()).map_err(|e| anyhow!("Invalid {} '{}': {}", field, value, e))
}

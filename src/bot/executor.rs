use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    blockchain::LedgerGateway,
    config::TradeConfig,
    credentials::TradingAccount,
    dex::QuoteClient,
    error::TradeResult,
    types::SwapReceipt,
};

/// Performs one complete swap attempt: fresh quote, build+sign+submit from that
/// exact quote, then wait for confirmation. Never retries.
pub struct TradeExecutor {
    quotes: Arc<dyn QuoteClient>,
    ledger: Arc<dyn LedgerGateway>,
}

impl TradeExecutor {
    pub fn new(quotes: Arc<dyn QuoteClient>, ledger: Arc<dyn LedgerGateway>) -> Self {
        Self { quotes, ledger }
    }

    pub async fn execute(
        &self,
        config: &TradeConfig,
        account: &TradingAccount,
    ) -> TradeResult<SwapReceipt> {
        let quote = self
            .quotes
            .get_quote(&config.pair, config.amount, &config.slippage)
            .await?;

        info!(
            "Swapping {} {} for ~{} {} via {} (slippage {})",
            quote.from_amount,
            config.pair.source_symbol,
            quote.to_amount,
            config.pair.destination_symbol,
            self.quotes.name(),
            config.slippage
        );

        let tx_hash = self
            .ledger
            .build_and_submit_swap(&quote, account, &config.slippage)
            .await?;

        let receipt = self
            .ledger
            .confirm_transaction(tx_hash)
            .await?
            .with_settlement(config.pair.destination, account.address());

        match receipt.settled_amount {
            Some(settled) => info!(
                "Swap {:?} settled: received {} {} (quoted {})",
                receipt.tx_hash, settled, config.pair.destination_symbol, quote.to_amount
            ),
            None => warn!(
                "Swap {:?} confirmed but no {} transfer to {:?} found in receipt",
                receipt.tx_hash,
                config.pair.destination_symbol,
                account.address()
            ),
        }

        Ok(receipt)
    }
}

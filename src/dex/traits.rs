use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::error::TradeResult;
use crate::types::{AssetPair, Quote, Slippage, SwapPayload};

#[async_trait]
pub trait QuoteClient: Send + Sync {
    fn name(&self) -> &str;

    /// Fresh quote for swapping `amount` (smallest unit, must be positive).
    async fn get_quote(&self, pair: &AssetPair, amount: U256, slippage: &Slippage)
        -> TradeResult<Quote>;
}

#[async_trait]
pub trait SwapBuilder: Send + Sync {
    /// Requests an unsigned transaction executing exactly `quote` for `account`.
    async fn build_swap(
        &self,
        quote: &Quote,
        account: Address,
        slippage: &Slippage,
    ) -> TradeResult<SwapPayload>;
}

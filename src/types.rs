use anyhow::anyhow;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, TxHash, U256, U64};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    pub source: Address,
    pub destination: Address,
    pub source_symbol: String,
    pub destination_symbol: String,
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_symbol, self.destination_symbol)
    }
}

/// Slippage tolerance as a percentage, e.g. `0.5` for half a percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slippage(BigDecimal);

impl Slippage {
    /// Query/body parameter form expected by the aggregator.
    pub fn as_param(&self) -> String {
        self.0.normalized().to_string()
    }
}

impl FromStr for Slippage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let value = BigDecimal::from_str(s.trim())
            .map_err(|e| anyhow!("invalid slippage '{}': {}", s, e))?;

        if value <= BigDecimal::zero() || value > BigDecimal::from(100) {
            return Err(anyhow!(
                "slippage must be within (0, 100] percent, got {}",
                value
            ));
        }

        Ok(Self(value))
    }
}

impl fmt::Display for Slippage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_param())
    }
}

/// A non-binding price estimate. Only valid for the build+submit that directly
/// follows it; nothing keeps quotes around between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub pair: AssetPair,
    pub from_amount: U256,
    pub to_amount: U256,
    pub route: serde_json::Value,
    pub quoted_at: DateTime<Utc>,
}

/// Prebuilt, unsigned transaction returned by the swap-build endpoint.
#[derive(Debug, Clone)]
pub struct SwapPayload {
    pub transaction: SwapTransaction,
    pub from_amount: U256,
    pub to_amount: U256,
}

#[derive(Debug, Clone)]
pub enum SwapTransaction {
    /// Base64 of an RLP-encoded unsigned transaction.
    Encoded(String),
    /// Router call with its fields returned separately.
    Call(SwapCall),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<U256>,
    /// Max fee per gas when `max_priority_fee_per_gas` is set.
    pub gas_price: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    Confirmed,
    Failed { reason: String },
}

/// ERC-20 `Transfer` event decoded from a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub tx_hash: TxHash,
    pub status: ConfirmationStatus,
    pub settled_amount: Option<U256>,
    pub transfers: Vec<TokenTransfer>,
    pub block_number: Option<U64>,
    pub confirmed_at: DateTime<Utc>,
}

impl SwapReceipt {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, ConfirmationStatus::Confirmed)
    }

    /// Sum of `token` transfers received by `recipient` in this transaction.
    pub fn received(&self, token: Address, recipient: Address) -> Option<U256> {
        let mut matching = self
            .transfers
            .iter()
            .filter(|t| t.token == token && t.to == recipient)
            .peekable();

        matching.peek()?;
        Some(matching.fold(U256::zero(), |acc, t| acc.saturating_add(t.amount)))
    }

    pub fn with_settlement(mut self, token: Address, recipient: Address) -> Self {
        self.settled_amount = self.received(token, recipient);
        self
    }
}

//! Loads the signing key and wraps it in a [`TradingAccount`].
//!
//! Key-format sniffing happens here and nowhere else; the rest of the crate only
//! ever sees the account.

use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Signature},
};
use std::fmt;

use crate::error::{TradeError, TradeResult};

const SECRET_KEY_LEN: usize = 32;

/// Signing capability for the trading wallet.
#[derive(Clone)]
pub struct TradingAccount {
    wallet: LocalWallet,
}

impl TradingAccount {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    pub fn sign(&self, tx: &TypedTransaction) -> TradeResult<Signature> {
        self.wallet
            .sign_transaction_sync(tx)
            .map_err(|e| TradeError::Submission(format!("local signing failed: {}", e)))
    }
}

impl fmt::Debug for TradingAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingAccount")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Builds the trading account from raw key text.
///
/// Accepted encodings:
/// - JSON array of byte values: `[12, 255, ...]`
/// - comma-separated byte values: `12,255,...`
/// - hex, with or without a `0x` prefix
pub fn load_trading_account(raw: &str, chain_id: u64) -> TradeResult<TradingAccount> {
    let bytes = decode_secret_key(raw)?;

    let wallet = LocalWallet::from_bytes(&bytes)
        .map_err(|e| TradeError::Credential(format!("invalid secp256k1 key: {}", e)))?
        .with_chain_id(chain_id);

    Ok(TradingAccount::new(wallet))
}

fn decode_secret_key(raw: &str) -> TradeResult<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TradeError::Credential("private key is empty".to_string()));
    }

    let bytes = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(trimmed)
            .map_err(|e| TradeError::Credential(format!("malformed JSON key array: {}", e)))?
    } else if trimmed.contains(',') {
        trimmed
            .split(',')
            .map(|part| part.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| TradeError::Credential(format!("malformed comma-separated key: {}", e)))?
    } else {
        let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        hex::decode(hex_str)
            .map_err(|e| TradeError::Credential(format!("malformed hex key: {}", e)))?
    };

    if bytes.len() != SECRET_KEY_LEN {
        return Err(TradeError::Credential(format!(
            "expected {} key bytes, got {}",
            SECRET_KEY_LEN,
            bytes.len()
        )));
    }

    Ok(bytes)
}

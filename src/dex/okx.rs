use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, Bytes, U256};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::{
    blockchain::format_address,
    config::AggregatorConfig,
    dex::traits::{QuoteClient, SwapBuilder},
    error::{TradeError, TradeResult},
    types::{AssetPair, Quote, Slippage, SwapCall, SwapPayload, SwapTransaction},
};

const QUOTE_PATH: &str = "/api/v5/dex/aggregator/quote";
const SWAP_PATH: &str = "/api/v5/dex/aggregator/swap";
const API_KEY_HEADER: &str = "OK-ACCESS-KEY";

/// Response envelope shared by every aggregator endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

impl ApiEnvelope {
    fn is_success(&self) -> bool {
        match &self.code {
            Value::String(code) => code.trim() == "0",
            Value::Number(code) => code.as_i64() == Some(0),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteData {
    from_token_amount: String,
    to_token_amount: String,
}

/// `tx` object of a swap-build result. EVM chains return the router call as
/// separate fields; without `to`, `data` is a base64 RLP-encoded transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapTx {
    data: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    gas: Option<String>,
    #[serde(default)]
    gas_price: Option<String>,
    #[serde(default)]
    max_priority_fee_per_gas: Option<String>,
}

impl SwapTx {
    fn into_transaction(self) -> Result<SwapTransaction, String> {
        let to = match self.to.as_deref().map(str::trim) {
            None | Some("") => return Ok(SwapTransaction::Encoded(self.data)),
            Some(to) => to
                .parse::<Address>()
                .map_err(|e| format!("invalid router address '{}': {}", to, e))?,
        };

        let data = hex::decode(self.data.trim().trim_start_matches("0x"))
            .map_err(|e| format!("calldata is not hex: {}", e))?;

        Ok(SwapTransaction::Call(SwapCall {
            to,
            value: optional_amount(self.value)?.unwrap_or_default(),
            data: Bytes::from(data),
            gas: optional_amount(self.gas)?,
            gas_price: optional_amount(self.gas_price)?,
            max_priority_fee_per_gas: optional_amount(self.max_priority_fee_per_gas)?,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapData {
    tx: SwapTx,
    #[serde(default)]
    from_token_amount: Option<String>,
    #[serde(default)]
    to_token_amount: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest {
    chain_id: String,
    from_token_address: String,
    to_token_address: String,
    amount: String,
    slippage: String,
    user_wallet_address: String,
}

/// Client for an OKX-style DEX aggregator (quote + swap-build endpoints).
pub struct OkxDexClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    chain_id: u64,
}

impl OkxDexClient {
    pub fn new(config: &AggregatorConfig, chain_id: u64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            chain_id,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Sends the request and unwraps the first result object of the envelope.
    async fn first_result<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<(T, Value), String> {
        let response = request.send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| format!("malformed response: {}", e))?;

        if !envelope.is_success() {
            return Err(format!("code {}: {}", envelope.code, envelope.msg));
        }

        let first = envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| "empty result set".to_string())?;

        let parsed = serde_json::from_value(first.clone())
            .map_err(|e| format!("unexpected result shape: {}", e))?;

        Ok((parsed, first))
    }
}

#[async_trait]
impl QuoteClient for OkxDexClient {
    fn name(&self) -> &str {
        "okx"
    }

    async fn get_quote(
        &self,
        pair: &AssetPair,
        amount: U256,
        slippage: &Slippage,
    ) -> TradeResult<Quote> {
        if amount.is_zero() {
            return Err(TradeError::Quote("amount must be a positive integer".to_string()));
        }

        debug!("Requesting {} quote for {} {}", pair, amount, pair.source_symbol);

        let request = self.authorize(
            self.http
                .get(format!("{}{}", self.base_url, QUOTE_PATH))
                .query(&[
                    ("chainId", self.chain_id.to_string()),
                    ("fromTokenAddress", format_address(&pair.source)),
                    ("toTokenAddress", format_address(&pair.destination)),
                    ("amount", amount.to_string()),
                    ("slippage", slippage.as_param()),
                ]),
        );

        let (data, route) = Self::first_result::<QuoteData>(request)
            .await
            .map_err(TradeError::Quote)?;

        let from_amount = parse_amount(&data.from_token_amount).map_err(TradeError::Quote)?;
        let to_amount = parse_amount(&data.to_token_amount).map_err(TradeError::Quote)?;

        debug!("Quote {}: {} -> {}", pair, from_amount, to_amount);

        Ok(Quote {
            pair: pair.clone(),
            from_amount,
            to_amount,
            route,
            quoted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl SwapBuilder for OkxDexClient {
    async fn build_swap(
        &self,
        quote: &Quote,
        account: Address,
        slippage: &Slippage,
    ) -> TradeResult<SwapPayload> {
        let body = SwapRequest {
            chain_id: self.chain_id.to_string(),
            from_token_address: format_address(&quote.pair.source),
            to_token_address: format_address(&quote.pair.destination),
            amount: quote.from_amount.to_string(),
            slippage: slippage.as_param(),
            user_wallet_address: format_address(&account),
        };

        let request = self.authorize(
            self.http
                .post(format!("{}{}", self.base_url, SWAP_PATH))
                .json(&body),
        );

        let (data, _) = Self::first_result::<SwapData>(request)
            .await
            .map_err(TradeError::SwapBuild)?;

        let from_amount = match data.from_token_amount {
            Some(amount) => parse_amount(&amount).map_err(TradeError::SwapBuild)?,
            None => quote.from_amount,
        };
        let to_amount = match data.to_token_amount {
            Some(amount) => parse_amount(&amount).map_err(TradeError::SwapBuild)?,
            None => quote.to_amount,
        };

        Ok(SwapPayload {
            transaction: data.tx.into_transaction().map_err(TradeError::SwapBuild)?,
            from_amount,
            to_amount,
        })
    }
}

fn parse_amount(value: &str) -> Result<U256, String> {
    U256::from_dec_str(value.trim()).map_err(|e| format!("invalid amount '{}': {}", value, e))
}

fn optional_amount(value: Option<String>) -> Result<Option<U256>, String> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(amount) => parse_amount(amount).map(Some),
    }
}

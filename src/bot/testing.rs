//! In-memory collaborators for exercising the bot without a chain or aggregator.

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, TxHash, U256};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use crate::{
    blockchain::LedgerGateway,
    bot::scheduler::StopHandle,
    bot::timer::Timer,
    config::{tests::create_test_trading_config, TradeConfig},
    credentials::{load_trading_account, TradingAccount},
    dex::{QuoteClient, SwapBuilder},
    error::{TradeError, TradeResult},
    types::{
        AssetPair, ConfirmationStatus, Quote, Slippage, SwapPayload, SwapReceipt, TokenTransfer,
    },
};

pub const TEST_KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn test_account() -> TradingAccount {
    load_trading_account(TEST_KEY_HEX, 137).unwrap()
}

pub fn test_trade_config() -> TradeConfig {
    TradeConfig::new(&create_test_trading_config()).unwrap()
}

pub fn confirmed_receipt(tx_hash: TxHash, transfers: Vec<TokenTransfer>) -> SwapReceipt {
    SwapReceipt {
        tx_hash,
        status: ConfirmationStatus::Confirmed,
        settled_amount: None,
        transfers,
        block_number: Some(1u64.into()),
        confirmed_at: Utc::now(),
    }
}

/// Records every requested sleep and returns immediately. Optionally raises a
/// stop request once a given number of sleeps has been recorded, or never
/// finishes any sleep past a given count.
#[derive(Default)]
pub struct RecordingTimer {
    sleeps: Mutex<Vec<Duration>>,
    stop_after: Option<(usize, StopHandle)>,
    block_after: Option<usize>,
}

impl RecordingTimer {
    pub fn stopping_after(sleeps: usize, handle: StopHandle) -> Self {
        Self {
            stop_after: Some((sleeps, handle)),
            ..Self::default()
        }
    }

    /// The first `sleeps` sleeps return at once; later ones only end when cancelled.
    pub fn blocking_after(sleeps: usize) -> Self {
        Self {
            block_after: Some(sleeps),
            ..Self::default()
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timer for RecordingTimer {
    async fn sleep(&self, duration: Duration) {
        let recorded = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };

        if let Some((limit, handle)) = &self.stop_after {
            if recorded >= *limit {
                handle.stop();
            }
        }

        if matches!(self.block_after, Some(limit) if recorded > limit) {
            std::future::pending::<()>().await;
        }

        tokio::task::yield_now().await;
    }
}

pub struct MockQuoteClient {
    result: Mutex<TradeResult<U256>>,
    calls: AtomicUsize,
    stop_on_call: Option<StopHandle>,
}

impl MockQuoteClient {
    pub fn returning(to_amount: u64) -> Self {
        Self {
            result: Mutex::new(Ok(U256::from(to_amount))),
            calls: AtomicUsize::new(0),
            stop_on_call: None,
        }
    }

    pub fn failing(error: TradeError) -> Self {
        Self {
            result: Mutex::new(Err(error)),
            calls: AtomicUsize::new(0),
            stop_on_call: None,
        }
    }

    /// Raises a stop request while the quote is being fetched.
    pub fn stopping(mut self, handle: StopHandle) -> Self {
        self.stop_on_call = Some(handle);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteClient for MockQuoteClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_quote(
        &self,
        pair: &AssetPair,
        amount: U256,
        _slippage: &Slippage,
    ) -> TradeResult<Quote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &self.stop_on_call {
            handle.stop();
        }

        let to_amount = self.result.lock().unwrap().clone()?;
        Ok(Quote {
            pair: pair.clone(),
            from_amount: amount,
            to_amount,
            route: json!({"mock": true}),
            quoted_at: Utc::now(),
        })
    }
}

pub struct MockLedger {
    balance: Mutex<TradeResult<U256>>,
    submit: Mutex<TradeResult<TxHash>>,
    confirm: Mutex<TradeResult<SwapReceipt>>,
    balance_calls: AtomicUsize,
    submitted: Mutex<Vec<Quote>>,
    confirm_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new(balance: u64) -> Self {
        let tx_hash = TxHash::repeat_byte(0xab);
        Self {
            balance: Mutex::new(Ok(U256::from(balance))),
            submit: Mutex::new(Ok(tx_hash)),
            confirm: Mutex::new(Ok(confirmed_receipt(tx_hash, vec![]))),
            balance_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            confirm_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_balance_result(self, result: TradeResult<U256>) -> Self {
        *self.balance.lock().unwrap() = result;
        self
    }

    pub fn with_submit_result(self, result: TradeResult<TxHash>) -> Self {
        *self.submit.lock().unwrap() = result;
        self
    }

    pub fn with_confirm_result(self, result: TradeResult<SwapReceipt>) -> Self {
        *self.confirm.lock().unwrap() = result;
        self
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn submitted_quotes(&self) -> Vec<Quote> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn get_balance(&self, _account: Address) -> TradeResult<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balance.lock().unwrap().clone()
    }

    async fn build_and_submit_swap(
        &self,
        quote: &Quote,
        _account: &TradingAccount,
        _slippage: &Slippage,
    ) -> TradeResult<TxHash> {
        self.submitted.lock().unwrap().push(quote.clone());
        self.submit.lock().unwrap().clone()
    }

    async fn confirm_transaction(&self, _tx_hash: TxHash) -> TradeResult<SwapReceipt> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirm.lock().unwrap().clone()
    }
}

/// Returns a fixed payload, or a rejection when built with `default()`.
#[derive(Default)]
pub struct MockSwapBuilder {
    payload: Option<SwapPayload>,
}

impl MockSwapBuilder {
    pub fn returning(payload: SwapPayload) -> Self {
        Self {
            payload: Some(payload),
        }
    }
}

#[async_trait]
impl SwapBuilder for MockSwapBuilder {
    async fn build_swap(
        &self,
        _quote: &Quote,
        _account: Address,
        _slippage: &Slippage,
    ) -> TradeResult<SwapPayload> {
        self.payload
            .clone()
            .ok_or_else(|| TradeError::SwapBuild("mock builder has no route".to_string()))
    }
}

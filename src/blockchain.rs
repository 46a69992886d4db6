use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use ethers::{
    prelude::*,
    providers::{Http, JsonRpcClient, Provider},
    types::{
        transaction::eip2718::TypedTransaction, Address, Eip1559TransactionRequest, TxHash, H160,
        U256,
    },
    utils::{keccak256, rlp},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    bot::timer::Timer,
    config::Config,
    credentials::TradingAccount,
    dex::SwapBuilder,
    error::{TradeError, TradeResult},
    types::{
        ConfirmationStatus, Quote, Slippage, SwapCall, SwapReceipt, SwapTransaction, TokenTransfer,
    },
};

/// Placeholder address aggregators use for the chain's native token.
pub const NATIVE_TOKEN: Address = H160([0xee; 20]);

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Native balance in the smallest unit. An error means "unknown", never "zero".
    async fn get_balance(&self, account: Address) -> TradeResult<U256>;

    async fn build_and_submit_swap(
        &self,
        quote: &Quote,
        account: &TradingAccount,
        slippage: &Slippage,
    ) -> TradeResult<TxHash>;

    /// Polls until the transaction is final or the attempt budget runs out.
    async fn confirm_transaction(&self, tx_hash: TxHash) -> TradeResult<SwapReceipt>;
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

pub struct BlockchainClient<P = Http> {
    provider: Arc<Provider<P>>,
    chain_id: u64,
    swap_builder: Arc<dyn SwapBuilder>,
    timer: Arc<dyn Timer>,
    confirmation: ConfirmationPolicy,
}

impl BlockchainClient<Http> {
    pub async fn new(
        config: &Config,
        swap_builder: Arc<dyn SwapBuilder>,
        timer: Arc<dyn Timer>,
    ) -> Result<Self> {
        let confirmation = config.blockchain.confirmation_policy()?;
        info!("Connecting to Polygon RPC: {}", config.blockchain.rpc_url);

        let provider = Provider::<Http>::try_from(config.blockchain.rpc_url.as_str())
            .map_err(|e| anyhow!("Failed to create provider: {}", e))?;

        // Verify connection by getting chain ID
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| anyhow!("Failed to get chain ID: {}", e))?;

        if chain_id.as_u64() != config.blockchain.chain_id {
            return Err(anyhow!(
                "Chain ID mismatch: expected {}, got {}",
                config.blockchain.chain_id,
                chain_id.as_u64()
            ));
        }

        info!("Successfully connected to Polygon network (Chain ID: {})", chain_id);

        Ok(Self::with_provider(
            Arc::new(provider),
            chain_id.as_u64(),
            swap_builder,
            timer,
            confirmation,
        ))
    }
}

impl<P: JsonRpcClient + 'static> BlockchainClient<P> {
    pub fn with_provider(
        provider: Arc<Provider<P>>,
        chain_id: u64,
        swap_builder: Arc<dyn SwapBuilder>,
        timer: Arc<dyn Timer>,
        confirmation: ConfirmationPolicy,
    ) -> Self {
        Self {
            provider,
            chain_id,
            swap_builder,
            timer,
            confirmation,
        }
    }

    async fn pending_nonce(&self, account: Address) -> TradeResult<U256> {
        self.provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| TradeError::Submission(format!("nonce lookup failed: {}", e)))
    }

    /// Fills gas limit and price when the builder left them out.
    async fn fill_gas(&self, tx: &mut TypedTransaction) -> TradeResult<()> {
        if tx.gas().map_or(true, |gas| gas.is_zero()) {
            let gas = self
                .provider
                .estimate_gas(tx, None)
                .await
                .map_err(|e| TradeError::Submission(format!("gas estimation failed: {}", e)))?;
            tx.set_gas(gas);
        }

        if tx.gas_price().map_or(true, |price| price.is_zero()) {
            let price = self
                .provider
                .get_gas_price()
                .await
                .map_err(|e| TradeError::Submission(format!("gas price lookup failed: {}", e)))?;
            tx.set_gas_price(price);
        }

        Ok(())
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> LedgerGateway for BlockchainClient<P> {
    async fn get_balance(&self, account: Address) -> TradeResult<U256> {
        self.provider
            .get_balance(account, None)
            .await
            .map_err(|e| TradeError::LedgerUnavailable(format!("balance lookup failed: {}", e)))
    }

    async fn build_and_submit_swap(
        &self,
        quote: &Quote,
        account: &TradingAccount,
        slippage: &Slippage,
    ) -> TradeResult<TxHash> {
        let payload = self
            .swap_builder
            .build_swap(quote, account.address(), slippage)
            .await?;

        let mut tx = decode_transaction(&payload.transaction)?;
        tx.set_from(account.address());
        tx.set_chain_id(self.chain_id);
        // Decoded payloads report nonce 0 when the builder left it out.
        let nonce = self.pending_nonce(account.address()).await?;
        tx.set_nonce(nonce);
        self.fill_gas(&mut tx).await?;

        debug!(
            "Signing swap transaction for {} -> {} (nonce {:?})",
            payload.from_amount,
            payload.to_amount,
            tx.nonce()
        );

        let signature = account.sign(&tx)?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| TradeError::Submission(e.to_string()))?;

        let tx_hash = *pending;
        info!("Submitted swap transaction {:?}", tx_hash);
        Ok(tx_hash)
    }

    async fn confirm_transaction(&self, tx_hash: TxHash) -> TradeResult<SwapReceipt> {
        let max_attempts = self.confirmation.max_attempts;

        for attempt in 1..=max_attempts {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return receipt_outcome(tx_hash, &receipt),
                Ok(None) => {
                    debug!(
                        "Transaction {:?} pending (attempt {}/{})",
                        tx_hash, attempt, max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Receipt lookup for {:?} failed (attempt {}/{}): {}",
                        tx_hash, attempt, max_attempts, e
                    );
                }
            }

            if attempt < max_attempts {
                self.timer.sleep(self.confirmation.poll_interval).await;
            }
        }

        Err(TradeError::ConfirmationTimeout {
            tx_hash,
            attempts: max_attempts,
        })
    }
}

fn receipt_outcome(tx_hash: TxHash, receipt: &TransactionReceipt) -> TradeResult<SwapReceipt> {
    // Receipts without a status field predate Byzantium and only exist for mined txs.
    if receipt.status.map(|s| s.as_u64()) == Some(0) {
        return Err(TradeError::Confirmation {
            tx_hash,
            reason: format!(
                "reverted in block {}",
                receipt
                    .block_number
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        });
    }

    Ok(SwapReceipt {
        tx_hash,
        status: ConfirmationStatus::Confirmed,
        settled_amount: None,
        transfers: decode_transfers(&receipt.logs),
        block_number: receipt.block_number,
        confirmed_at: Utc::now(),
    })
}

fn transfer_topic() -> H256 {
    H256::from(keccak256("Transfer(address,address,uint256)"))
}

/// Extracts ERC-20 `Transfer` events; other logs are skipped.
pub fn decode_transfers(logs: &[Log]) -> Vec<TokenTransfer> {
    let topic = transfer_topic();

    logs.iter()
        .filter(|log| log.topics.len() == 3 && log.topics[0] == topic && log.data.len() == 32)
        .map(|log| TokenTransfer {
            token: log.address,
            from: Address::from(log.topics[1]),
            to: Address::from(log.topics[2]),
            amount: U256::from_big_endian(&log.data),
        })
        .collect()
}

/// Turns the swap-build result into an unsigned transaction.
pub fn decode_transaction(transaction: &SwapTransaction) -> TradeResult<TypedTransaction> {
    match transaction {
        SwapTransaction::Encoded(payload) => decode_encoded(payload),
        SwapTransaction::Call(call) => Ok(call_transaction(call)),
    }
}

fn call_transaction(call: &SwapCall) -> TypedTransaction {
    match call.max_priority_fee_per_gas {
        Some(priority_fee) => {
            let mut request = Eip1559TransactionRequest::new()
                .to(call.to)
                .value(call.value)
                .data(call.data.clone())
                .max_priority_fee_per_gas(priority_fee);
            request.gas = call.gas;
            request.max_fee_per_gas = call.gas_price;
            request.into()
        }
        None => {
            let mut request = TransactionRequest::new()
                .to(call.to)
                .value(call.value)
                .data(call.data.clone());
            request.gas = call.gas;
            request.gas_price = call.gas_price;
            request.into()
        }
    }
}

/// Decodes a base64 RLP-encoded unsigned transaction.
fn decode_encoded(payload: &str) -> TradeResult<TypedTransaction> {
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| TradeError::SwapBuild(format!("transaction payload is not base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(TradeError::SwapBuild("transaction payload is empty".to_string()));
    }

    rlp::decode::<TypedTransaction>(&bytes)
        .map_err(|e| TradeError::SwapBuild(format!("transaction payload is not valid RLP: {}", e)))
}

// Utility functions for address parsing and validation
pub fn parse_address(address_str: &str) -> Result<Address> {
    address_str
        .parse::<Address>()
        .map_err(|e| anyhow!("Invalid address format '{}': {}", address_str, e))
}

pub fn format_address(address: &Address) -> String {
    format!("{:?}", address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{test_account, MockSwapBuilder, RecordingTimer};
    use crate::types::{AssetPair, SwapPayload};
    use ethers::providers::MockProvider;

    fn mocked_client(
        max_attempts: u32,
    ) -> (BlockchainClient<MockProvider>, MockProvider, Arc<RecordingTimer>) {
        client_with(MockSwapBuilder::default(), max_attempts)
    }

    fn client_with(
        builder: MockSwapBuilder,
        max_attempts: u32,
    ) -> (BlockchainClient<MockProvider>, MockProvider, Arc<RecordingTimer>) {
        let (provider, mock) = Provider::mocked();
        let timer = Arc::new(RecordingTimer::default());
        let client = BlockchainClient::with_provider(
            Arc::new(provider),
            137,
            Arc::new(builder),
            timer.clone(),
            ConfirmationPolicy {
                poll_interval: Duration::from_secs(2),
                max_attempts,
            },
        );
        (client, mock, timer)
    }

    fn transfer_log(token: Address, from: Address, to: Address, amount: u64) -> Log {
        let mut data = [0u8; 32];
        U256::from(amount).to_big_endian(&mut data);
        Log {
            address: token,
            topics: vec![transfer_topic(), H256::from(from), H256::from(to)],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_address() {
        let valid_address = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
        assert!(parse_address(valid_address).is_ok());

        let invalid_address = "invalid_address";
        assert!(parse_address(invalid_address).is_err());
    }

    #[test]
    fn test_native_token_placeholder() {
        let parsed = parse_address("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE").unwrap();
        assert_eq!(parsed, NATIVE_TOKEN);
    }

    fn test_quote() -> Quote {
        Quote {
            pair: AssetPair {
                source: NATIVE_TOKEN,
                destination: Address::repeat_byte(0x27),
                source_symbol: "MATIC".to_string(),
                destination_symbol: "USDC".to_string(),
            },
            from_amount: U256::from(100_000_000u64),
            to_amount: U256::from(2_000_000u64),
            route: serde_json::json!({}),
            quoted_at: Utc::now(),
        }
    }

    fn payload(transaction: SwapTransaction) -> SwapPayload {
        SwapPayload {
            transaction,
            from_amount: U256::from(100_000_000u64),
            to_amount: U256::from(2_000_000u64),
        }
    }

    // Nonce and tx hash are both served from one 32-byte word, so the order in
    // which the mock hands out queued responses does not matter.
    fn queue_nonce_and_hash(mock: &MockProvider, value: u64) -> TxHash {
        let word = TxHash::from_low_u64_be(value);
        mock.push::<TxHash, _>(word).unwrap();
        mock.push::<TxHash, _>(word).unwrap();
        word
    }

    fn signed_with_nonce(payload: &SwapPayload, account: &TradingAccount, nonce: u64) -> Bytes {
        let mut tx = decode_transaction(&payload.transaction).unwrap();
        tx.set_from(account.address());
        tx.set_chain_id(137u64);
        tx.set_nonce(nonce);
        let signature = account.sign(&tx).unwrap();
        tx.rlp_signed(&signature)
    }

    #[test]
    fn test_decode_transaction_rejects_garbage() {
        let garbage = SwapTransaction::Encoded("not base64 at all!".to_string());
        let err = decode_transaction(&garbage).unwrap_err();
        assert_eq!(err.kind(), "SwapBuildError");

        let err = decode_transaction(&SwapTransaction::Encoded(String::new())).unwrap_err();
        assert_eq!(err.kind(), "SwapBuildError");
    }

    #[test]
    fn test_router_call_with_priority_fee_is_eip1559() {
        let call = SwapCall {
            to: Address::repeat_byte(0x42),
            value: U256::from(5u64),
            data: Bytes::from(vec![0x01, 0x02]),
            gas: Some(U256::from(300_000u64)),
            gas_price: Some(U256::from(90u64)),
            max_priority_fee_per_gas: Some(U256::from(30u64)),
        };

        match decode_transaction(&SwapTransaction::Call(call)).unwrap() {
            TypedTransaction::Eip1559(request) => {
                assert_eq!(request.max_fee_per_gas, Some(U256::from(90u64)));
                assert_eq!(request.max_priority_fee_per_gas, Some(U256::from(30u64)));
                assert_eq!(request.gas, Some(U256::from(300_000u64)));
            }
            other => panic!("expected an EIP-1559 transaction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_replaces_missing_nonce_with_pending_nonce() {
        let unsigned: TypedTransaction = Eip1559TransactionRequest::new()
            .to(Address::repeat_byte(0x42))
            .value(100_000_000u64)
            .data(vec![0x0d, 0x5f, 0x0e, 0x3b])
            .gas(300_000u64)
            .max_fee_per_gas(90_000_000_000u64)
            .max_priority_fee_per_gas(30_000_000_000u64)
            .into();
        let payload = payload(SwapTransaction::Encoded(BASE64.encode(unsigned.rlp())));

        // A nonce left out by the builder decodes as zero
        let decoded = decode_transaction(&payload.transaction).unwrap();
        assert_eq!(decoded.nonce(), Some(&U256::zero()));

        let account = test_account();
        let (client, mock, _timer) = client_with(MockSwapBuilder::returning(payload.clone()), 3);
        let word = queue_nonce_and_hash(&mock, 9);

        let tx_hash = client
            .build_and_submit_swap(&test_quote(), &account, &"0.5".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(tx_hash, word);
        mock.assert_request("eth_getTransactionCount", (account.address(), "pending"))
            .unwrap();
        mock.assert_request(
            "eth_sendRawTransaction",
            [signed_with_nonce(&payload, &account, 9)],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_submit_signs_router_call() {
        let payload = payload(SwapTransaction::Call(SwapCall {
            to: Address::repeat_byte(0x42),
            value: U256::from(100_000_000u64),
            data: Bytes::from(vec![0x0d, 0x5f, 0x0e, 0x3b]),
            gas: Some(U256::from(310_000u64)),
            gas_price: Some(U256::from(95_000_000_000u64)),
            max_priority_fee_per_gas: None,
        }));

        let account = test_account();
        let (client, mock, _timer) = client_with(MockSwapBuilder::returning(payload.clone()), 3);
        let word = queue_nonce_and_hash(&mock, 12);

        let tx_hash = client
            .build_and_submit_swap(&test_quote(), &account, &"0.5".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(tx_hash, word);
        mock.assert_request("eth_getTransactionCount", (account.address(), "pending"))
            .unwrap();
        mock.assert_request(
            "eth_sendRawTransaction",
            [signed_with_nonce(&payload, &account, 12)],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejected_by_builder_sends_nothing() {
        let (client, mock, _timer) = mocked_client(3);

        let err = client
            .build_and_submit_swap(&test_quote(), &test_account(), &"0.5".parse().unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "SwapBuildError");
        assert!(mock.assert_request("eth_getTransactionCount", ()).is_err());
    }

    #[test]
    fn test_decode_transfers_filters_other_events() {
        let token = Address::repeat_byte(0x11);
        let router = Address::repeat_byte(0x22);
        let me = Address::repeat_byte(0x33);

        let approval = Log {
            address: token,
            topics: vec![H256::from(keccak256("Approval(address,address,uint256)"))],
            ..Default::default()
        };

        let transfers = decode_transfers(&[approval, transfer_log(token, router, me, 2_000_000)]);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from, router);
        assert_eq!(transfers[0].to, me);
        assert_eq!(transfers[0].amount, U256::from(2_000_000u64));
    }

    #[tokio::test]
    async fn test_balance_failure_is_ledger_unavailable() {
        // No queued response: the mock transport errors out.
        let (client, _mock, _timer) = mocked_client(3);

        let err = client.get_balance(Address::repeat_byte(0x01)).await.unwrap_err();
        assert_eq!(err.kind(), "LedgerUnavailable");
    }

    #[tokio::test]
    async fn test_balance_lookup() {
        let (client, mock, _timer) = mocked_client(3);
        mock.push::<U256, _>(U256::from(42u64)).unwrap();

        let balance = client.get_balance(Address::repeat_byte(0x01)).await.unwrap();
        assert_eq!(balance, U256::from(42u64));
    }

    #[tokio::test]
    async fn test_confirmation_times_out_when_always_pending() {
        let (client, mock, timer) = mocked_client(4);
        for _ in 0..4 {
            mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
        }

        let err = client.confirm_transaction(TxHash::repeat_byte(0x05)).await.unwrap_err();
        match err {
            TradeError::ConfirmationTimeout { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected timeout, got {:?}", other),
        }

        // Sleeps only between attempts
        assert_eq!(timer.sleeps(), vec![Duration::from_secs(2); 3]);
    }

    #[tokio::test]
    async fn test_confirmed_receipt_carries_transfers() {
        let (client, mock, _timer) = mocked_client(3);
        let token = Address::repeat_byte(0x11);
        let router = Address::repeat_byte(0x22);
        let me = Address::repeat_byte(0x33);
        let tx_hash = TxHash::repeat_byte(0x07);

        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(1u64.into()),
            block_number: Some(100u64.into()),
            logs: vec![transfer_log(token, router, me, 2_000_000)],
            ..Default::default()
        };
        mock.push::<Option<TransactionReceipt>, _>(Some(receipt)).unwrap();

        let confirmed = client.confirm_transaction(tx_hash).await.unwrap();
        assert!(confirmed.is_confirmed());
        assert_eq!(confirmed.block_number, Some(100u64.into()));
        assert_eq!(confirmed.received(token, me), Some(U256::from(2_000_000u64)));
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_confirmation_error() {
        let (client, mock, _timer) = mocked_client(3);
        let tx_hash = TxHash::repeat_byte(0x09);

        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(0u64.into()),
            ..Default::default()
        };
        mock.push::<Option<TransactionReceipt>, _>(Some(receipt)).unwrap();

        let err = client.confirm_transaction(tx_hash).await.unwrap_err();
        assert_eq!(err.kind(), "ConfirmationError");
    }
}

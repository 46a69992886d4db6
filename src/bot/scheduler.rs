use anyhow::{anyhow, Result};
use ethers::types::U256;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    blockchain::LedgerGateway,
    bot::{executor::TradeExecutor, metrics::SessionMetrics, timer::Timer},
    config::TradeConfig,
    credentials::TradingAccount,
    dex::QuoteClient,
    error::TradeError,
    types::SwapReceipt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evaluating,
    Trading,
    Waiting,
    Stopped,
}

/// Requests the controller to stop. Cloneable and safe to call at any time.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.sender.send_replace(true) {
            info!("Stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Controller-side view of the stop request.
#[derive(Debug)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    async fn stopped(&mut self) {
        if self.receiver.wait_for(|stopped| *stopped).await.map(|_| ()).is_err() {
            // Every handle is gone, so no stop can arrive any more.
            std::future::pending::<()>().await;
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        StopHandle {
            sender: Arc::new(sender),
        },
        StopSignal { receiver },
    )
}

/// Per-run state. Owned by the controller and nobody else.
///
/// `trade_count` is process-lifetime: "daily" limits reset only on restart.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    trade_count: u32,
    running: bool,
}

impl SessionState {
    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn record_trade(&mut self, max_trades: u32) -> Result<u32> {
        if self.trade_count >= max_trades {
            return Err(anyhow!(
                "trade limit exceeded: {} trades already recorded (max {})",
                self.trade_count,
                max_trades
            ));
        }
        self.trade_count += 1;
        Ok(self.trade_count)
    }
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    LimitReached { count: u32, max: u32 },
    BalanceUnknown(TradeError),
    InsufficientBalance { balance: U256, required: U256 },
    QuoteUnavailable(TradeError),
    BelowMinimum { estimated: U256, minimum: U256 },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::LimitReached { .. } => "limit_reached",
            SkipReason::BalanceUnknown(_) => "balance_unknown",
            SkipReason::InsufficientBalance { .. } => "insufficient_balance",
            SkipReason::QuoteUnavailable(_) => "quote_unavailable",
            SkipReason::BelowMinimum { .. } => "below_minimum",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LimitReached { count, max } => {
                write!(f, "trade limit reached ({}/{})", count, max)
            }
            SkipReason::BalanceUnknown(e) => write!(f, "balance unknown [{}]: {}", e.kind(), e),
            SkipReason::InsufficientBalance { balance, required } => {
                write!(f, "insufficient balance: have {}, need {}", balance, required)
            }
            SkipReason::QuoteUnavailable(e) => write!(f, "no quote [{}]: {}", e.kind(), e),
            SkipReason::BelowMinimum { estimated, minimum } => {
                write!(f, "estimated output {} below minimum {}", estimated, minimum)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Trade { estimated_out: U256 },
    Skip(SkipReason),
}

impl Decision {
    pub fn is_go(&self) -> bool {
        matches!(self, Decision::Trade { .. })
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Traded(SwapReceipt),
    TradeFailed(TradeError),
    Stopped,
}

/// The trading control loop.
///
/// Each tick: wait `poll_interval`, evaluate, and on a go decision run exactly one
/// trade attempt followed by the cooldown (success) or the short backoff (failure).
/// Stop requests are honoured between these steps; an in-flight trade always runs
/// to completion.
pub struct ScheduleController {
    config: TradeConfig,
    account: TradingAccount,
    quotes: Arc<dyn QuoteClient>,
    ledger: Arc<dyn LedgerGateway>,
    executor: TradeExecutor,
    timer: Arc<dyn Timer>,
    stop: StopSignal,
    session: SessionState,
    phase: Phase,
    metrics: SessionMetrics,
}

impl ScheduleController {
    pub fn new(
        config: TradeConfig,
        account: TradingAccount,
        quotes: Arc<dyn QuoteClient>,
        ledger: Arc<dyn LedgerGateway>,
        timer: Arc<dyn Timer>,
        stop: StopSignal,
    ) -> Self {
        let executor = TradeExecutor::new(quotes.clone(), ledger.clone());
        Self {
            config,
            account,
            quotes,
            ledger,
            executor,
            timer,
            stop,
            session: SessionState::default(),
            phase: Phase::Idle,
            metrics: SessionMetrics::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Runs until a stop is requested. Errors never end the loop.
    pub async fn run(mut self) -> SessionMetrics {
        self.session.running = true;
        info!(
            "Loop started for {} (amount {}, min {}, max {} trades, poll {:?}, cooldown {:?})",
            self.config.pair,
            self.config.amount,
            self.config.min_expected_amount,
            self.config.max_daily_trades,
            self.config.poll_interval,
            self.config.cooldown
        );

        loop {
            match self.tick().await {
                Ok(TickOutcome::Stopped) => break,
                Ok(outcome) => debug!("Tick finished: {:?}", outcome),
                Err(e) => {
                    error!("Unexpected error in trading loop: {:#}", e);
                    self.metrics.record_error(&e.to_string());

                    let delay = self.config.error_recovery_delay;
                    warn!("Recovering in {:?}", delay);
                    self.enter(Phase::Waiting);
                    self.wait(delay).await;
                }
            }
        }

        self.session.running = false;
        self.enter(Phase::Stopped);
        info!(
            "Trading loop stopped after {} trade(s)",
            self.session.trade_count
        );
        self.metrics
    }

    /// One pass through Idle → Evaluating → (Trading | skip) → Waiting.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if self.stop.is_stopped() {
            return Ok(self.halt());
        }

        self.enter(Phase::Idle);
        self.wait(self.config.poll_interval).await;
        if self.stop.is_stopped() {
            return Ok(self.halt());
        }

        self.enter(Phase::Evaluating);
        self.metrics.record_evaluation();
        let estimated_out = match self.should_trade().await {
            Decision::Trade { estimated_out } => estimated_out,
            Decision::Skip(reason) => {
                self.metrics.record_skip(reason.label());
                self.enter(Phase::Idle);
                return Ok(TickOutcome::Skipped(reason));
            }
        };

        if self.stop.is_stopped() {
            info!("Stop requested during evaluation; not starting a trade");
            return Ok(self.halt());
        }

        self.enter(Phase::Trading);
        let attempt_id = Uuid::new_v4();
        let span = info_span!("trade", attempt = %attempt_id);
        info!(
            parent: &span,
            "Conditions met (estimated {} >= minimum {}), executing trade {}/{}",
            estimated_out,
            self.config.min_expected_amount,
            self.session.trade_count + 1,
            self.config.max_daily_trades
        );

        let result = self
            .executor
            .execute(&self.config, &self.account)
            .instrument(span)
            .await;

        match result {
            Ok(receipt) => {
                if !receipt.is_confirmed() {
                    return Err(anyhow!(
                        "attempt {} returned unconfirmed receipt for {:?}: {:?}",
                        attempt_id,
                        receipt.tx_hash,
                        receipt.status
                    ));
                }

                let count = self.session.record_trade(self.config.max_daily_trades)?;
                self.metrics.record_trade_success(&receipt);
                info!(
                    "Trade {}/{} confirmed ({:?}); cooling down for {:?}",
                    count, self.config.max_daily_trades, receipt.tx_hash, self.config.cooldown
                );

                self.enter(Phase::Waiting);
                self.wait(self.config.cooldown).await;
                Ok(TickOutcome::Traded(receipt))
            }
            Err(e) => {
                error!("Trade attempt {} failed [{}]: {}", attempt_id, e.kind(), e);
                self.metrics.record_trade_failure(e.kind(), &e.to_string());

                self.enter(Phase::Waiting);
                self.wait(self.config.failed_trade_backoff).await;
                Ok(TickOutcome::TradeFailed(e))
            }
        }
    }

    /// Decides whether to trade now. Never fails: every problem becomes a skip.
    ///
    /// Order: trade limit, then balance, then quote. A skipped step short-circuits
    /// the remaining ones, so a balance failure means no quote is requested.
    pub async fn should_trade(&self) -> Decision {
        let max = self.config.max_daily_trades;
        if self.session.trade_count >= max {
            return self.skip(SkipReason::LimitReached {
                count: self.session.trade_count,
                max,
            });
        }

        let balance = match self.ledger.get_balance(self.account.address()).await {
            Ok(balance) => balance,
            Err(e) => return self.skip(SkipReason::BalanceUnknown(e)),
        };

        let required = self.config.required_balance();
        if balance < required {
            return self.skip(SkipReason::InsufficientBalance { balance, required });
        }

        let quote = match self
            .quotes
            .get_quote(&self.config.pair, self.config.amount, &self.config.slippage)
            .await
        {
            Ok(quote) => quote,
            Err(e) => return self.skip(SkipReason::QuoteUnavailable(e)),
        };

        if quote.to_amount >= self.config.min_expected_amount {
            Decision::Trade {
                estimated_out: quote.to_amount,
            }
        } else {
            self.skip(SkipReason::BelowMinimum {
                estimated: quote.to_amount,
                minimum: self.config.min_expected_amount,
            })
        }
    }

    fn skip(&self, reason: SkipReason) -> Decision {
        match &reason {
            SkipReason::BalanceUnknown(_) | SkipReason::QuoteUnavailable(_) => {
                warn!("Skipping trade: {}", reason)
            }
            _ => info!("Skipping trade: {}", reason),
        }
        Decision::Skip(reason)
    }

    fn halt(&mut self) -> TickOutcome {
        self.enter(Phase::Stopped);
        TickOutcome::Stopped
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Sleeps through the injected timer, returning early on a stop request.
    async fn wait(&mut self, duration: Duration) {
        let timer = Arc::clone(&self.timer);
        tokio::select! {
            _ = timer.sleep(duration) => {}
            _ = self.stop.stopped() => {
                debug!("Wait of {:?} cut short by stop request", duration);
            }
        }
    }

    #[cfg(test)]
    fn set_trade_count(&mut self, count: u32) {
        self.session.trade_count = count;
    }
}

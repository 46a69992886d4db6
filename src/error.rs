use ethers::types::TxHash;
use thiserror::Error;

/// Failures of a single quote, swap or ledger call.
///
/// Everything except `Credential` is recoverable: the control loop turns it into
/// a skipped decision or a failed-trade entry and keeps running.
#[derive(Error, Debug, Clone)]
pub enum TradeError {
    #[error("quote request failed: {0}")]
    Quote(String),

    #[error("swap build rejected: {0}")]
    SwapBuild(String),

    #[error("transaction submission rejected: {0}")]
    Submission(String),

    #[error("transaction {tx_hash:?} failed on-chain: {reason}")]
    Confirmation { tx_hash: TxHash, reason: String },

    #[error("transaction {tx_hash:?} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { tx_hash: TxHash, attempts: u32 },

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("invalid credentials: {0}")]
    Credential(String),
}

impl TradeError {
    /// Stable label used in log lines and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeError::Quote(_) => "QuoteError",
            TradeError::SwapBuild(_) => "SwapBuildError",
            TradeError::Submission(_) => "SubmissionError",
            TradeError::Confirmation { .. } => "ConfirmationError",
            TradeError::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            TradeError::LedgerUnavailable(_) => "LedgerUnavailable",
            TradeError::Credential(_) => "CredentialError",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TradeError::Credential(_))
    }
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;

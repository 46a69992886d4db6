use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::SwapReceipt;

/// Counters for one run of the bot. Kept in memory only and reported on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub started_at: DateTime<Utc>,
    pub evaluations: u64,
    pub skips: HashMap<String, u64>,
    pub trades_succeeded: u64,
    pub trades_failed: u64,
    pub failures_by_kind: HashMap<String, u64>,
    pub total_settled: U256,
    pub last_tx_hash: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            evaluations: 0,
            skips: HashMap::new(),
            trades_succeeded: 0,
            trades_failed: 0,
            failures_by_kind: HashMap::new(),
            total_settled: U256::zero(),
            last_tx_hash: None,
            error_count: 0,
            last_error: None,
            last_updated: now,
        }
    }

    pub fn record_evaluation(&mut self) {
        self.evaluations += 1;
        self.last_updated = Utc::now();
    }

    pub fn record_skip(&mut self, reason: &str) {
        *self.skips.entry(reason.to_string()).or_insert(0) += 1;
        self.last_updated = Utc::now();
    }

    pub fn record_trade_success(&mut self, receipt: &SwapReceipt) {
        self.trades_succeeded += 1;
        if let Some(settled) = receipt.settled_amount {
            self.total_settled = self.total_settled.saturating_add(settled);
        }
        self.last_tx_hash = Some(format!("{:?}", receipt.tx_hash));
        self.last_updated = Utc::now();
    }

    pub fn record_trade_failure(&mut self, kind: &str, message: &str) {
        self.trades_failed += 1;
        *self.failures_by_kind.entry(kind.to_string()).or_insert(0) += 1;
        self.last_error = Some(format!("{}: {}", kind, message));
        self.last_updated = Utc::now();
    }

    /// Errors that escaped a whole tick.
    pub fn record_error(&mut self, error_message: &str) {
        self.error_count += 1;
        self.last_error = Some(error_message.to_string());
        self.last_updated = Utc::now();
    }

    pub fn trade_attempts(&self) -> u64 {
        self.trades_succeeded + self.trades_failed
    }

    pub fn success_rate(&self) -> f64 {
        match self.trade_attempts() {
            0 => 0.0,
            attempts => self.trades_succeeded as f64 / attempts as f64,
        }
    }

    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Swap Bot Session Report ===\n");
        report.push_str(&format!("Started: {}\n", self.started_at));
        report.push_str(&format!("Evaluations: {}\n", self.evaluations));
        report.push_str(&format!(
            "Trades: {} succeeded, {} failed ({:.1}% success rate)\n",
            self.trades_succeeded,
            self.trades_failed,
            self.success_rate() * 100.0
        ));
        report.push_str(&format!("Total settled (smallest unit): {}\n", self.total_settled));
        report.push_str(&format!("Loop errors: {}\n", self.error_count));

        if let Some(ref tx_hash) = self.last_tx_hash {
            report.push_str(&format!("Last transaction: {}\n", tx_hash));
        }

        if let Some(ref error) = self.last_error {
            report.push_str(&format!("Last error: {}\n", error));
        }

        if !self.skips.is_empty() {
            report.push_str("\n=== Skipped Evaluations ===\n");
            let mut skips: Vec<_> = self.skips.iter().collect();
            skips.sort();
            for (reason, count) in skips {
                report.push_str(&format!("{}: {}\n", reason, count));
            }
        }

        if !self.failures_by_kind.is_empty() {
            report.push_str("\n=== Failed Trades ===\n");
            let mut failures: Vec<_> = self.failures_by_kind.iter().collect();
            failures.sort();
            for (kind, count) in failures {
                report.push_str(&format!("{}: {}\n", kind, count));
            }
        }

        report.push_str(&format!("\nLast Updated: {}\n", self.last_updated));

        report
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize metrics: {}", e))
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

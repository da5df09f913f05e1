use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::trade::{TradeAction, TradeDecision};

/// Local status of a tracked chain operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status reported by the chain client for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTxStatus {
    Pending,
    Confirmed { confirmations: u32 },
    Failed { reason: String },
}

/// Transaction prepared for submission with chain-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTx {
    pub tx_id: Uuid,
    pub agent_id: String,
    pub chain: String,
    pub action: TradeAction,
    pub asset: String,
    pub amount: Decimal,
    pub gas_limit: u64,
    pub priority_fee_gwei: Decimal,
    pub max_slippage: Decimal,
    /// 1-based submission attempt this payload belongs to
    pub attempt: u32,
}

/// Receipt returned by a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_ref: String,
}

/// Tracked lifecycle of one submitted on-chain operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: Uuid,
    pub agent_id: String,
    pub action: TradeAction,
    pub asset: String,
    pub amount: Decimal,
    /// Submission attempts made, including the successful one
    pub attempts: u32,
    pub status: TxStatus,
    pub tx_ref: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority_fee_gwei: Decimal,
    pub failure_reason: Option<String>,
    /// Submitted but outcome unknown locally
    pub needs_reconciliation: bool,
}

impl TransactionRecord {
    pub fn from_decision(decision: &TradeDecision) -> Self {
        let now = Utc::now();
        Self {
            tx_id: Uuid::new_v4(),
            agent_id: decision.agent_id.clone(),
            action: decision.action,
            asset: decision.asset.clone(),
            amount: decision.amount,
            attempts: 0,
            status: TxStatus::Pending,
            tx_ref: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
            priority_fee_gwei: Decimal::ZERO,
            failure_reason: None,
            needs_reconciliation: false,
        }
    }

    pub fn mark_submitted(&mut self, tx_ref: String) {
        let now = Utc::now();
        self.tx_ref = Some(tx_ref);
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_confirmed(&mut self) {
        self.status = TxStatus::Confirmed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TxStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Same agent, asset, direction and amount
    pub fn matches(&self, decision: &TradeDecision) -> bool {
        self.agent_id == decision.agent_id
            && self.asset == decision.asset
            && self.action == decision.action
            && self.amount == decision.amount
    }
}

//! Duplicate submission detection
//!
//! A decision is a duplicate when an unresolved transaction for the same
//! agent, asset, direction and amount was submitted within the window.
//! Unresolved means still pending or failed with an unknown on-chain outcome.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::domain::{TradeDecision, TransactionRecord, TxStatus};

/// Stable fingerprint of a decision's economic content
pub fn fingerprint(decision: &TradeDecision) -> String {
    let mut hasher = Sha256::new();
    hasher.update(decision.agent_id.as_bytes());
    hasher.update(decision.asset.as_bytes());
    hasher.update(decision.action.as_str().as_bytes());
    hasher.update(decision.amount.normalize().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct DedupPolicy {
    window: Duration,
}

impl DedupPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// First unresolved record within the window matching the decision
    pub fn find_duplicate<'a>(
        &self,
        records: &'a [TransactionRecord],
        decision: &TradeDecision,
        now: DateTime<Utc>,
    ) -> Option<&'a TransactionRecord> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());

        records.iter().find(|record| {
            let unresolved = record.status == TxStatus::Pending || record.needs_reconciliation;
            let submitted_at = record.submitted_at.unwrap_or(record.created_at);
            unresolved && record.matches(decision) && now - submitted_at <= window
        })
    }
}

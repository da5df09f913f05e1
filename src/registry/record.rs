use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{
    AgentProfile, LifecycleState, StrategyConfig, TradeAction, TradeDecision, TransactionRecord,
    TxStatus,
};

/// Running totals kept per agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounters {
    pub cycles_run: u64,
    pub cycle_failures: u64,
    pub decisions: u64,
    pub trades_submitted: u64,
    pub trades_confirmed: u64,
    pub trades_failed: u64,
    pub duplicates_suppressed: u64,
}

/// Metadata of the last confirmed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTrade {
    pub tx_id: Uuid,
    pub tx_ref: Option<String>,
    pub asset: String,
    pub action: TradeAction,
    pub amount: Decimal,
    pub confirmed_at: DateTime<Utc>,
}

/// Consistent read-only copy of an agent record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub profile: AgentProfile,
    pub state: LifecycleState,
    pub strategy: Option<StrategyConfig>,
    pub strategy_running: bool,
    pub counters: AgentCounters,
    pub last_action: Option<TradeDecision>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_trade: Option<LastTrade>,
    /// Most recent transactions, oldest first
    pub transactions: Vec<TransactionRecord>,
    pub last_event_sequence: u64,
    /// Set when processing was halted by an internal invariant violation
    pub fault: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSnapshot {
    /// References of submitted transactions still awaiting an outcome
    pub fn pending_tx_refs(&self) -> Vec<String> {
        self.transactions
            .iter()
            .filter(|tx| tx.status == TxStatus::Pending || tx.needs_reconciliation)
            .filter_map(|tx| tx.tx_ref.clone())
            .collect()
    }
}

/// Canonical, registry-owned record of one agent
#[derive(Debug)]
pub(crate) struct AgentRecord {
    pub agent_id: String,
    pub profile: AgentProfile,
    pub state: LifecycleState,
    pub strategy: Option<StrategyConfig>,
    pub strategy_running: bool,
    /// Trigger time of the last DCA cycle
    pub last_run: Option<Instant>,
    /// Trigger time of the last rebalance check
    pub last_check: Option<Instant>,
    pub counters: AgentCounters,
    pub last_action: Option<TradeDecision>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_trade: Option<LastTrade>,
    pub transactions: VecDeque<TransactionRecord>,
    pub last_event_sequence: u64,
    pub fault: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: String, profile: AgentProfile) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            profile,
            state: LifecycleState::Created,
            strategy: None,
            strategy_running: false,
            last_run: None,
            last_check: None,
            counters: AgentCounters::default(),
            last_action: None,
            last_action_at: None,
            last_trade: None,
            transactions: VecDeque::new(),
            last_event_sequence: 0,
            fault: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a record from a stored snapshot; scheduling state starts fresh
    pub fn from_snapshot(snapshot: AgentSnapshot) -> Self {
        Self {
            agent_id: snapshot.agent_id,
            profile: snapshot.profile,
            state: snapshot.state,
            strategy: snapshot.strategy,
            strategy_running: false,
            last_run: None,
            last_check: None,
            counters: snapshot.counters,
            last_action: snapshot.last_action,
            last_action_at: snapshot.last_action_at,
            last_trade: snapshot.last_trade,
            transactions: snapshot.transactions.into_iter().collect(),
            last_event_sequence: 0,
            fault: snapshot.fault,
            created_at: snapshot.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.agent_id.clone(),
            profile: self.profile.clone(),
            state: self.state,
            strategy: self.strategy.clone(),
            strategy_running: self.strategy_running,
            counters: self.counters.clone(),
            last_action: self.last_action.clone(),
            last_action_at: self.last_action_at,
            last_trade: self.last_trade.clone(),
            transactions: self.transactions.iter().cloned().collect(),
            last_event_sequence: self.last_event_sequence,
            fault: self.fault.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn reset_schedule(&mut self) {
        self.last_run = None;
        self.last_check = None;
    }

    /// Insert or replace a transaction, evicting the oldest beyond `limit`
    pub fn upsert_transaction(&mut self, record: &TransactionRecord, limit: usize) {
        if let Some(existing) = self
            .transactions
            .iter_mut()
            .find(|tx| tx.tx_id == record.tx_id)
        {
            *existing = record.clone();
            return;
        }

        self.transactions.push_back(record.clone());
        while self.transactions.len() > limit {
            // Unresolved transactions are kept over settled ones
            match self
                .transactions
                .iter()
                .position(|tx| tx.status.is_terminal() && !tx.needs_reconciliation)
            {
                Some(idx) => {
                    self.transactions.remove(idx);
                }
                None => {
                    self.transactions.pop_front();
                }
            }
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> AgentRecord {
        AgentRecord::new("a1".into(), AgentProfile::new("Alpha", "ALP", "base-sepolia"))
    }

    fn tx(amount: Decimal) -> TransactionRecord {
        TransactionRecord::from_decision(&TradeDecision::buy("a1", "eth", amount, "dca"))
    }

    #[test]
    fn test_history_is_bounded() {
        let mut rec = record();
        for i in 0..5 {
            let mut t = tx(Decimal::from(i));
            t.mark_confirmed();
            rec.upsert_transaction(&t, 3);
        }
        assert_eq!(rec.transactions.len(), 3);
        assert_eq!(rec.transactions[0].amount, dec!(2));
    }

    #[test]
    fn test_unresolved_transactions_survive_eviction() {
        let mut rec = record();
        let mut stuck = tx(dec!(9));
        stuck.mark_failed("confirmation timeout");
        stuck.needs_reconciliation = true;
        rec.upsert_transaction(&stuck, 2);

        for i in 0..3 {
            let mut t = tx(Decimal::from(i));
            t.mark_confirmed();
            rec.upsert_transaction(&t, 2);
        }
        assert!(rec.transactions.iter().any(|t| t.tx_id == stuck.tx_id));
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut rec = record();
        let mut t = tx(dec!(0.1));
        rec.upsert_transaction(&t, 10);
        t.mark_confirmed();
        rec.upsert_transaction(&t, 10);
        assert_eq!(rec.transactions.len(), 1);
        assert_eq!(rec.transactions[0].status, TxStatus::Confirmed);
    }

    #[test]
    fn test_pending_refs() {
        let mut rec = record();
        let mut t = tx(dec!(0.1));
        t.mark_submitted("0x01".into());
        rec.upsert_transaction(&t, 10);
        assert_eq!(rec.snapshot().pending_tx_refs(), vec!["0x01".to_string()]);
    }
}

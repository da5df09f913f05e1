use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Lifecycle state changed (created, configuring, active, paused, terminated)
    Lifecycle,
    /// Strategy attached or replaced
    StrategyAttached,
    /// Strategy Engine produced an evaluation
    Decision,
    /// Cycle ended with an error; recorded, not propagated
    CycleFailed,
    /// Decision suppressed as a duplicate of a pending transaction
    DuplicateSuppressed,
    TxPending,
    TxConfirmed,
    TxFailed,
    /// Registry invariant broken; agent processing halted
    Fault,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Lifecycle => "lifecycle",
            EventKind::StrategyAttached => "strategy_attached",
            EventKind::Decision => "decision",
            EventKind::CycleFailed => "cycle_failed",
            EventKind::DuplicateSuppressed => "duplicate_suppressed",
            EventKind::TxPending => "tx_pending",
            EventKind::TxConfirmed => "tx_confirmed",
            EventKind::TxFailed => "tx_failed",
            EventKind::Fault => "fault",
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            EventKind::TxPending | EventKind::TxConfirmed | EventKind::TxFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable, per-agent ordered notification of a state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub agent_id: String,
    /// Strictly increasing per agent, starting at 1
    pub sequence: u64,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction proposed by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    None,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::None => "none",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ephemeral output of one strategy evaluation; never outlives its cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub agent_id: String,
    pub action: TradeAction,
    pub asset: String,
    pub amount: Decimal,
    pub reason: String,
}

impl TradeDecision {
    pub fn buy(agent_id: &str, asset: &str, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            action: TradeAction::Buy,
            asset: asset.to_string(),
            amount,
            reason: reason.into(),
        }
    }

    pub fn sell(agent_id: &str, asset: &str, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            action: TradeAction::Sell,
            asset: asset.to_string(),
            amount,
            reason: reason.into(),
        }
    }

    pub fn none(agent_id: &str, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            action: TradeAction::None,
            asset: String::new(),
            amount: Decimal::ZERO,
            reason: reason.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.action == TradeAction::None
    }
}

/// One asset's trade skipped because projected slippage exceeded tolerance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageAbort {
    pub asset: String,
    pub action: TradeAction,
    pub amount: Decimal,
    pub projected_slippage: Decimal,
    pub tolerance: Decimal,
}

/// Full result of one Strategy Engine evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Either a single `none` decision or one decision per asset to trade
    pub decisions: Vec<TradeDecision>,
    #[serde(default)]
    pub slippage_aborts: Vec<SlippageAbort>,
}

impl Evaluation {
    pub fn none(agent_id: &str, reason: impl Into<String>) -> Self {
        Self {
            decisions: vec![TradeDecision::none(agent_id, reason)],
            slippage_aborts: Vec::new(),
        }
    }

    pub fn single(decision: TradeDecision) -> Self {
        Self {
            decisions: vec![decision],
            slippage_aborts: Vec::new(),
        }
    }

    /// Decisions that must go to the chain
    pub fn actionable(&self) -> impl Iterator<Item = &TradeDecision> {
        self.decisions.iter().filter(|d| !d.is_none())
    }

    pub fn is_noop(&self) -> bool {
        self.actionable().next().is_none()
    }
}

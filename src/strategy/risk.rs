//! Protective exits
//!
//! Stop-loss and take-profit apply to every strategy variant and are checked
//! before the variant's own logic runs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{MarketSnapshot, StrategyConfig, TradeDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl ExitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTrigger::StopLoss => "stop_loss",
            ExitTrigger::TakeProfit => "take_profit",
        }
    }
}

/// Which exit, if any, the position in `asset` has crossed
pub fn exit_trigger(config: &StrategyConfig, snapshot: &MarketSnapshot, asset: &str) -> Option<ExitTrigger> {
    let risk = config.risk();
    let pnl = snapshot.unrealized_pnl_fraction(asset)?;

    if risk.stop_loss > Decimal::ZERO && -pnl > risk.stop_loss {
        return Some(ExitTrigger::StopLoss);
    }
    if risk.take_profit > Decimal::ZERO && pnl > risk.take_profit {
        return Some(ExitTrigger::TakeProfit);
    }
    None
}

/// Full-position sells for every tracked asset past its stop-loss or take-profit
pub fn protective_exits(
    agent_id: &str,
    config: &StrategyConfig,
    snapshot: &MarketSnapshot,
) -> Vec<TradeDecision> {
    config
        .tracked_assets()
        .iter()
        .filter_map(|asset| {
            let trigger = exit_trigger(config, snapshot, asset)?;
            let pnl = snapshot.unrealized_pnl_fraction(asset)?;
            Some(TradeDecision::sell(
                agent_id,
                asset,
                snapshot.holding(asset),
                format!("{} hit at unrealized pnl {}", trigger.as_str(), pnl.round_dp(4)),
            ))
        })
        .collect()
}

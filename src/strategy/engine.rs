//! Strategy Engine
//!
//! Pure decision logic: a strategy configuration and a market snapshot in,
//! an [`Evaluation`] out. No I/O, no clock, no shared state.

use super::{dca, rebalance, risk};
use crate::domain::{Behavior, Evaluation, MarketSnapshot, StrategyConfig};
use crate::error::{Result, RunereumError};

/// Evaluate one cycle for an agent.
///
/// Protective exits take precedence over the variant logic. Errors are
/// cycle-local (`DataUnavailable` for an unusable snapshot).
pub fn evaluate(
    agent_id: &str,
    config: &StrategyConfig,
    behavior: Behavior,
    snapshot: &MarketSnapshot,
) -> Result<Evaluation> {
    if snapshot.agent_id != agent_id {
        return Err(RunereumError::DataUnavailable(format!(
            "snapshot belongs to agent {}, not {}",
            snapshot.agent_id, agent_id
        )));
    }

    let exits = risk::protective_exits(agent_id, config, snapshot);
    if !exits.is_empty() {
        return Ok(Evaluation {
            decisions: exits,
            slippage_aborts: Vec::new(),
        });
    }

    match config {
        StrategyConfig::Dca(dca) => dca::evaluate(agent_id, dca, behavior, snapshot),
        StrategyConfig::Rebalance(rb) => rebalance::evaluate(agent_id, rb, snapshot),
    }
}

/// Whether a freshly observed snapshot warrants an out-of-schedule evaluation
pub fn snapshot_triggers(config: &StrategyConfig, snapshot: &MarketSnapshot) -> bool {
    let exit = config
        .tracked_assets()
        .iter()
        .any(|asset| risk::exit_trigger(config, snapshot, asset).is_some());
    if exit {
        return true;
    }

    match config {
        StrategyConfig::Dca(_) => false,
        StrategyConfig::Rebalance(rb) => rebalance::exceeds_threshold(rb, snapshot).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskParams, TradeAction};
    use rust_decimal_macros::dec;

    fn dca_config() -> StrategyConfig {
        let risk = RiskParams::new(dec!(5)).with_stop_loss(dec!(0.2));
        StrategyConfig::dca(risk, "eth", 3600, dec!(0.5))
    }

    #[test]
    fn test_stop_loss_overrides_dca() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", dec!(2), dec!(70))
            .with_entry_price("eth", dec!(100));

        let eval = evaluate("a1", &dca_config(), Behavior::Moderate, &snap).unwrap();
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].action, TradeAction::Sell);
        assert_eq!(eval.decisions[0].amount, dec!(2));
        assert!(snapshot_triggers(&dca_config(), &snap));
    }

    #[test]
    fn test_dispatches_to_variant() {
        let snap = MarketSnapshot::new("a1").with_asset("eth", dec!(0), dec!(100));
        let eval = evaluate("a1", &dca_config(), Behavior::Moderate, &snap).unwrap();
        assert_eq!(eval.decisions[0].action, TradeAction::Buy);
        assert!(!snapshot_triggers(&dca_config(), &snap));
    }

    #[test]
    fn test_rebalance_trigger() {
        let config = StrategyConfig::rebalance(
            RiskParams::new(dec!(1000)),
            [("A", dec!(0.6)), ("B", dec!(0.4))],
            dec!(0.05),
        );
        let skewed = MarketSnapshot::new("a1")
            .with_asset("A", dec!(5), dec!(100))
            .with_asset("B", dec!(500), dec!(1));
        assert!(snapshot_triggers(&config, &skewed));

        let close = MarketSnapshot::new("a1")
            .with_asset("A", dec!(6.2), dec!(100))
            .with_asset("B", dec!(380), dec!(1));
        assert!(!snapshot_triggers(&config, &close));
    }

    #[test]
    fn test_foreign_snapshot_rejected() {
        let snap = MarketSnapshot::new("other").with_asset("eth", dec!(0), dec!(100));
        assert!(matches!(
            evaluate("a1", &dca_config(), Behavior::Moderate, &snap),
            Err(RunereumError::DataUnavailable(_))
        ));
    }
}

//! Dollar-cost averaging

use rust_decimal::Decimal;

use super::slippage::{check_trade, SlippageCheck};
use crate::domain::{
    Behavior, DcaStrategy, Evaluation, MarketSnapshot, SlippageAbort, TradeAction, TradeDecision,
};
use crate::error::{Result, RunereumError};

/// Buy the per-interval amount scaled by behavior, capped at the position limit.
///
/// Fails with `DataUnavailable` when the snapshot has no price for the asset.
pub fn evaluate(
    agent_id: &str,
    dca: &DcaStrategy,
    behavior: Behavior,
    snapshot: &MarketSnapshot,
) -> Result<Evaluation> {
    let price = snapshot.price(&dca.asset)?;
    let holding = snapshot.holding(&dca.asset);

    let headroom = dca
        .risk
        .max_position_size
        .checked_sub(holding)
        .ok_or_else(|| snapshot.overflow("position headroom"))?;
    if headroom <= Decimal::ZERO {
        return Ok(Evaluation::none(
            agent_id,
            format!(
                "position cap reached: holding {} of max {}",
                holding, dca.risk.max_position_size
            ),
        ));
    }

    let scaled = dca
        .amount_per_interval
        .checked_mul(behavior.position_multiplier())
        .ok_or_else(|| {
            RunereumError::InvalidConfiguration(format!(
                "amount_per_interval {} overflows when scaled",
                dca.amount_per_interval
            ))
        })?;
    let amount = scaled.min(headroom);
    if amount <= Decimal::ZERO {
        return Ok(Evaluation::none(agent_id, "scaled amount is zero"));
    }

    let trade_value = amount
        .checked_mul(price)
        .ok_or_else(|| snapshot.overflow("trade value"))?;
    let tolerance = dca.risk.slippage_tolerance;
    if let SlippageCheck::Rejected {
        reason,
        estimated_slippage,
    } = check_trade(trade_value, snapshot.depth_of(&dca.asset), tolerance)
    {
        let mut evaluation = Evaluation::none(agent_id, reason);
        evaluation.slippage_aborts.push(SlippageAbort {
            asset: dca.asset.clone(),
            action: TradeAction::Buy,
            amount,
            projected_slippage: estimated_slippage,
            tolerance,
        });
        return Ok(evaluation);
    }

    let reason = if amount < scaled {
        format!("dca buy capped at max position {}", dca.risk.max_position_size)
    } else {
        format!("dca buy every {}s", dca.interval_secs)
    };
    Ok(Evaluation::single(TradeDecision::buy(
        agent_id, &dca.asset, amount, reason,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskParams;
    use rust_decimal_macros::dec;

    fn strategy() -> DcaStrategy {
        DcaStrategy {
            risk: RiskParams::new(dec!(1.0)),
            asset: "eth".into(),
            interval_secs: 86_400,
            amount_per_interval: dec!(0.1),
        }
    }

    fn snapshot(holding: Decimal) -> MarketSnapshot {
        MarketSnapshot::new("a1").with_asset("eth", holding, dec!(2000))
    }

    #[test]
    fn test_first_buy() {
        let eval = evaluate("a1", &strategy(), Behavior::Moderate, &snapshot(dec!(0))).unwrap();
        let decision = &eval.decisions[0];
        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.amount, dec!(0.1));
    }

    #[test]
    fn test_accumulation_caps_at_max_position() {
        let mut holding = Decimal::ZERO;
        for _ in 0..10 {
            let eval = evaluate("a1", &strategy(), Behavior::Moderate, &snapshot(holding)).unwrap();
            holding += eval.decisions[0].amount;
            assert!(holding <= dec!(1.0));
        }
        assert_eq!(holding, dec!(1.0));

        let eval = evaluate("a1", &strategy(), Behavior::Moderate, &snapshot(holding)).unwrap();
        assert!(eval.is_noop());
    }

    #[test]
    fn test_behavior_scaling_and_cap() {
        let eval = evaluate("a1", &strategy(), Behavior::Conservative, &snapshot(dec!(0))).unwrap();
        assert_eq!(eval.decisions[0].amount, dec!(0.05));

        let eval = evaluate("a1", &strategy(), Behavior::Aggressive, &snapshot(dec!(0.95))).unwrap();
        assert_eq!(eval.decisions[0].amount, dec!(0.05));
    }

    #[test]
    fn test_missing_price() {
        let snap = MarketSnapshot::new("a1");
        assert!(matches!(
            evaluate("a1", &strategy(), Behavior::Moderate, &snap),
            Err(RunereumError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_risk_factor_does_not_change_sizing() {
        let mut cautious = strategy();
        cautious.risk.risk_factor = dec!(0.1);
        let base = evaluate("a1", &strategy(), Behavior::Moderate, &snapshot(dec!(0))).unwrap();
        let eval = evaluate("a1", &cautious, Behavior::Moderate, &snapshot(dec!(0))).unwrap();
        assert_eq!(eval.decisions[0].amount, base.decisions[0].amount);
    }

    #[test]
    fn test_extreme_snapshot_is_unavailable_not_a_panic() {
        // trade value leaves the Decimal range
        let mut huge = strategy();
        huge.risk.max_position_size = dec!(100000000000000000000);
        huge.amount_per_interval = dec!(100000000000000000000);
        let snap = MarketSnapshot::new("a1").with_asset("eth", dec!(0), dec!(100000000000000000000));
        assert!(matches!(
            evaluate("a1", &huge, Behavior::Moderate, &snap),
            Err(RunereumError::DataUnavailable(_))
        ));

        // headroom against a nonsensical negative holding
        let snap = MarketSnapshot::new("a1").with_asset("eth", Decimal::MIN, dec!(2000));
        let mut capped = strategy();
        capped.risk.max_position_size = Decimal::MAX;
        assert!(matches!(
            evaluate("a1", &capped, Behavior::Moderate, &snap),
            Err(RunereumError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_vanishing_depth_aborts() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", dec!(0), dec!(1000000000000))
            .with_depth("eth", dec!(0.0000000000000000000000000001));
        let eval = evaluate("a1", &strategy(), Behavior::Moderate, &snap).unwrap();
        assert!(eval.is_noop());
        assert_eq!(eval.slippage_aborts[0].projected_slippage, Decimal::MAX);
    }

    #[test]
    fn test_thin_market_aborts() {
        let snap = snapshot(dec!(0)).with_depth("eth", dec!(1000));
        let eval = evaluate("a1", &strategy(), Behavior::Moderate, &snap).unwrap();
        assert!(eval.is_noop());
        assert_eq!(eval.slippage_aborts.len(), 1);
        assert_eq!(eval.slippage_aborts[0].projected_slippage, dec!(0.2));
    }
}

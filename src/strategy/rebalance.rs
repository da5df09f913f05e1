//! Target-allocation rebalancing
//!
//! The threshold decides whether to rebalance. Once any tracked asset is past
//! it, every tracked asset is traded back to its target; the deviations sum
//! to zero, so the tracked total is conserved and each asset lands on target.
//! An asset whose projected slippage exceeds tolerance has only its own trade
//! aborted.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::slippage::{check_trade, SlippageCheck};
use crate::domain::{
    Evaluation, MarketSnapshot, RebalanceStrategy, SlippageAbort, TradeAction, TradeDecision,
};
use crate::error::Result;

/// Quantity precision of proposed trades
const AMOUNT_DP: u32 = 8;

struct Gap {
    actual: Decimal,
    target: Decimal,
    deviation: Decimal,
}

fn gaps(rebalance: &RebalanceStrategy, snapshot: &MarketSnapshot) -> Result<BTreeMap<String, Gap>> {
    let current = snapshot.allocation(rebalance.target_allocation.keys())?;
    let mut gaps = BTreeMap::new();
    for (asset, target) in &rebalance.target_allocation {
        let actual = current.get(asset).copied().unwrap_or(Decimal::ZERO);
        let deviation = actual
            .checked_sub(*target)
            .ok_or_else(|| snapshot.overflow(&format!("deviation of {}", asset)))?;
        gaps.insert(
            asset.clone(),
            Gap {
                actual,
                target: *target,
                deviation,
            },
        );
    }
    Ok(gaps)
}

/// Current minus target allocation per tracked asset
pub fn deviations(
    rebalance: &RebalanceStrategy,
    snapshot: &MarketSnapshot,
) -> Result<BTreeMap<String, Decimal>> {
    Ok(gaps(rebalance, snapshot)?
        .into_iter()
        .map(|(asset, gap)| (asset, gap.deviation))
        .collect())
}

/// True when any tracked asset deviates from target by more than the threshold
pub fn exceeds_threshold(rebalance: &RebalanceStrategy, snapshot: &MarketSnapshot) -> Result<bool> {
    Ok(deviations(rebalance, snapshot)?
        .values()
        .any(|d| d.abs() > rebalance.rebalance_threshold))
}

pub fn evaluate(
    agent_id: &str,
    rebalance: &RebalanceStrategy,
    snapshot: &MarketSnapshot,
) -> Result<Evaluation> {
    let total = snapshot.total_value(rebalance.target_allocation.keys())?;
    if total <= Decimal::ZERO {
        return Ok(Evaluation::none(agent_id, "portfolio has no value to rebalance"));
    }

    let gaps = gaps(rebalance, snapshot)?;
    if !gaps
        .values()
        .any(|gap| gap.deviation.abs() > rebalance.rebalance_threshold)
    {
        return Ok(Evaluation::none(agent_id, "all assets within rebalance threshold"));
    }

    let tolerance = rebalance.risk.slippage_tolerance;
    let mut sells = Vec::new();
    let mut buys = Vec::new();
    let mut aborts = Vec::new();

    for (asset, gap) in gaps {
        if gap.deviation.is_zero() {
            continue;
        }

        let price = snapshot.price(&asset)?;
        let trade_value = gap
            .deviation
            .abs()
            .checked_mul(total)
            .ok_or_else(|| snapshot.overflow(&format!("trade value of {}", asset)))?;
        let amount = trade_value
            .checked_div(price)
            .ok_or_else(|| snapshot.overflow(&format!("trade amount of {}", asset)))?
            .round_dp(AMOUNT_DP);
        if amount <= Decimal::ZERO {
            continue;
        }
        let action = if gap.deviation > Decimal::ZERO {
            TradeAction::Sell
        } else {
            TradeAction::Buy
        };

        match check_trade(trade_value, snapshot.depth_of(&asset), tolerance) {
            SlippageCheck::Approved { .. } => {
                let reason = format!(
                    "allocation {} vs target {}",
                    gap.actual.round_dp(4),
                    gap.target
                );
                match action {
                    TradeAction::Sell => sells.push(TradeDecision::sell(agent_id, &asset, amount, reason)),
                    _ => buys.push(TradeDecision::buy(agent_id, &asset, amount, reason)),
                }
            }
            SlippageCheck::Rejected {
                estimated_slippage, ..
            } => aborts.push(SlippageAbort {
                asset,
                action,
                amount,
                projected_slippage: estimated_slippage,
                tolerance,
            }),
        }
    }

    // Sells go first so their proceeds fund the buys
    let mut decisions = sells;
    decisions.append(&mut buys);

    let mut evaluation = if decisions.is_empty() {
        let reason = if aborts.is_empty() {
            "rebalance trades round to zero"
        } else {
            "every rebalance trade exceeded slippage tolerance"
        };
        Evaluation::none(agent_id, reason)
    } else {
        Evaluation {
            decisions,
            slippage_aborts: Vec::new(),
        }
    };
    evaluation.slippage_aborts = aborts;
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskParams;
    use rust_decimal_macros::dec;

    fn strategy() -> RebalanceStrategy {
        RebalanceStrategy {
            risk: RiskParams::new(dec!(1000000)),
            target_allocation: [("A".to_string(), dec!(0.6)), ("B".to_string(), dec!(0.4))]
                .into_iter()
                .collect(),
            rebalance_threshold: dec!(0.05),
        }
    }

    /// Portfolio worth 1000 with A priced at 100 and B at 1
    fn snapshot(a_fraction: Decimal) -> MarketSnapshot {
        let a_value = a_fraction * dec!(1000);
        MarketSnapshot::new("a1")
            .with_asset("A", a_value / dec!(100), dec!(100))
            .with_asset("B", dec!(1000) - a_value, dec!(1))
    }

    #[test]
    fn test_sells_overweight_and_buys_underweight() {
        let eval = evaluate("a1", &strategy(), &snapshot(dec!(0.5))).unwrap();
        assert_eq!(eval.decisions.len(), 2);

        let sell = &eval.decisions[0];
        assert_eq!((sell.action, sell.asset.as_str(), sell.amount), (TradeAction::Sell, "B", dec!(100)));
        let buy = &eval.decisions[1];
        assert_eq!((buy.action, buy.asset.as_str(), buy.amount), (TradeAction::Buy, "A", dec!(1)));
    }

    fn apply(snap: &MarketSnapshot, eval: &Evaluation) -> MarketSnapshot {
        let mut after = snap.clone();
        for d in eval.actionable() {
            let held = after.holding(&d.asset);
            let qty = match d.action {
                TradeAction::Buy => held + d.amount,
                _ => held - d.amount,
            };
            after.holdings.insert(d.asset.clone(), qty);
        }
        after
    }

    fn three_way() -> RebalanceStrategy {
        RebalanceStrategy {
            risk: RiskParams::new(dec!(1000000)),
            target_allocation: [
                ("A".to_string(), dec!(0.5)),
                ("B".to_string(), dec!(0.25)),
                ("C".to_string(), dec!(0.25)),
            ]
            .into_iter()
            .collect(),
            rebalance_threshold: dec!(0.05),
        }
    }

    #[test]
    fn test_trades_restore_targets() {
        let snap = snapshot(dec!(0.5));
        let eval = evaluate("a1", &strategy(), &snap).unwrap();
        assert!(!exceeds_threshold(&strategy(), &apply(&snap, &eval)).unwrap());
    }

    #[test]
    fn test_one_sided_breach_rebalances_every_asset() {
        // only A is past the threshold; B and C are 0.05 under, inside it
        let snap = MarketSnapshot::new("a1")
            .with_asset("A", dec!(600), dec!(1))
            .with_asset("B", dec!(200), dec!(1))
            .with_asset("C", dec!(200), dec!(1));
        let eval = evaluate("a1", &three_way(), &snap).unwrap();

        assert!(eval.slippage_aborts.is_empty());
        let trades: Vec<_> = eval
            .decisions
            .iter()
            .map(|d| (d.action, d.asset.as_str(), d.amount))
            .collect();
        assert_eq!(
            trades,
            vec![
                (TradeAction::Sell, "A", dec!(100)),
                (TradeAction::Buy, "B", dec!(50)),
                (TradeAction::Buy, "C", dec!(50)),
            ]
        );

        let after = apply(&snap, &eval);
        let alloc = after.allocation(three_way().target_allocation.keys()).unwrap();
        assert_eq!(alloc["A"], dec!(0.5));
        assert_eq!(alloc["B"], dec!(0.25));
        assert_eq!(alloc["C"], dec!(0.25));
    }

    #[test]
    fn test_every_asset_ends_in_band_or_aborts() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("A", dec!(7), dec!(100))
            .with_asset("B", dec!(130), dec!(1))
            .with_asset("C", dec!(0.85), dec!(200))
            .with_depth("C", dec!(100));
        let eval = evaluate("a1", &three_way(), &snap).unwrap();
        let aborted: Vec<_> = eval.slippage_aborts.iter().map(|a| a.asset.clone()).collect();
        assert_eq!(aborted, vec!["C".to_string()]);

        // C's buy was aborted; A and B are on target measured against the conserved total
        let after = apply(&snap, &eval);
        let total = snap.total_value(three_way().target_allocation.keys()).unwrap();
        for asset in ["A", "B"] {
            let fraction = after.value_of(asset).unwrap() / total;
            assert_eq!(fraction, three_way().target_allocation[asset]);
        }
    }

    #[test]
    fn test_extreme_snapshot_is_unavailable_not_a_panic() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("A", dec!(10000000000000000000000), dec!(100000000))
            .with_asset("B", dec!(1), dec!(1));
        assert!(matches!(
            evaluate("a1", &strategy(), &snap),
            Err(crate::error::RunereumError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_within_threshold_is_none() {
        let eval = evaluate("a1", &strategy(), &snapshot(dec!(0.62))).unwrap();
        assert!(eval.is_noop());
        assert!(eval.slippage_aborts.is_empty());
        assert!(!exceeds_threshold(&strategy(), &snapshot(dec!(0.62))).unwrap());
        assert!(exceeds_threshold(&strategy(), &snapshot(dec!(0.5))).unwrap());
    }

    #[test]
    fn test_slippage_abort_is_per_asset() {
        // B's book is too thin for a 100 quote trade at 1% tolerance
        let snap = snapshot(dec!(0.5)).with_depth("B", dec!(5000));
        let eval = evaluate("a1", &strategy(), &snap).unwrap();

        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].asset, "A");
        assert_eq!(eval.slippage_aborts.len(), 1);
        assert_eq!(eval.slippage_aborts[0].asset, "B");
        assert_eq!(eval.slippage_aborts[0].action, TradeAction::Sell);
    }

    #[test]
    fn test_missing_price_fails() {
        let snap = MarketSnapshot::new("a1").with_asset("A", dec!(1), dec!(100));
        assert!(evaluate("a1", &strategy(), &snap).is_err());
    }
}

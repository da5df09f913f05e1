use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, RunereumError};

/// Point-in-time read of prices and one agent's holdings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub agent_id: String,
    /// Asset -> quantity held
    pub holdings: HashMap<String, Decimal>,
    /// Asset -> price in the quote unit
    pub prices: HashMap<String, Decimal>,
    /// Asset -> average entry price of the current position
    #[serde(default)]
    pub entry_prices: HashMap<String, Decimal>,
    /// Asset -> quote value available before price impact reaches 100%
    #[serde(default)]
    pub depth: HashMap<String, Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            holdings: HashMap::new(),
            prices: HashMap::new(),
            entry_prices: HashMap::new(),
            depth: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_asset(mut self, asset: &str, quantity: Decimal, price: Decimal) -> Self {
        self.holdings.insert(asset.to_string(), quantity);
        self.prices.insert(asset.to_string(), price);
        self
    }

    pub fn with_entry_price(mut self, asset: &str, entry_price: Decimal) -> Self {
        self.entry_prices.insert(asset.to_string(), entry_price);
        self
    }

    pub fn with_depth(mut self, asset: &str, depth: Decimal) -> Self {
        self.depth.insert(asset.to_string(), depth);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Quantity held; absent assets count as zero
    pub fn holding(&self, asset: &str) -> Decimal {
        self.holdings.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Price of an asset; missing or non-positive prices are unavailable data
    pub fn price(&self, asset: &str) -> Result<Decimal> {
        match self.prices.get(asset) {
            Some(p) if *p > Decimal::ZERO => Ok(*p),
            _ => Err(RunereumError::DataUnavailable(format!(
                "no price for {} in snapshot of agent {}",
                asset, self.agent_id
            ))),
        }
    }

    /// Error for snapshot arithmetic that leaves the `Decimal` range
    pub fn overflow(&self, what: &str) -> RunereumError {
        RunereumError::DataUnavailable(format!(
            "{} overflows in snapshot of agent {}",
            what, self.agent_id
        ))
    }

    /// Quote value of a single position
    pub fn value_of(&self, asset: &str) -> Result<Decimal> {
        self.holding(asset)
            .checked_mul(self.price(asset)?)
            .ok_or_else(|| self.overflow(&format!("value of {}", asset)))
    }

    /// Total quote value across the given assets
    pub fn total_value<'a, I>(&self, assets: I) -> Result<Decimal>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut total = Decimal::ZERO;
        for asset in assets {
            total = total
                .checked_add(self.value_of(asset)?)
                .ok_or_else(|| self.overflow("portfolio value"))?;
        }
        Ok(total)
    }

    /// Current allocation fractions across the given assets
    pub fn allocation<'a, I>(&self, assets: I) -> Result<BTreeMap<String, Decimal>>
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        let total = self.total_value(assets.clone())?;
        let mut fractions = BTreeMap::new();
        for asset in assets {
            let fraction = if total > Decimal::ZERO {
                self.value_of(asset)?
                    .checked_div(total)
                    .ok_or_else(|| self.overflow(&format!("allocation of {}", asset)))?
            } else {
                Decimal::ZERO
            };
            fractions.insert(asset.clone(), fraction);
        }
        Ok(fractions)
    }

    /// Unrealized PnL of a position as a fraction of entry price
    pub fn unrealized_pnl_fraction(&self, asset: &str) -> Option<Decimal> {
        if self.holding(asset) <= Decimal::ZERO {
            return None;
        }
        let entry = self.entry_prices.get(asset).copied()?;
        if entry <= Decimal::ZERO {
            return None;
        }
        let price = self.price(asset).ok()?;
        price.checked_sub(entry)?.checked_div(entry)
    }

    pub fn depth_of(&self, asset: &str) -> Option<Decimal> {
        self.depth.get(asset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn two_asset() -> MarketSnapshot {
        MarketSnapshot::new("a1")
            .with_asset("eth", dec!(1), dec!(2000))
            .with_asset("usdc", dec!(2000), dec!(1))
    }

    #[test]
    fn test_allocation() {
        let snap = two_asset();
        let assets = vec!["eth".to_string(), "usdc".to_string()];
        let alloc = snap.allocation(&assets).unwrap();
        assert_eq!(alloc["eth"], dec!(0.5));
        assert_eq!(alloc["usdc"], dec!(0.5));
    }

    #[test]
    fn test_allocation_empty_portfolio() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", dec!(0), dec!(2000))
            .with_asset("usdc", dec!(0), dec!(1));
        let assets = vec!["eth".to_string(), "usdc".to_string()];
        let alloc = snap.allocation(&assets).unwrap();
        assert_eq!(alloc["eth"], Decimal::ZERO);
    }

    #[test]
    fn test_missing_price_is_unavailable() {
        let snap = two_asset();
        assert!(matches!(
            snap.price("btc"),
            Err(RunereumError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_value_overflow_is_unavailable() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", dec!(10000000000000000000000), dec!(100000000))
            .with_asset("usdc", dec!(1), dec!(1));
        assert!(matches!(
            snap.value_of("eth"),
            Err(RunereumError::DataUnavailable(_))
        ));

        let assets = vec!["eth".to_string(), "usdc".to_string()];
        assert!(matches!(
            snap.allocation(&assets),
            Err(RunereumError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_total_value_overflow_is_unavailable() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", Decimal::MAX, Decimal::ONE)
            .with_asset("usdc", Decimal::MAX, Decimal::ONE);
        let assets = vec!["eth".to_string(), "usdc".to_string()];
        assert!(snap.total_value(&assets).is_err());
    }

    #[test]
    fn test_unrealized_pnl_overflow_is_none() {
        let snap = MarketSnapshot::new("a1")
            .with_asset("eth", dec!(1), dec!(1000000000000))
            .with_entry_price("eth", dec!(0.0000000000000000000000000001));
        assert_eq!(snap.unrealized_pnl_fraction("eth"), None);
    }

    #[test]
    fn test_unrealized_pnl() {
        let snap = two_asset().with_entry_price("eth", dec!(2500));
        assert_eq!(snap.unrealized_pnl_fraction("eth"), Some(dec!(-0.2)));
        assert_eq!(snap.unrealized_pnl_fraction("usdc"), None);
    }
}

//! In-memory market feed
//!
//! Prices and depth are global per asset, holdings are per agent. Fills
//! reported by the paper chain client move holdings and entry prices.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use super::traits::MarketFeed;
use crate::domain::{MarketSnapshot, TradeAction};
use crate::error::{Result, RunereumError};

#[derive(Debug, Clone, Default)]
struct Portfolio {
    holdings: HashMap<String, Decimal>,
    entry_prices: HashMap<String, Decimal>,
}

#[derive(Default)]
pub struct PaperMarketFeed {
    prices: DashMap<String, Decimal>,
    depth: DashMap<String, Decimal>,
    portfolios: DashMap<String, Portfolio>,
    /// Agent -> number of upcoming snapshot requests to fail
    outages: DashMap<String, u32>,
}

impl PaperMarketFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, asset: &str, price: Decimal) -> Self {
        self.set_price(asset, price);
        self
    }

    pub fn set_price(&self, asset: &str, price: Decimal) {
        self.prices.insert(asset.to_string(), price);
    }

    pub fn set_depth(&self, asset: &str, depth: Decimal) {
        self.depth.insert(asset.to_string(), depth);
    }

    pub fn set_holding(&self, agent_id: &str, asset: &str, quantity: Decimal) {
        let mut portfolio = self.portfolios.entry(agent_id.to_string()).or_default();
        portfolio.holdings.insert(asset.to_string(), quantity);
    }

    pub fn set_entry_price(&self, agent_id: &str, asset: &str, price: Decimal) {
        let mut portfolio = self.portfolios.entry(agent_id.to_string()).or_default();
        portfolio.entry_prices.insert(asset.to_string(), price);
    }

    pub fn holding(&self, agent_id: &str, asset: &str) -> Decimal {
        self.portfolios
            .get(agent_id)
            .and_then(|p| p.holdings.get(asset).copied())
            .unwrap_or(Decimal::ZERO)
    }

    /// Fail the next `count` snapshot requests for an agent
    pub fn fail_next(&self, agent_id: &str, count: u32) {
        self.outages.insert(agent_id.to_string(), count);
    }

    /// Apply a settled trade at the current price
    pub fn apply_fill(&self, agent_id: &str, action: TradeAction, asset: &str, amount: Decimal) {
        let price = self.prices.get(asset).map(|p| *p);
        let mut portfolio = self.portfolios.entry(agent_id.to_string()).or_default();
        let held = portfolio.holdings.get(asset).copied().unwrap_or(Decimal::ZERO);

        match action {
            TradeAction::Buy => {
                let new_qty = held.saturating_add(amount);
                if let Some(price) = price {
                    let prev_entry = portfolio.entry_prices.get(asset).copied().unwrap_or(price);
                    let entry = if new_qty > Decimal::ZERO {
                        weighted_entry(prev_entry, held, price, amount, new_qty).unwrap_or(price)
                    } else {
                        price
                    };
                    portfolio.entry_prices.insert(asset.to_string(), entry);
                }
                portfolio.holdings.insert(asset.to_string(), new_qty);
            }
            TradeAction::Sell => {
                let new_qty = held.saturating_sub(amount).max(Decimal::ZERO);
                if new_qty == Decimal::ZERO {
                    portfolio.entry_prices.remove(asset);
                }
                portfolio.holdings.insert(asset.to_string(), new_qty);
            }
            TradeAction::None => {}
        }
        debug!(agent_id, asset, %action, %amount, "paper fill applied");
    }

    fn take_outage(&self, agent_id: &str) -> bool {
        match self.outages.get_mut(agent_id) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn weighted_entry(
    prev_entry: Decimal,
    held: Decimal,
    price: Decimal,
    amount: Decimal,
    new_qty: Decimal,
) -> Option<Decimal> {
    prev_entry
        .checked_mul(held)?
        .checked_add(price.checked_mul(amount)?)?
        .checked_div(new_qty)
}

#[async_trait]
impl MarketFeed for PaperMarketFeed {
    async fn get_snapshot(&self, agent_id: &str) -> Result<MarketSnapshot> {
        if self.take_outage(agent_id) {
            return Err(RunereumError::DataUnavailable(format!(
                "paper feed outage for agent {}",
                agent_id
            )));
        }

        let mut snapshot = MarketSnapshot::new(agent_id);
        snapshot.prices = self
            .prices
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        snapshot.depth = self
            .depth
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if let Some(portfolio) = self.portfolios.get(agent_id) {
            snapshot.holdings = portfolio.holdings.clone();
            snapshot.entry_prices = portfolio.entry_prices.clone();
        }
        Ok(snapshot)
    }
}

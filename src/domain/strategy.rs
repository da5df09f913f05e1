use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, RunereumError};

/// Allowed deviation of a target allocation's sum from 1.0
pub const ALLOCATION_SUM_TOLERANCE: Decimal = dec!(0.001);

/// Risk parameters shared by every strategy variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Maximum position size in asset units
    pub max_position_size: Decimal,
    /// Unrealized loss fraction that forces a full exit (0 = disabled)
    #[serde(default)]
    pub stop_loss: Decimal,
    /// Unrealized gain fraction that forces a full exit (0 = disabled)
    #[serde(default)]
    pub take_profit: Decimal,
    /// Maximum projected slippage accepted per trade
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    /// Operator-declared risk appetite in [0, 1]. Validated and reported with
    /// the strategy but not applied to sizing; DCA sizing scales by the
    /// agent's `Behavior::position_multiplier` only.
    #[serde(default = "default_risk_factor")]
    pub risk_factor: Decimal,
}

fn default_slippage_tolerance() -> Decimal {
    dec!(0.01)
}

fn default_risk_factor() -> Decimal {
    dec!(0.5)
}

impl RiskParams {
    pub fn new(max_position_size: Decimal) -> Self {
        Self {
            max_position_size,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            slippage_tolerance: default_slippage_tolerance(),
            risk_factor: default_risk_factor(),
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = stop_loss;
        self
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = take_profit;
        self
    }

    pub fn with_slippage_tolerance(mut self, tolerance: Decimal) -> Self {
        self.slippage_tolerance = tolerance;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_position_size <= Decimal::ZERO {
            return Err(RunereumError::InvalidConfiguration(format!(
                "max_position_size must be positive, got {}",
                self.max_position_size
            )));
        }
        for (name, value) in [
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
            ("slippage_tolerance", self.slippage_tolerance),
            ("risk_factor", self.risk_factor),
        ] {
            check_fraction(name, value)?;
        }
        Ok(())
    }
}

/// Dollar-cost-averaging parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaStrategy {
    pub risk: RiskParams,
    /// Asset accumulated each interval
    pub asset: String,
    pub interval_secs: u64,
    pub amount_per_interval: Decimal,
}

impl DcaStrategy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Target-allocation rebalancing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceStrategy {
    pub risk: RiskParams,
    /// Asset -> target fraction of portfolio value
    pub target_allocation: BTreeMap<String, Decimal>,
    /// Deviation from target that triggers a rebalance
    pub rebalance_threshold: Decimal,
}

/// Closed set of strategy variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Dca(DcaStrategy),
    Rebalance(RebalanceStrategy),
}

impl StrategyConfig {
    pub fn dca(
        risk: RiskParams,
        asset: impl Into<String>,
        interval_secs: u64,
        amount_per_interval: Decimal,
    ) -> Self {
        StrategyConfig::Dca(DcaStrategy {
            risk,
            asset: asset.into(),
            interval_secs,
            amount_per_interval,
        })
    }

    pub fn rebalance<I, S>(risk: RiskParams, targets: I, rebalance_threshold: Decimal) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        StrategyConfig::Rebalance(RebalanceStrategy {
            risk,
            target_allocation: targets.into_iter().map(|(a, f)| (a.into(), f)).collect(),
            rebalance_threshold,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::Dca(_) => "dca",
            StrategyConfig::Rebalance(_) => "rebalance",
        }
    }

    pub fn risk(&self) -> &RiskParams {
        match self {
            StrategyConfig::Dca(s) => &s.risk,
            StrategyConfig::Rebalance(s) => &s.risk,
        }
    }

    /// Assets whose positions this strategy manages
    pub fn tracked_assets(&self) -> Vec<String> {
        match self {
            StrategyConfig::Dca(s) => vec![s.asset.clone()],
            StrategyConfig::Rebalance(s) => s.target_allocation.keys().cloned().collect(),
        }
    }

    /// Validate parameters before attachment
    pub fn validate(&self) -> Result<()> {
        self.risk().validate()?;

        match self {
            StrategyConfig::Dca(s) => {
                if s.asset.trim().is_empty() {
                    return Err(RunereumError::InvalidConfiguration(
                        "dca asset must not be empty".to_string(),
                    ));
                }
                if s.interval_secs == 0 {
                    return Err(RunereumError::InvalidConfiguration(
                        "dca interval must be positive".to_string(),
                    ));
                }
                if s.amount_per_interval <= Decimal::ZERO {
                    return Err(RunereumError::InvalidConfiguration(format!(
                        "dca amount_per_interval must be positive, got {}",
                        s.amount_per_interval
                    )));
                }
            }
            StrategyConfig::Rebalance(s) => {
                if s.target_allocation.is_empty() {
                    return Err(RunereumError::InvalidConfiguration(
                        "rebalance target_allocation must not be empty".to_string(),
                    ));
                }
                for (asset, fraction) in &s.target_allocation {
                    if asset.trim().is_empty() {
                        return Err(RunereumError::InvalidConfiguration(
                            "rebalance asset names must not be empty".to_string(),
                        ));
                    }
                    check_fraction(&format!("target_allocation.{}", asset), *fraction)?;
                }
                let sum: Decimal = s.target_allocation.values().copied().sum();
                if (sum - Decimal::ONE).abs() > ALLOCATION_SUM_TOLERANCE {
                    return Err(RunereumError::InvalidConfiguration(format!(
                        "target allocation must sum to 1.0, got {}",
                        sum
                    )));
                }
                if s.rebalance_threshold <= Decimal::ZERO || s.rebalance_threshold > Decimal::ONE {
                    return Err(RunereumError::InvalidConfiguration(format!(
                        "rebalance_threshold must be in (0, 1], got {}",
                        s.rebalance_threshold
                    )));
                }
            }
        }

        Ok(())
    }

    /// Parse and validate a strategy from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: StrategyConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

fn check_fraction(name: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(RunereumError::InvalidConfiguration(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

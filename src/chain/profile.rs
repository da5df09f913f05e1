//! Per-chain transaction parameters

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Gas and confirmation settings for one chain
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainProfile {
    pub gas_limit: u64,
    /// Base priority fee in gwei, before retry bumps
    pub priority_fee_gwei: Decimal,
    pub block_time_secs: u64,
    /// Confirmations required before a transaction counts as confirmed
    pub confirmations: u32,
}

impl ChainProfile {
    pub fn base_mainnet() -> Self {
        Self {
            gas_limit: 500_000,
            priority_fee_gwei: dec!(2),
            block_time_secs: 2,
            confirmations: 3,
        }
    }

    pub fn base_sepolia() -> Self {
        Self {
            gas_limit: 800_000,
            priority_fee_gwei: dec!(1),
            block_time_secs: 2,
            confirmations: 1,
        }
    }

    /// Fallback for chains without a profile
    pub fn generic() -> Self {
        Self {
            gas_limit: 500_000,
            priority_fee_gwei: dec!(1),
            block_time_secs: 12,
            confirmations: 2,
        }
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_secs.max(1))
    }

    /// Priority fee for a 1-based submission attempt.
    ///
    /// Each retry adds `bump_pct` of the base fee, up to `max_bump_pct` in total.
    pub fn priority_fee_for_attempt(&self, attempt: u32, bump_pct: Decimal, max_bump_pct: Decimal) -> Decimal {
        let retries = Decimal::from(attempt.saturating_sub(1));
        let bump = (bump_pct * retries).min(max_bump_pct).max(Decimal::ZERO);
        self.priority_fee_gwei * (Decimal::ONE + bump)
    }
}

/// Profiles by chain id; unknown chains resolve to [`ChainProfile::generic`]
#[derive(Debug, Clone)]
pub struct ChainProfiles {
    profiles: HashMap<String, ChainProfile>,
}

impl ChainProfiles {
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("base-mainnet".to_string(), ChainProfile::base_mainnet());
        profiles.insert("base-sepolia".to_string(), ChainProfile::base_sepolia());
        Self { profiles }
    }

    /// Built-in profiles with configured ones layered on top
    pub fn with_overrides(overrides: &HashMap<String, ChainProfile>) -> Self {
        let mut profiles = Self::builtin();
        for (chain, profile) in overrides {
            profiles.profiles.insert(chain.clone(), profile.clone());
        }
        profiles
    }

    pub fn resolve(&self, chain: &str) -> ChainProfile {
        self.profiles
            .get(chain)
            .cloned()
            .unwrap_or_else(ChainProfile::generic)
    }
}

impl Default for ChainProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}

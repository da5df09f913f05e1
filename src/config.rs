use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ChainProfile;
use crate::domain::{AgentProfile, Behavior, CapabilitySet, SocialPresence, StrategyConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Chain profiles by chain id, layered over the built-in ones
    #[serde(default)]
    pub chains: HashMap<String, ChainProfile>,
    /// Agents created at startup
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
    /// Market state for the paper adapters
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler tick period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Minimum time between two rebalance evaluations of one agent
    #[serde(default = "default_rebalance_min_recheck_secs")]
    pub rebalance_min_recheck_secs: u64,
    /// Timeout for one market snapshot request
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_rebalance_min_recheck_secs() -> u64 {
    60
}

fn default_snapshot_timeout_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            rebalance_min_recheck_secs: default_rebalance_min_recheck_secs(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn rebalance_min_recheck(&self) -> Duration {
        Duration::from_secs(self.rebalance_min_recheck_secs)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// Submission, confirmation and dedup policy of the chain coordinator
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Submission attempts per decision, the first one included
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Timeout of one submit call
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Time allowed from successful submission to required confirmations
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Status polling period; the chain's block time when unset
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Window in which an identical unresolved transaction suppresses a new one
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// Priority fee increase per retry (0.1 = 10% of the base fee)
    #[serde(default = "default_gas_bump_pct")]
    pub gas_bump_pct: Decimal,
    /// Cap on the total priority fee increase
    #[serde(default = "default_max_gas_bump_pct")]
    pub max_gas_bump_pct: Decimal,
}

fn default_max_submit_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_dedup_window_ms() -> u64 {
    60_000
}

fn default_gas_bump_pct() -> Decimal {
    dec!(0.1)
}

fn default_max_gas_bump_pct() -> Decimal {
    dec!(0.5)
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: default_max_submit_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            poll_interval_ms: None,
            dedup_window_ms: default_dedup_window_ms(),
            gas_bump_pct: default_gas_bump_pct(),
            max_gas_bump_pct: default_max_gas_bump_pct(),
        }
    }
}

impl ChainConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Events buffered per subscriber before it is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Filter directives; `RUST_LOG` wins when set
    #[serde(default)]
    pub level: Option<String>,
    /// Enable JSON formatted console logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Prices and depth the paper market starts with, keyed by asset
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaperConfig {
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    #[serde(default)]
    pub depth: HashMap<String, Decimal>,
}

/// Agent created from configuration at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSeed {
    /// Fixed id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub ticker: String,
    pub chain: String,
    #[serde(default)]
    pub behavior: Behavior,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub social_presence: Option<SocialPresence>,
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

impl AgentSeed {
    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            name: self.name.clone(),
            ticker: self.ticker.clone(),
            chain: self.chain.clone(),
            behavior: self.behavior,
            capabilities: self.capabilities.clone(),
            social_presence: self.social_presence.clone(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.json", false)?
            .set_default("broadcast.subscriber_buffer", default_subscriber_buffer() as i64)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("RUNEREUM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (RUNEREUM_CHAIN__MAX_SUBMIT_ATTEMPTS, etc.)
            .add_source(
                Environment::with_prefix("RUNEREUM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.scheduler.tick_ms == 0 {
            errors.push("scheduler.tick_ms must be positive".to_string());
        }

        if self.chain.max_submit_attempts == 0 {
            errors.push("chain.max_submit_attempts must be at least 1".to_string());
        }
        if self.chain.backoff_max_ms < self.chain.backoff_base_ms {
            errors.push("chain.backoff_max_ms must not be below chain.backoff_base_ms".to_string());
        }
        if self.chain.confirmation_timeout_ms == 0 {
            errors.push("chain.confirmation_timeout_ms must be positive".to_string());
        }
        if self.chain.poll_interval_ms == Some(0) {
            errors.push("chain.poll_interval_ms must be positive".to_string());
        }
        if self.chain.gas_bump_pct < Decimal::ZERO || self.chain.max_gas_bump_pct < Decimal::ZERO {
            errors.push("gas bump percentages must not be negative".to_string());
        }

        if self.broadcast.subscriber_buffer == 0 {
            errors.push("broadcast.subscriber_buffer must be positive".to_string());
        }

        for (chain, profile) in &self.chains {
            if profile.confirmations == 0 {
                errors.push(format!("chains.{}.confirmations must be at least 1", chain));
            }
        }

        for seed in &self.agents {
            if let Err(e) = seed.profile().validate() {
                errors.push(format!("agent '{}': {}", seed.name, e));
            }
            if let Some(strategy) = &seed.strategy {
                if let Err(e) = strategy.validate() {
                    errors.push(format!("agent '{}' strategy: {}", seed.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

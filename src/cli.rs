use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::domain::StrategyConfig;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "runereum")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous on-chain agent runtime", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the runtime with paper adapters and the configured agents
    Run {
        /// Directory holding default.toml and environment overrides
        #[arg(short, long, default_value = "config", env = "RUNEREUM_CONFIG_DIR")]
        config: PathBuf,
    },
    /// Validate a strategy TOML file
    CheckStrategy {
        /// Path to the strategy file
        file: PathBuf,
    },
}

/// Parse and validate a strategy file
pub fn check_strategy(path: &Path) -> Result<StrategyConfig> {
    let raw = std::fs::read_to_string(path)?;
    StrategyConfig::from_toml_str(&raw)
}

/// One-line human summary of a strategy
pub fn describe_strategy(strategy: &StrategyConfig) -> String {
    let risk = strategy.risk();
    match strategy {
        StrategyConfig::Dca(dca) => format!(
            "dca: buy {} {} every {}s, max position {}, slippage tolerance {}",
            dca.amount_per_interval,
            dca.asset,
            dca.interval_secs,
            risk.max_position_size,
            risk.slippage_tolerance
        ),
        StrategyConfig::Rebalance(rb) => {
            let targets: Vec<String> = rb
                .target_allocation
                .iter()
                .map(|(asset, fraction)| format!("{}={}", asset, fraction))
                .collect();
            format!(
                "rebalance: targets [{}], threshold {}, slippage tolerance {}",
                targets.join(", "),
                rb.rebalance_threshold,
                risk.slippage_tolerance
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["runereum", "run", "--config", "/etc/runereum"]).unwrap();
        match cli.command {
            Commands::Run { config } => assert_eq!(config, PathBuf::from("/etc/runereum")),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_strategy_file() {
        let dir = std::env::temp_dir().join(format!("runereum-cli-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dca.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
type = "dca"
asset = "eth"
interval_secs = 3600
amount_per_interval = "0.05"

[risk]
max_position_size = "1"
"#
        )
        .unwrap();

        let strategy = check_strategy(&path).unwrap();
        assert!(describe_strategy(&strategy).starts_with("dca: buy 0.05 eth every 3600s"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_check_strategy_missing_file() {
        let err = check_strategy(Path::new("/nonexistent/strategy.toml")).unwrap_err();
        assert_eq!(err.code(), "io");
    }
}

//! Strategy Engine and its variants
//!
//! `engine` is the single dispatch point over [`StrategyConfig`](crate::domain::StrategyConfig)
//! variants; `dca` and `rebalance` hold the variant logic, `risk` the
//! stop-loss/take-profit overrides shared by all of them.

pub mod dca;
pub mod engine;
pub mod rebalance;
pub mod risk;
pub mod slippage;

pub use engine::{evaluate, snapshot_triggers};
pub use risk::ExitTrigger;
pub use slippage::{check_trade, projected_slippage, SlippageCheck};

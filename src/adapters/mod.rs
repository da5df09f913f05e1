//! External collaborators
//!
//! Trait contracts for the market feed and the chain client, plus in-memory
//! paper implementations used by the binary and the tests.

pub mod paper_chain;
pub mod paper_market;
pub mod traits;

pub use paper_chain::{PaperChainClient, SubmitFault};
pub use paper_market::PaperMarketFeed;
pub use traits::{ChainClient, MarketFeed};

#[cfg(test)]
pub use traits::{MockChainClient, MockMarketFeed};

//! Collaborator contracts consumed by the core

use async_trait::async_trait;

use crate::domain::{ChainTx, ChainTxStatus, MarketSnapshot, TxReceipt};
use crate::error::{ChainError, Result};

/// Market/portfolio feed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Current prices and holdings for one agent; `DataUnavailable` when no snapshot exists
    async fn get_snapshot(&self, agent_id: &str) -> Result<MarketSnapshot>;
}

/// Chain client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a prepared transaction
    async fn submit(&self, tx: &ChainTx) -> std::result::Result<TxReceipt, ChainError>;

    /// Status of a previously submitted transaction
    async fn get_status(&self, tx_ref: &str) -> std::result::Result<ChainTxStatus, ChainError>;
}

//! In-memory chain client
//!
//! Each status poll adds one confirmation. Submission failures and stalled
//! confirmations can be injected; a linked [`PaperMarketFeed`] receives the
//! fill once a transaction first confirms.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::paper_market::PaperMarketFeed;
use super::traits::ChainClient;
use crate::domain::{ChainTx, ChainTxStatus, TxReceipt};
use crate::error::ChainError;

/// Injected submission failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFault {
    Network,
    Nonce,
    Rejected,
}

impl SubmitFault {
    fn to_error(self, attempt: u32) -> ChainError {
        match self {
            SubmitFault::Network => ChainError::Network(format!("injected failure on attempt {}", attempt)),
            SubmitFault::Nonce => ChainError::Nonce(format!("nonce too low on attempt {}", attempt)),
            SubmitFault::Rejected => ChainError::Rejected("injected rejection".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct PaperTx {
    tx: ChainTx,
    polls: u32,
    settled: bool,
}

#[derive(Default)]
pub struct PaperChainClient {
    market: Option<Arc<PaperMarketFeed>>,
    txs: DashMap<String, PaperTx>,
    faults: Mutex<VecDeque<SubmitFault>>,
    submit_calls: AtomicU64,
    next_ref: AtomicU64,
    stalled: AtomicBool,
}

impl PaperChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle confirmed transactions into this feed's holdings
    pub fn with_market(mut self, market: Arc<PaperMarketFeed>) -> Self {
        self.market = Some(market);
        self
    }

    /// Fail the next submissions, one fault per call, in order
    pub fn fail_next_submits(&self, faults: impl IntoIterator<Item = SubmitFault>) {
        let mut queue = match self.faults.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.extend(faults);
    }

    /// While stalled, every status poll reports pending
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Submit calls received, failed ones included
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Transactions accepted by the paper chain
    pub fn accepted(&self) -> Vec<ChainTx> {
        self.txs.iter().map(|e| e.value().tx.clone()).collect()
    }

    fn next_fault(&self) -> Option<SubmitFault> {
        match self.faults.lock() {
            Ok(mut q) => q.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

#[async_trait]
impl ChainClient for PaperChainClient {
    async fn submit(&self, tx: &ChainTx) -> Result<TxReceipt, ChainError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(fault) = self.next_fault() {
            debug!(tx_id = %tx.tx_id, attempt = tx.attempt, ?fault, "paper submit failing");
            return Err(fault.to_error(tx.attempt));
        }

        let n = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_ref = format!("0xpaper{:08x}", n);
        self.txs.insert(
            tx_ref.clone(),
            PaperTx {
                tx: tx.clone(),
                polls: 0,
                settled: false,
            },
        );

        info!(tx_ref = %tx_ref, agent_id = %tx.agent_id, asset = %tx.asset, amount = %tx.amount, "paper tx accepted");
        Ok(TxReceipt { tx_ref })
    }

    async fn get_status(&self, tx_ref: &str) -> Result<ChainTxStatus, ChainError> {
        if self.stalled.load(Ordering::SeqCst) {
            return Ok(ChainTxStatus::Pending);
        }

        let settle = {
            let mut entry = self
                .txs
                .get_mut(tx_ref)
                .ok_or_else(|| ChainError::Rejected(format!("unknown tx {}", tx_ref)))?;
            entry.polls += 1;
            let first = !entry.settled;
            entry.settled = true;
            (entry.polls, first.then(|| entry.tx.clone()))
        };

        let (confirmations, newly_settled) = settle;
        if let (Some(tx), Some(market)) = (newly_settled, &self.market) {
            market.apply_fill(&tx.agent_id, tx.action, &tx.asset, tx.amount);
        }
        Ok(ChainTxStatus::Confirmed { confirmations })
    }
}

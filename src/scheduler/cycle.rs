//! One scheduler cycle: snapshot, evaluation, chain coordination

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::adapters::MarketFeed;
use crate::chain::{ChainCoordinator, ChainOutcome};
use crate::domain::{MarketSnapshot, StrategyConfig};
use crate::error::{Result, RunereumError};
use crate::registry::{AgentRegistry, CycleTicket};
use crate::strategy;

/// What a finished cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Snapshot showed no reason to evaluate (rebalance within threshold)
    pub skipped: bool,
    pub decisions: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub duplicates: usize,
    /// Remaining decisions dropped because the agent was terminated
    pub cancelled: usize,
    pub error: Option<String>,
}

/// Clears `strategy_running` even if the cycle unwinds
struct CycleGuard<'a> {
    registry: &'a AgentRegistry,
    agent_id: &'a str,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.registry.end_cycle(self.agent_id);
    }
}

pub struct CycleRunner {
    registry: Arc<AgentRegistry>,
    feed: Arc<dyn MarketFeed>,
    coordinator: Arc<ChainCoordinator>,
    snapshot_timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        registry: Arc<AgentRegistry>,
        feed: Arc<dyn MarketFeed>,
        coordinator: Arc<ChainCoordinator>,
        snapshot_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            feed,
            coordinator,
            snapshot_timeout,
        }
    }

    /// Run a claimed cycle to completion. Errors end up as a `CycleFailed`
    /// event on the agent's stream, never as a return value.
    pub async fn run(&self, ticket: CycleTicket, pushed: Option<MarketSnapshot>) -> CycleReport {
        let _guard = CycleGuard {
            registry: &self.registry,
            agent_id: &ticket.agent_id,
        };
        let agent_id = ticket.agent_id.as_str();
        debug!(agent_id, strategy = ticket.strategy.kind(), "cycle started");

        let mut report = CycleReport::default();
        if let Err(e) = self.execute(&ticket, pushed, &mut report).await {
            warn!(agent_id, error = %e, recoverable = e.is_recoverable(), "cycle failed");
            if let Err(record_err) = self.registry.record_cycle_failure(agent_id, &e) {
                error!(agent_id, error = %record_err, "could not record cycle failure");
            }
            report.error = Some(e.to_string());
        }

        debug!(
            agent_id,
            decisions = report.decisions,
            confirmed = report.confirmed,
            failed = report.failed,
            "cycle finished"
        );
        report
    }

    async fn execute(
        &self,
        ticket: &CycleTicket,
        pushed: Option<MarketSnapshot>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let agent_id = ticket.agent_id.as_str();
        let snapshot = match pushed {
            Some(snapshot) => snapshot,
            None => self.fetch_snapshot(agent_id).await?,
        };

        if matches!(ticket.strategy, StrategyConfig::Rebalance(_))
            && !strategy::snapshot_triggers(&ticket.strategy, &snapshot)
        {
            debug!(agent_id, "allocation within threshold");
            report.skipped = true;
            return Ok(());
        }

        let evaluation = strategy::evaluate(agent_id, &ticket.strategy, ticket.behavior, &snapshot)?;
        self.registry.record_decision(agent_id, &evaluation)?;

        for abort in &evaluation.slippage_aborts {
            info!(
                agent_id,
                asset = %abort.asset,
                projected = %abort.projected_slippage,
                tolerance = %abort.tolerance,
                "trade aborted on slippage"
            );
        }

        let actionable: Vec<_> = evaluation.actionable().cloned().collect();
        report.decisions = actionable.len();

        for (idx, decision) in actionable.iter().enumerate() {
            if self.registry.is_terminated(agent_id) {
                report.cancelled = actionable.len() - idx;
                info!(agent_id, dropped = report.cancelled, "agent terminated mid-cycle");
                break;
            }
            match self.coordinator.execute(ticket, decision).await? {
                ChainOutcome::Confirmed(_) => report.confirmed += 1,
                ChainOutcome::Failed(_) => report.failed += 1,
                ChainOutcome::Duplicate { .. } => report.duplicates += 1,
                ChainOutcome::Cancelled => report.cancelled += 1,
            }
        }
        Ok(())
    }

    async fn fetch_snapshot(&self, agent_id: &str) -> Result<MarketSnapshot> {
        match timeout(self.snapshot_timeout, self.feed.get_snapshot(agent_id)).await {
            Ok(result) => result,
            Err(_) => Err(RunereumError::DataUnavailable(format!(
                "market snapshot timed out after {}ms",
                self.snapshot_timeout.as_millis()
            ))),
        }
    }
}

//! Chain Operation Coordinator
//!
//! Turns a trade decision into a submitted transaction and follows it to a
//! terminal status:
//! - submission failures are retried with capped exponential backoff and a
//!   priority fee bump per retry
//! - once a submission succeeds it is never repeated; confirmation is polled
//!   under a timeout, and a timeout leaves the transaction for manual
//!   reconciliation
//! - every status change goes through the registry, which emits the event

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dedup::{fingerprint, DedupPolicy};
use super::profile::{ChainProfile, ChainProfiles};
use crate::adapters::ChainClient;
use crate::config::ChainConfig;
use crate::domain::{ChainTx, ChainTxStatus, EventKind, TradeDecision, TransactionRecord};
use crate::error::{ChainError, Result, RunereumError};
use crate::registry::{AgentRegistry, CycleTicket};

/// How one decision ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Confirmed(TransactionRecord),
    Failed(TransactionRecord),
    /// Suppressed because an identical unresolved transaction exists
    Duplicate { existing_tx: Uuid },
    /// Agent terminated before any submission was made
    Cancelled,
}

impl ChainOutcome {
    pub fn record(&self) -> Option<&TransactionRecord> {
        match self {
            ChainOutcome::Confirmed(r) | ChainOutcome::Failed(r) => Some(r),
            _ => None,
        }
    }
}

enum Confirmation {
    Confirmed,
    Failed(String),
}

pub struct ChainCoordinator {
    registry: Arc<AgentRegistry>,
    client: Arc<dyn ChainClient>,
    config: ChainConfig,
    profiles: ChainProfiles,
    dedup: DedupPolicy,
}

impl ChainCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        client: Arc<dyn ChainClient>,
        config: ChainConfig,
        profiles: ChainProfiles,
    ) -> Self {
        let dedup = DedupPolicy::new(config.dedup_window());
        Self {
            registry,
            client,
            config,
            profiles,
            dedup,
        }
    }

    /// Drive one non-none decision to a terminal outcome
    pub async fn execute(&self, ticket: &CycleTicket, decision: &TradeDecision) -> Result<ChainOutcome> {
        if decision.is_none() {
            return Err(RunereumError::Internal(
                "coordinator received a none decision".to_string(),
            ));
        }
        let agent_id = ticket.agent_id.as_str();

        let recent = self.registry.recent_transactions(agent_id)?;
        let key = fingerprint(decision);
        if let Some(existing) = self.dedup.find_duplicate(&recent, decision, Utc::now()) {
            info!(
                agent_id,
                existing_tx = %existing.tx_id,
                fingerprint = %key,
                "duplicate decision suppressed"
            );
            self.registry
                .record_duplicate(agent_id, decision, existing.tx_id, &key)?;
            return Ok(ChainOutcome::Duplicate {
                existing_tx: existing.tx_id,
            });
        }

        let profile = self.profiles.resolve(&ticket.chain);
        let mut record = TransactionRecord::from_decision(decision);

        let tx_ref = match self.submit_with_retry(ticket, &profile, &mut record).await? {
            Some(tx_ref) => tx_ref,
            None if record.attempts == 0 => return Ok(ChainOutcome::Cancelled),
            None => {
                self.registry.record_transaction(&record, EventKind::TxFailed)?;
                return Ok(ChainOutcome::Failed(record));
            }
        };

        record.mark_submitted(tx_ref.clone());
        self.registry.record_transaction(&record, EventKind::TxPending)?;

        let poll_interval = self
            .config
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| profile.block_time());
        let wait = self.await_confirmation(&tx_ref, profile.confirmations, poll_interval);

        match timeout(self.config.confirmation_timeout(), wait).await {
            Ok(Confirmation::Confirmed) => {
                record.mark_confirmed();
                info!(agent_id, tx_ref = %tx_ref, attempts = record.attempts, "transaction confirmed");
                self.registry.record_transaction(&record, EventKind::TxConfirmed)?;
                Ok(ChainOutcome::Confirmed(record))
            }
            Ok(Confirmation::Failed(reason)) => {
                warn!(agent_id, tx_ref = %tx_ref, %reason, "transaction failed on chain");
                record.mark_failed(reason);
                self.registry.record_transaction(&record, EventKind::TxFailed)?;
                Ok(ChainOutcome::Failed(record))
            }
            Err(_) => {
                let err = RunereumError::ConfirmationTimeout(format!(
                    "{} not confirmed within {}ms",
                    tx_ref, self.config.confirmation_timeout_ms
                ));
                error!(agent_id, tx_ref = %tx_ref, "confirmation timed out, needs reconciliation");
                record.mark_failed(err.to_string());
                record.needs_reconciliation = true;
                self.registry.record_transaction(&record, EventKind::TxFailed)?;
                Ok(ChainOutcome::Failed(record))
            }
        }
    }

    /// Submit until one attempt succeeds.
    ///
    /// Returns `None` when the attempts are exhausted, the error is final, or
    /// the agent was terminated before the next attempt; `record` carries the
    /// attempt count and failure reason.
    async fn submit_with_retry(
        &self,
        ticket: &CycleTicket,
        profile: &ChainProfile,
        record: &mut TransactionRecord,
    ) -> Result<Option<String>> {
        let agent_id = ticket.agent_id.as_str();
        let max_attempts = self.config.max_submit_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            // Cancellation checkpoint: never start a new attempt for a terminated agent
            if self.registry.is_terminated(agent_id) {
                info!(agent_id, attempts = attempt, "agent terminated, abandoning submission");
                if attempt > 0 {
                    record.mark_failed("agent terminated before submission succeeded");
                }
                return Ok(None);
            }

            attempt += 1;
            let fee = profile.priority_fee_for_attempt(
                attempt,
                self.config.gas_bump_pct,
                self.config.max_gas_bump_pct,
            );
            record.attempts = attempt;
            record.priority_fee_gwei = fee;

            let tx = ChainTx {
                tx_id: record.tx_id,
                agent_id: record.agent_id.clone(),
                chain: ticket.chain.clone(),
                action: record.action,
                asset: record.asset.clone(),
                amount: record.amount,
                gas_limit: profile.gas_limit,
                priority_fee_gwei: fee,
                max_slippage: ticket.strategy.risk().slippage_tolerance,
                attempt,
            };

            debug!(agent_id, tx_id = %tx.tx_id, attempt, fee = %fee, "submitting transaction");
            let started = Instant::now();
            let err = match timeout(self.config.submit_timeout(), self.client.submit(&tx)).await {
                Ok(Ok(receipt)) => {
                    info!(agent_id, tx_ref = %receipt.tx_ref, attempt, "transaction submitted");
                    return Ok(Some(receipt.tx_ref));
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    // The submit may have reached the chain; retrying could double-submit
                    let err = ChainError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    error!(agent_id, attempt, error = %err, "submission outcome unknown");
                    record.mark_failed(err.to_string());
                    record.needs_reconciliation = true;
                    return Ok(None);
                }
            };

            if !err.is_retryable() {
                warn!(agent_id, attempt, error = %err, "submission rejected");
                record.mark_failed(err.to_string());
                return Ok(None);
            }
            if attempt >= max_attempts {
                let exhausted = ChainError::MaxRetriesExceeded { attempts: attempt };
                error!(agent_id, error = %exhausted, last_error = %err, "giving up on submission");
                record.mark_failed(format!("{}: {}", exhausted, err));
                return Ok(None);
            }

            let delay = self.retry_delay(attempt);
            warn!(
                agent_id,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "submission failed, retrying"
            );
            sleep(delay).await;
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff(attempt);
        let jitter_cap = (base.as_millis() as u64) / 10;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    async fn await_confirmation(
        &self,
        tx_ref: &str,
        required: u32,
        poll_interval: Duration,
    ) -> Confirmation {
        loop {
            match self.client.get_status(tx_ref).await {
                Ok(ChainTxStatus::Confirmed { confirmations }) if confirmations >= required.max(1) => {
                    return Confirmation::Confirmed;
                }
                Ok(ChainTxStatus::Confirmed { confirmations }) => {
                    debug!(tx_ref, confirmations, required, "awaiting confirmations");
                }
                Ok(ChainTxStatus::Pending) => {
                    debug!(tx_ref, "transaction pending");
                }
                Ok(ChainTxStatus::Failed { reason }) => return Confirmation::Failed(reason),
                Err(e) if e.is_retryable() => {
                    warn!(tx_ref, error = %e, "status poll failed");
                }
                Err(e) => return Confirmation::Failed(e.to_string()),
            }
            sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChainClient;
    use crate::broadcast::EventBroadcaster;
    use crate::domain::{AgentProfile, Capability, RiskParams, StrategyConfig, TxReceipt, TxStatus};
    use rust_decimal_macros::dec;

    struct Fixture {
        registry: Arc<AgentRegistry>,
        ticket: CycleTicket,
    }

    fn fixture(chain: &str) -> Fixture {
        let registry = Arc::new(AgentRegistry::new(Arc::new(EventBroadcaster::new(64))));
        let profile = AgentProfile::new("Alpha", "ALP", chain).with_capability(Capability::Trading);
        let agent_id = registry.create(profile).unwrap();
        let strategy = StrategyConfig::dca(RiskParams::new(dec!(1)), "eth", 60, dec!(0.1));
        registry.attach_strategy(&agent_id, strategy).unwrap();
        let ticket = registry
            .try_begin_cycle(&agent_id, Instant::now(), |_| true)
            .unwrap();
        Fixture { registry, ticket }
    }

    fn coordinator(registry: &Arc<AgentRegistry>, client: MockChainClient) -> ChainCoordinator {
        let config = ChainConfig {
            max_submit_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            poll_interval_ms: Some(500),
            confirmation_timeout_ms: 10_000,
            ..ChainConfig::default()
        };
        ChainCoordinator::new(registry.clone(), Arc::new(client), config, ChainProfiles::builtin())
    }

    fn decision(agent_id: &str) -> TradeDecision {
        TradeDecision::buy(agent_id, "eth", dec!(0.1), "dca")
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success() {
        let fx = fixture("base-sepolia");
        let mut sub = fx.registry.broadcaster().subscribe(&fx.ticket.agent_id);

        let mut client = MockChainClient::new();
        let mut calls = 0u32;
        client.expect_submit().times(4).returning(move |tx| {
            calls += 1;
            assert_eq!(tx.attempt, calls);
            if calls <= 3 {
                Err(ChainError::Network("connection reset".into()))
            } else {
                Ok(TxReceipt {
                    tx_ref: "0xabc".into(),
                })
            }
        });
        client
            .expect_get_status()
            .returning(|_| Ok(ChainTxStatus::Confirmed { confirmations: 1 }));

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();

        let record = outcome.record().unwrap();
        assert_eq!(record.attempts, 4);
        assert_eq!(record.status, TxStatus::Confirmed);
        assert_eq!(record.tx_ref.as_deref(), Some("0xabc"));
        // base fee 1 gwei, +10% per retry
        assert_eq!(record.priority_fee_gwei, dec!(1.3));

        assert_eq!(sub.try_recv().unwrap().unwrap().kind, EventKind::TxPending);
        assert_eq!(sub.try_recv().unwrap().unwrap().kind, EventKind::TxConfirmed);
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let fx = fixture("base-sepolia");
        let mut client = MockChainClient::new();
        client
            .expect_submit()
            .times(5)
            .returning(|_| Err(ChainError::Nonce("nonce too low".into())));
        client.expect_get_status().never();

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();

        let record = outcome.record().unwrap();
        assert_eq!(record.status, TxStatus::Failed);
        assert_eq!(record.attempts, 5);
        assert!(!record.needs_reconciliation);
        assert_eq!(fx.registry.get(&fx.ticket.agent_id).unwrap().counters.trades_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let fx = fixture("base-sepolia");
        let mut client = MockChainClient::new();
        client
            .expect_submit()
            .times(1)
            .returning(|_| Err(ChainError::Rejected("insufficient funds".into())));

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();
        assert!(matches!(outcome, ChainOutcome::Failed(ref r) if r.attempts == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_required_confirmations() {
        let fx = fixture("base-mainnet");
        let mut client = MockChainClient::new();
        client.expect_submit().times(1).returning(|_| {
            Ok(TxReceipt {
                tx_ref: "0x1".into(),
            })
        });
        let mut polls = 0u32;
        client.expect_get_status().times(3).returning(move |_| {
            polls += 1;
            Ok(ChainTxStatus::Confirmed {
                confirmations: polls,
            })
        });

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();
        assert!(matches!(outcome, ChainOutcome::Confirmed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_then_duplicate_suppressed() {
        let fx = fixture("base-sepolia");
        let mut client = MockChainClient::new();
        client.expect_submit().times(1).returning(|_| {
            Ok(TxReceipt {
                tx_ref: "0xstuck".into(),
            })
        });
        client
            .expect_get_status()
            .returning(|_| Ok(ChainTxStatus::Pending));

        let coord = coordinator(&fx.registry, client);
        let d = decision(&fx.ticket.agent_id);
        let outcome = coord.execute(&fx.ticket, &d).await.unwrap();

        let record = outcome.record().unwrap().clone();
        assert_eq!(record.status, TxStatus::Failed);
        assert!(record.needs_reconciliation);

        // the same decision again must not reach the chain
        let again = coord.execute(&fx.ticket, &d).await.unwrap();
        assert_eq!(
            again,
            ChainOutcome::Duplicate {
                existing_tx: record.tx_id
            }
        );
        let snapshot = fx.registry.get(&fx.ticket.agent_id).unwrap();
        assert_eq!(snapshot.counters.duplicates_suppressed, 1);
        assert_eq!(snapshot.pending_tx_refs(), vec!["0xstuck".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_stops_further_attempts() {
        let fx = fixture("base-sepolia");
        let registry = fx.registry.clone();
        let agent_id = fx.ticket.agent_id.clone();

        let mut client = MockChainClient::new();
        client.expect_submit().times(1).returning(move |_| {
            registry.terminate(&agent_id).unwrap();
            Err(ChainError::Network("down".into()))
        });

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();
        let record = outcome.record().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.status, TxStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_before_first_attempt() {
        let fx = fixture("base-sepolia");
        fx.registry.terminate(&fx.ticket.agent_id).unwrap();

        let mut client = MockChainClient::new();
        client.expect_submit().never();

        let coord = coordinator(&fx.registry, client);
        let outcome = coord
            .execute(&fx.ticket, &decision(&fx.ticket.agent_id))
            .await
            .unwrap();
        assert_eq!(outcome, ChainOutcome::Cancelled);
    }
}

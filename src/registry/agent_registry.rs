//! Agent Registry
//!
//! Single owner of every agent record. Each agent sits behind its own mutex,
//! so operations on one agent are serialized while other agents proceed
//! untouched. Every event for an agent is published from inside that agent's
//! exclusive section, which keeps the per-agent event order identical to the
//! order of mutations.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::record::{AgentRecord, AgentSnapshot, LastTrade};
use crate::broadcast::EventBroadcaster;
use crate::domain::{
    AgentProfile, Behavior, Capability, EventKind, Evaluation, LifecycleState, StateTransition,
    StrategyConfig, TradeDecision, TransactionRecord,
};
use crate::error::{Result, RunereumError};
use crate::persistence::AgentStore;

/// Transactions kept per agent unless configured otherwise
pub const DEFAULT_TX_HISTORY: usize = 50;

/// Scheduling state handed to a trigger when deciding whether an agent is due
#[derive(Debug)]
pub struct ScheduleView<'a> {
    pub strategy: &'a StrategyConfig,
    pub last_run: Option<Instant>,
    pub last_check: Option<Instant>,
}

/// Exclusive right to run one cycle for an agent; release with [`AgentRegistry::end_cycle`]
#[derive(Debug, Clone)]
pub struct CycleTicket {
    pub agent_id: String,
    /// Strategy as attached when the cycle started
    pub strategy: StrategyConfig,
    pub behavior: Behavior,
    pub chain: String,
    pub started_at: Instant,
}

/// Owned, per-agent-lockable store of agent records
pub struct AgentRegistry {
    agents: DashMap<String, Arc<Mutex<AgentRecord>>>,
    broadcaster: Arc<EventBroadcaster>,
    store: Option<Arc<dyn AgentStore>>,
    history_limit: usize,
}

fn lock_record(slot: &Mutex<AgentRecord>) -> MutexGuard<'_, AgentRecord> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AgentRegistry {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            agents: DashMap::new(),
            broadcaster,
            store: None,
            history_limit: DEFAULT_TX_HISTORY,
        }
    }

    /// Call `store` at every lifecycle-transition boundary
    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    fn slot(&self, agent_id: &str) -> Result<Arc<Mutex<AgentRecord>>> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RunereumError::AgentNotFound(agent_id.to_string()))
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Register a new agent in state `CREATED` and return its id
    pub fn create(&self, profile: AgentProfile) -> Result<String> {
        self.create_with_id(Uuid::new_v4().to_string(), profile)
    }

    /// Register a new agent under a caller-chosen id
    pub fn create_with_id(&self, agent_id: impl Into<String>, profile: AgentProfile) -> Result<String> {
        let agent_id = agent_id.into();
        profile.validate()?;

        let record = AgentRecord::new(agent_id.clone(), profile);
        self.insert(record, "created")?;

        info!(agent_id = %agent_id, "agent created");
        Ok(agent_id)
    }

    /// Re-register an agent from its last stored snapshot
    pub fn restore(&self, agent_id: &str) -> Result<AgentSnapshot> {
        let store = self.store.as_ref().ok_or_else(|| {
            RunereumError::InvalidConfiguration("no agent store configured".to_string())
        })?;
        let snapshot = store
            .load(agent_id)?
            .ok_or_else(|| RunereumError::AgentNotFound(agent_id.to_string()))?;

        let mut record = AgentRecord::from_snapshot(snapshot);
        record.last_event_sequence = self.broadcaster.last_sequence(agent_id);
        let snapshot = self.insert(record, "restored")?;

        info!(agent_id, state = %snapshot.state, "agent restored");
        Ok(snapshot)
    }

    fn insert(&self, record: AgentRecord, reason: &str) -> Result<AgentSnapshot> {
        let agent_id = record.agent_id.clone();
        let slot = match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RunereumError::InvalidConfiguration(format!(
                    "agent id already registered: {}",
                    agent_id
                )))
            }
            Entry::Vacant(vacant) => vacant.insert(Arc::new(Mutex::new(record))).value().clone(),
        };

        let mut rec = lock_record(&slot);
        let payload = json!({
            "to": rec.state,
            "reason": reason,
            "name": rec.profile.name,
            "ticker": rec.profile.ticker,
            "chain": rec.profile.chain,
        });
        self.emit(&mut rec, EventKind::Lifecycle, payload)?;
        self.persist(&rec);
        Ok(rec.snapshot())
    }

    /// Attach a strategy; the agent goes through `CONFIGURING` and ends `ACTIVE`
    pub fn attach_strategy(&self, agent_id: &str, config: StrategyConfig) -> Result<AgentSnapshot> {
        self.install_strategy(agent_id, config, false)
    }

    /// Swap the attached strategy and reset scheduling state
    pub fn replace_strategy(&self, agent_id: &str, config: StrategyConfig) -> Result<AgentSnapshot> {
        self.install_strategy(agent_id, config, true)
    }

    fn install_strategy(
        &self,
        agent_id: &str,
        config: StrategyConfig,
        require_existing: bool,
    ) -> Result<AgentSnapshot> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);

        if rec.state.is_terminal() {
            return Err(RunereumError::AlreadyTerminated(agent_id.to_string()));
        }
        self.check_healthy(&mut rec)?;

        if !rec.profile.capabilities.can_run_strategies() {
            return Err(RunereumError::CapabilityDisabled {
                agent_id: agent_id.to_string(),
                capability: Capability::Trading.as_str().to_string(),
            });
        }
        if require_existing && rec.strategy.is_none() {
            return Err(RunereumError::InvalidConfiguration(format!(
                "agent {} has no strategy to replace",
                agent_id
            )));
        }
        if !rec.state.accepts_strategy() {
            return Err(RunereumError::IllegalTransition {
                from: rec.state.to_string(),
                to: LifecycleState::Configuring.to_string(),
            });
        }

        // Rejected configs leave the agent untouched
        config.validate()?;

        let replaced = rec.strategy.is_some();
        self.transition(&mut rec, LifecycleState::Configuring, "strategy submitted")?;

        let payload = json!({
            "kind": config.kind(),
            "replaced": replaced,
            "strategy": config,
        });
        rec.strategy = Some(config);
        rec.reset_schedule();
        self.emit(&mut rec, EventKind::StrategyAttached, payload)?;

        self.transition(&mut rec, LifecycleState::Active, "strategy validated")?;
        self.persist(&rec);

        info!(
            agent_id,
            kind = rec.strategy.as_ref().map(|s| s.kind()).unwrap_or("none"),
            replaced,
            "strategy attached"
        );
        Ok(rec.snapshot())
    }

    pub fn pause(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        if rec.state != LifecycleState::Active {
            return Err(RunereumError::IllegalTransition {
                from: rec.state.to_string(),
                to: LifecycleState::Paused.to_string(),
            });
        }
        self.transition(&mut rec, LifecycleState::Paused, "paused")?;
        self.persist(&rec);

        info!(agent_id, "agent paused");
        Ok(())
    }

    pub fn resume(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        if rec.state != LifecycleState::Paused {
            return Err(RunereumError::IllegalTransition {
                from: rec.state.to_string(),
                to: LifecycleState::Active.to_string(),
            });
        }
        self.transition(&mut rec, LifecycleState::Active, "resumed")?;
        self.persist(&rec);

        info!(agent_id, "agent resumed");
        Ok(())
    }

    /// Terminal. A second call fails with `AlreadyTerminated` and changes nothing.
    pub fn terminate(&self, agent_id: &str) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);

        if rec.state.is_terminal() {
            debug!(agent_id, "terminate on terminated agent");
            return Err(RunereumError::AlreadyTerminated(agent_id.to_string()));
        }
        self.transition(&mut rec, LifecycleState::Terminated, "terminated")?;
        self.persist(&rec);

        info!(agent_id, in_flight = rec.strategy_running, "agent terminated");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, agent_id: &str) -> Result<AgentSnapshot> {
        let slot = self.slot(agent_id)?;
        let rec = lock_record(&slot);
        Ok(rec.snapshot())
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        let slots: Vec<_> = self.agents.iter().map(|e| e.value().clone()).collect();
        let mut snapshots: Vec<_> = slots.iter().map(|slot| lock_record(slot).snapshot()).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Remove terminated agents with nothing in flight, together with their
    /// event sequence counters. Termination alone keeps the record so repeated
    /// `terminate` calls still answer `AlreadyTerminated`; this is the step
    /// that releases it. Returns the removed ids.
    pub fn purge_terminated(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for agent_id in self.agent_ids() {
            let evicted = self.agents.remove_if(&agent_id, |_, slot| {
                let rec = lock_record(slot);
                rec.state.is_terminal() && !rec.strategy_running
            });
            if evicted.is_some() {
                self.broadcaster.forget(&agent_id);
                removed.push(agent_id);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "purged terminated agents");
        }
        removed
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Cancellation checkpoint for in-flight work; unknown agents count as terminated
    pub fn is_terminated(&self, agent_id: &str) -> bool {
        match self.slot(agent_id) {
            Ok(slot) => lock_record(&slot).state.is_terminal(),
            Err(_) => true,
        }
    }

    pub fn has_capability(&self, agent_id: &str, capability: Capability) -> bool {
        self.slot(agent_id)
            .map(|slot| lock_record(&slot).profile.capabilities.contains(capability))
            .unwrap_or(false)
    }

    pub fn recent_transactions(&self, agent_id: &str) -> Result<Vec<TransactionRecord>> {
        let slot = self.slot(agent_id)?;
        let rec = lock_record(&slot);
        Ok(rec.transactions.iter().cloned().collect())
    }

    // =========================================================================
    // Cycle bookkeeping
    // =========================================================================

    /// Atomically claim a cycle if the agent is active, idle, healthy and due.
    ///
    /// Sets `strategy_running` and stamps the trigger time; returns `None`
    /// when the agent must be skipped this tick.
    pub fn try_begin_cycle<F>(&self, agent_id: &str, now: Instant, is_due: F) -> Option<CycleTicket>
    where
        F: FnOnce(&ScheduleView<'_>) -> bool,
    {
        let slot = self.slot(agent_id).ok()?;
        let mut rec = lock_record(&slot);

        if !rec.state.is_schedulable() || rec.strategy_running || rec.fault.is_some() {
            return None;
        }
        let strategy = rec.strategy.clone()?;

        let view = ScheduleView {
            strategy: &strategy,
            last_run: rec.last_run,
            last_check: rec.last_check,
        };
        if !is_due(&view) {
            return None;
        }

        match strategy {
            StrategyConfig::Dca(_) => rec.last_run = Some(now),
            StrategyConfig::Rebalance(_) => rec.last_check = Some(now),
        }
        rec.strategy_running = true;

        Some(CycleTicket {
            agent_id: agent_id.to_string(),
            behavior: rec.profile.behavior,
            chain: rec.profile.chain.clone(),
            strategy,
            started_at: now,
        })
    }

    /// Release the cycle claimed by [`try_begin_cycle`](Self::try_begin_cycle)
    pub fn end_cycle(&self, agent_id: &str) {
        let Ok(slot) = self.slot(agent_id) else {
            return;
        };
        let mut rec = lock_record(&slot);
        rec.strategy_running = false;
        rec.counters.cycles_run += 1;
        rec.touch();
    }

    pub fn record_decision(&self, agent_id: &str, evaluation: &Evaluation) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        rec.counters.decisions += 1;
        rec.last_action = evaluation
            .actionable()
            .next()
            .or_else(|| evaluation.decisions.first())
            .cloned();
        rec.last_action_at = Some(Utc::now());

        let payload = serde_json::to_value(evaluation)?;
        self.emit(&mut rec, EventKind::Decision, payload)?;
        Ok(())
    }

    pub fn record_cycle_failure(&self, agent_id: &str, failure: &RunereumError) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        rec.counters.cycle_failures += 1;
        let payload = json!({
            "code": failure.code(),
            "error": failure.to_string(),
            "recoverable": failure.is_recoverable(),
        });
        self.emit(&mut rec, EventKind::CycleFailed, payload)?;
        Ok(())
    }

    pub fn record_duplicate(
        &self,
        agent_id: &str,
        decision: &TradeDecision,
        existing_tx: Uuid,
        fingerprint: &str,
    ) -> Result<()> {
        let slot = self.slot(agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        rec.counters.duplicates_suppressed += 1;
        let payload = json!({
            "decision": decision,
            "existing_tx_id": existing_tx,
            "fingerprint": fingerprint,
        });
        self.emit(&mut rec, EventKind::DuplicateSuppressed, payload)?;
        Ok(())
    }

    /// Store a transaction status change and emit its event.
    ///
    /// Accepted after termination so an in-flight submission still leaves a
    /// local record.
    pub fn record_transaction(&self, record: &TransactionRecord, kind: EventKind) -> Result<()> {
        if !kind.is_transaction() {
            return Err(RunereumError::Internal(format!(
                "{} is not a transaction event",
                kind
            )));
        }

        let slot = self.slot(&record.agent_id)?;
        let mut rec = lock_record(&slot);
        self.check_healthy(&mut rec)?;

        let limit = self.history_limit;
        rec.upsert_transaction(record, limit);
        match kind {
            EventKind::TxPending => rec.counters.trades_submitted += 1,
            EventKind::TxConfirmed => {
                rec.counters.trades_confirmed += 1;
                rec.last_trade = Some(LastTrade {
                    tx_id: record.tx_id,
                    tx_ref: record.tx_ref.clone(),
                    asset: record.asset.clone(),
                    action: record.action,
                    amount: record.amount,
                    confirmed_at: record.updated_at,
                });
            }
            EventKind::TxFailed => rec.counters.trades_failed += 1,
            _ => {}
        }

        let payload = serde_json::to_value(record)?;
        self.emit(&mut rec, kind, payload)?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn transition(&self, rec: &mut AgentRecord, to: LifecycleState, reason: &str) -> Result<()> {
        let from = rec.state;
        if !from.can_transition_to(to) {
            return Err(RunereumError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        rec.state = to;
        let transition = StateTransition::new(from, to, reason);
        let payload = serde_json::to_value(&transition)?;
        self.emit(rec, EventKind::Lifecycle, payload)?;

        debug!(agent_id = %rec.agent_id, %from, %to, reason, "lifecycle transition");
        Ok(())
    }

    /// Refuse to touch a faulted agent, and fault it if its event stream
    /// was advanced outside the registry.
    fn check_healthy(&self, rec: &mut AgentRecord) -> Result<()> {
        if let Some(reason) = &rec.fault {
            return Err(RunereumError::InvariantViolation {
                agent_id: rec.agent_id.clone(),
                reason: reason.clone(),
            });
        }

        let published = self.broadcaster.last_sequence(&rec.agent_id);
        if published != rec.last_event_sequence {
            let reason = format!(
                "event sequence diverged: registry at {}, broadcaster at {}",
                rec.last_event_sequence, published
            );
            rec.last_event_sequence = published;
            return Err(self.fault(rec, reason));
        }
        Ok(())
    }

    fn emit(
        &self,
        rec: &mut AgentRecord,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        let expected = rec.last_event_sequence + 1;
        let event = self.broadcaster.publish(&rec.agent_id, kind, payload);
        rec.last_event_sequence = event.sequence;
        rec.touch();

        if event.sequence != expected {
            let reason = format!(
                "{} event got sequence {}, expected {}",
                kind, event.sequence, expected
            );
            return Err(self.fault(rec, reason));
        }
        Ok(())
    }

    /// Halt processing for this agent only
    fn fault(&self, rec: &mut AgentRecord, reason: String) -> RunereumError {
        error!(agent_id = %rec.agent_id, %reason, "registry invariant violated, halting agent");

        rec.fault = Some(reason.clone());
        let event = self.broadcaster.publish(
            &rec.agent_id,
            EventKind::Fault,
            json!({ "reason": reason }),
        );
        rec.last_event_sequence = event.sequence;
        self.persist(rec);

        RunereumError::InvariantViolation {
            agent_id: rec.agent_id.clone(),
            reason,
        }
    }

    fn persist(&self, rec: &AgentRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&rec.snapshot()) {
                warn!(agent_id = %rec.agent_id, error = %e, "failed to save agent snapshot");
            }
        }
    }
}

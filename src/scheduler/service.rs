//! Strategy Scheduler
//!
//! A timer-driven loop that fans eligible agents' cycles out to their own
//! tasks. A slow cycle (e.g. one waiting on chain confirmations) never holds
//! up the tick for other agents, and an agent with a cycle in flight is
//! skipped rather than queued.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::cycle::{CycleReport, CycleRunner};
use super::trigger;
use crate::config::SchedulerConfig;
use crate::domain::MarketSnapshot;
use crate::error::{Result, RunereumError};
use crate::registry::AgentRegistry;
use crate::strategy;

const SNAPSHOT_QUEUE: usize = 256;

/// Clone-friendly handle for pushing fresh market snapshots
#[derive(Clone)]
pub struct SchedulerHandle {
    snapshot_tx: mpsc::Sender<MarketSnapshot>,
}

impl SchedulerHandle {
    /// Offer a fresh snapshot; a rebalance agent whose allocation drifted
    /// past its threshold is evaluated against it right away.
    pub async fn push_snapshot(&self, snapshot: MarketSnapshot) -> Result<()> {
        self.snapshot_tx
            .send(snapshot)
            .await
            .map_err(|_| RunereumError::Internal("scheduler is not running".to_string()))
    }
}

pub struct Scheduler {
    registry: Arc<AgentRegistry>,
    runner: Arc<CycleRunner>,
    config: SchedulerConfig,
    snapshot_rx: mpsc::Receiver<MarketSnapshot>,
    in_flight: JoinSet<CycleReport>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        runner: Arc<CycleRunner>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(SNAPSHOT_QUEUE);
        let scheduler = Self {
            registry,
            runner,
            config,
            snapshot_rx,
            in_flight: JoinSet::new(),
        };
        (scheduler, SchedulerHandle { snapshot_tx })
    }

    /// Main loop; returns after shutdown once in-flight cycles have finished
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(tick_ms = self.config.tick_ms, "scheduler starting");

        let mut tick = interval(self.config.tick());
        // Don't burst-fire missed ticks
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_tick(Instant::now());
                }

                Some(snapshot) = self.snapshot_rx.recv() => {
                    self.handle_snapshot(snapshot, Instant::now());
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Self::log_join(joined);
                }

                _ = shutdown_rx.recv() => {
                    info!(in_flight = self.in_flight.len(), "scheduler: shutdown signal received");
                    break;
                }
            }
        }

        self.wait_idle().await;
        info!("scheduler: main loop exited");
    }

    /// Start a cycle for every agent that is due at `now`; returns how many started
    pub fn run_tick(&mut self, now: Instant) -> usize {
        let min_recheck = self.config.rebalance_min_recheck();
        let mut started = 0;

        for agent_id in self.registry.agent_ids() {
            let ticket = self
                .registry
                .try_begin_cycle(&agent_id, now, |view| trigger::is_due(view, now, min_recheck));
            let Some(ticket) = ticket else {
                continue;
            };

            let runner = self.runner.clone();
            self.in_flight.spawn(async move { runner.run(ticket, None).await });
            started += 1;
        }

        if started > 0 {
            debug!(started, in_flight = self.in_flight.len(), "scheduler tick");
        }
        started
    }

    /// Route a pushed snapshot to its agent; returns whether a cycle started
    pub fn handle_snapshot(&mut self, snapshot: MarketSnapshot, now: Instant) -> bool {
        let min_recheck = self.config.rebalance_min_recheck();
        let ticket = self.registry.try_begin_cycle(&snapshot.agent_id, now, |view| {
            trigger::accepts_push(view, now, min_recheck)
                && strategy::snapshot_triggers(view.strategy, &snapshot)
        });
        let Some(ticket) = ticket else {
            debug!(agent_id = %snapshot.agent_id, "pushed snapshot did not trigger");
            return false;
        };

        info!(agent_id = %ticket.agent_id, "snapshot-triggered rebalance");
        let runner = self.runner.clone();
        self.in_flight
            .spawn(async move { runner.run(ticket, Some(snapshot)).await });
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait for every in-flight cycle and return their reports
    pub async fn wait_idle(&mut self) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Some(report) = Self::log_join(joined) {
                reports.push(report);
            }
        }
        reports
    }

    fn log_join(joined: std::result::Result<CycleReport, tokio::task::JoinError>) -> Option<CycleReport> {
        match joined {
            Ok(report) => {
                if let Some(err) = &report.error {
                    debug!(error = %err, "cycle ended with error");
                }
                Some(report)
            }
            Err(e) if e.is_panic() => {
                error!(error = %e, "cycle task panicked");
                None
            }
            Err(e) => {
                warn!(error = %e, "cycle task cancelled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PaperChainClient, PaperMarketFeed};
    use crate::broadcast::EventBroadcaster;
    use crate::chain::{ChainCoordinator, ChainProfiles};
    use crate::config::ChainConfig;
    use crate::domain::{AgentProfile, Capability, RiskParams, StrategyConfig};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        registry: Arc<AgentRegistry>,
        market: Arc<PaperMarketFeed>,
        scheduler: Scheduler,
    }

    fn harness() -> Harness {
        let registry = Arc::new(AgentRegistry::new(Arc::new(EventBroadcaster::new(256))));
        let market = Arc::new(PaperMarketFeed::new().with_price("eth", dec!(2000)));
        let chain = Arc::new(PaperChainClient::new().with_market(market.clone()));
        let chain_config = ChainConfig {
            poll_interval_ms: Some(100),
            ..ChainConfig::default()
        };
        let coordinator = Arc::new(ChainCoordinator::new(
            registry.clone(),
            chain,
            chain_config,
            ChainProfiles::builtin(),
        ));
        let runner = Arc::new(CycleRunner::new(
            registry.clone(),
            market.clone(),
            coordinator,
            Duration::from_secs(5),
        ));
        let (scheduler, _handle) = Scheduler::new(registry.clone(), runner, SchedulerConfig::default());
        Harness {
            registry,
            market,
            scheduler,
        }
    }

    fn dca_agent(registry: &AgentRegistry, id: &str, interval_secs: u64) {
        let profile = AgentProfile::new("Alpha", "ALP", "base-sepolia").with_capability(Capability::Trading);
        registry.create_with_id(id, profile).unwrap();
        let strategy = StrategyConfig::dca(RiskParams::new(dec!(1)), "eth", interval_secs, dec!(0.1));
        registry.attach_strategy(id, strategy).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dca_runs_once_per_interval() {
        let mut h = harness();
        dca_agent(&h.registry, "a1", 60);
        let start = Instant::now();

        assert_eq!(h.scheduler.run_tick(start), 1);
        h.scheduler.wait_idle().await;
        assert_eq!(h.market.holding("a1", "eth"), dec!(0.1));

        assert_eq!(h.scheduler.run_tick(start + Duration::from_secs(30)), 0);
        assert_eq!(h.scheduler.run_tick(start + Duration::from_secs(60)), 1);
        h.scheduler.wait_idle().await;
        assert_eq!(h.market.holding("a1", "eth"), dec!(0.2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_agent_is_skipped() {
        let mut h = harness();
        dca_agent(&h.registry, "a1", 1);
        let start = Instant::now();

        assert_eq!(h.scheduler.run_tick(start), 1);
        // cycle still in flight; not queued for later either
        assert_eq!(h.scheduler.run_tick(start + Duration::from_secs(5)), 0);
        let reports = h.scheduler.wait_idle().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(h.registry.get("a1").unwrap().counters.cycles_run, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_agent_not_scheduled() {
        let mut h = harness();
        dca_agent(&h.registry, "a1", 60);
        dca_agent(&h.registry, "a2", 60);
        h.registry.pause("a1").unwrap();

        assert_eq!(h.scheduler.run_tick(Instant::now()), 1);
        h.scheduler.wait_idle().await;
        assert_eq!(h.market.holding("a1", "eth"), dec!(0));
        assert_eq!(h.market.holding("a2", "eth"), dec!(0.1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_triggers_rebalance_only_past_threshold() {
        let mut h = harness();
        let profile = AgentProfile::new("Balancer", "BAL", "base-sepolia")
            .with_capability(Capability::PortfolioManagement);
        h.registry.create_with_id("r1", profile).unwrap();
        let strategy = StrategyConfig::rebalance(
            RiskParams::new(dec!(100)),
            [("eth", dec!(0.5)), ("usdc", dec!(0.5))],
            dec!(0.1),
        );
        h.registry.attach_strategy("r1", strategy).unwrap();

        let balanced = MarketSnapshot::new("r1")
            .with_asset("eth", dec!(1), dec!(1000))
            .with_asset("usdc", dec!(1000), dec!(1));
        assert!(!h.scheduler.handle_snapshot(balanced, Instant::now()));

        let drifted = MarketSnapshot::new("r1")
            .with_asset("eth", dec!(1), dec!(3000))
            .with_asset("usdc", dec!(1000), dec!(1));
        assert!(h.scheduler.handle_snapshot(drifted, Instant::now()));
        let reports = h.scheduler.wait_idle().await;
        assert_eq!(reports[0].decisions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let h = harness();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(h.scheduler.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}

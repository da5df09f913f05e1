//! Agent runtime
//!
//! Wires registry, broadcaster, scheduler, coordinator and connectors
//! together and exposes the operations observers and operators use.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{ChainClient, MarketFeed};
use crate::broadcast::{EventBroadcaster, Subscription};
use crate::chain::{ChainCoordinator, ChainProfiles};
use crate::config::AppConfig;
use crate::connectors::{CapabilityConnector, ConnectorDispatcher};
use crate::domain::{AgentProfile, MarketSnapshot, StrategyConfig};
use crate::error::{Result, RunereumError};
use crate::persistence::AgentStore;
use crate::registry::{AgentRegistry, AgentSnapshot};
use crate::scheduler::{CycleRunner, Scheduler, SchedulerHandle};

pub struct RuntimeBuilder {
    config: AppConfig,
    feed: Arc<dyn MarketFeed>,
    client: Arc<dyn ChainClient>,
    store: Option<Arc<dyn AgentStore>>,
    connectors: Vec<Arc<dyn CapabilityConnector>>,
}

impl RuntimeBuilder {
    pub fn store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn CapabilityConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn build(self) -> Result<AgentRuntime> {
        self.config
            .validate()
            .map_err(|errors| RunereumError::InvalidConfiguration(errors.join("; ")))?;

        let broadcaster = Arc::new(EventBroadcaster::new(self.config.broadcast.subscriber_buffer));
        let mut registry = AgentRegistry::new(broadcaster.clone());
        if let Some(store) = self.store {
            registry = registry.with_store(store);
        }
        let registry = Arc::new(registry);

        let coordinator = Arc::new(ChainCoordinator::new(
            registry.clone(),
            self.client,
            self.config.chain.clone(),
            ChainProfiles::with_overrides(&self.config.chains),
        ));
        let runner = Arc::new(CycleRunner::new(
            registry.clone(),
            self.feed,
            coordinator,
            self.config.scheduler.snapshot_timeout(),
        ));
        let (scheduler, handle) =
            Scheduler::new(registry.clone(), runner, self.config.scheduler.clone());

        let dispatcher = self
            .connectors
            .into_iter()
            .fold(ConnectorDispatcher::new(registry.clone()), |d, c| d.with_connector(c));

        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(AgentRuntime {
            config: self.config,
            registry,
            broadcaster,
            handle,
            pending: Mutex::new(Some((scheduler, dispatcher))),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }
}

pub struct AgentRuntime {
    config: AppConfig,
    registry: Arc<AgentRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    handle: SchedulerHandle,
    /// Background services until `start()` takes them
    pending: Mutex<Option<(Scheduler, ConnectorDispatcher)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AgentRuntime {
    pub fn builder(
        config: AppConfig,
        feed: Arc<dyn MarketFeed>,
        client: Arc<dyn ChainClient>,
    ) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            feed,
            client,
            store: None,
            connectors: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    // =========================================================================
    // Agent operations
    // =========================================================================

    pub fn create_agent(&self, profile: AgentProfile) -> Result<String> {
        self.registry.create(profile)
    }

    pub fn attach_strategy(&self, agent_id: &str, config: StrategyConfig) -> Result<AgentSnapshot> {
        self.registry.attach_strategy(agent_id, config)
    }

    pub fn replace_strategy(&self, agent_id: &str, config: StrategyConfig) -> Result<AgentSnapshot> {
        self.registry.replace_strategy(agent_id, config)
    }

    pub fn pause(&self, agent_id: &str) -> Result<()> {
        self.registry.pause(agent_id)
    }

    pub fn resume(&self, agent_id: &str) -> Result<()> {
        self.registry.resume(agent_id)
    }

    pub fn terminate(&self, agent_id: &str) -> Result<()> {
        self.registry.terminate(agent_id)
    }

    /// Release terminated agents; see [`AgentRegistry::purge_terminated`]
    pub fn purge_terminated(&self) -> Vec<String> {
        self.registry.purge_terminated()
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<AgentSnapshot> {
        self.registry.get(agent_id)
    }

    pub fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.registry.list()
    }

    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        self.broadcaster.subscribe(agent_id)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.broadcaster.subscribe_all()
    }

    pub async fn push_snapshot(&self, snapshot: MarketSnapshot) -> Result<()> {
        self.handle.push_snapshot(snapshot).await
    }

    /// Create the agents listed in configuration and attach their strategies
    pub fn seed_agents(&self) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(self.config.agents.len());
        for seed in &self.config.agents {
            let profile = seed.profile();
            let agent_id = match &seed.id {
                Some(id) => self.registry.create_with_id(id.clone(), profile)?,
                None => self.registry.create(profile)?,
            };
            if let Some(strategy) = &seed.strategy {
                self.registry.attach_strategy(&agent_id, strategy.clone())?;
            }
            info!(agent_id = %agent_id, name = %seed.name, "seeded agent");
            ids.push(agent_id);
        }
        Ok(ids)
    }

    // =========================================================================
    // Background services
    // =========================================================================

    /// Spawn the scheduler and connector dispatcher
    pub fn start(&self) -> Result<()> {
        let taken = match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some((scheduler, dispatcher)) = taken else {
            return Err(RunereumError::Internal("runtime already started".to_string()));
        };

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(scheduler.run(self.shutdown_tx.subscribe())));
        if !dispatcher.is_empty() {
            let subscription = self.broadcaster.subscribe_all();
            tasks.push(tokio::spawn(
                dispatcher.run(subscription, self.shutdown_tx.subscribe()),
            ));
        }

        match self.tasks.lock() {
            Ok(mut guard) => guard.extend(tasks),
            Err(poisoned) => poisoned.into_inner().extend(tasks),
        }
        info!(agents = self.registry.len(), "runtime started");
        Ok(())
    }

    /// Stop scheduling new cycles and wait for in-flight ones to finish
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("runtime shutdown requested but no service was running");
        }

        let tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for joined in futures::future::join_all(tasks).await {
            if let Err(e) = joined {
                error!(error = %e, "runtime task ended abnormally");
            }
        }
        info!("runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PaperChainClient, PaperMarketFeed};
    use crate::config::AgentSeed;
    use crate::domain::{Behavior, Capability, CapabilitySet, LifecycleState, RiskParams};
    use crate::persistence::InMemoryAgentStore;
    use rust_decimal_macros::dec;

    fn runtime(config: AppConfig) -> AgentRuntime {
        let market = Arc::new(PaperMarketFeed::new().with_price("eth", dec!(2000)));
        let chain = Arc::new(PaperChainClient::new().with_market(market.clone()));
        AgentRuntime::builder(config, market, chain).build().unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.chain.max_submit_attempts = 0;
        let market = Arc::new(PaperMarketFeed::new());
        let chain = Arc::new(PaperChainClient::new());
        let err = AgentRuntime::builder(config, market, chain).build().err().unwrap();
        assert_eq!(err.code(), "invalid_configuration");
    }

    #[tokio::test]
    async fn test_seed_agents() {
        let mut config = AppConfig::default();
        config.agents.push(AgentSeed {
            id: Some("seed-1".into()),
            name: "Seeded".into(),
            ticker: "SEED".into(),
            chain: "base-sepolia".into(),
            behavior: Behavior::Conservative,
            capabilities: CapabilitySet::new().with(Capability::Trading),
            social_presence: None,
            strategy: Some(StrategyConfig::dca(RiskParams::new(dec!(1)), "eth", 60, dec!(0.1))),
        });

        let rt = runtime(config);
        assert_eq!(rt.seed_agents().unwrap(), vec!["seed-1".to_string()]);
        assert_eq!(rt.get_agent("seed-1").unwrap().state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let rt = runtime(AppConfig::default());
        rt.start().unwrap();
        assert!(rt.start().is_err());
        rt.shutdown().await;
    }

    #[test]
    fn test_purge_terminated() {
        let rt = runtime(AppConfig::default());
        let id = rt
            .create_agent(AgentProfile::new("Alpha", "ALP", "base-sepolia"))
            .unwrap();
        rt.terminate(&id).unwrap();
        assert_eq!(rt.purge_terminated(), vec![id]);
        assert!(rt.list_agents().is_empty());
    }

    #[tokio::test]
    async fn test_store_receives_lifecycle_snapshots() {
        let store = Arc::new(InMemoryAgentStore::new());
        let market = Arc::new(PaperMarketFeed::new());
        let chain = Arc::new(PaperChainClient::new());
        let rt = AgentRuntime::builder(AppConfig::default(), market, chain)
            .store(store.clone())
            .build()
            .unwrap();

        let id = rt
            .create_agent(AgentProfile::new("Alpha", "ALP", "base-sepolia"))
            .unwrap();
        rt.terminate(&id).unwrap();
        assert!(store.save_count() >= 2);
    }
}

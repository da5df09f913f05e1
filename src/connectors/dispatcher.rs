//! Routes the global event stream to capability connectors

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CapabilityConnector;
use crate::broadcast::Subscription;
use crate::domain::Event;
use crate::error::RunereumError;
use crate::registry::AgentRegistry;

pub struct ConnectorDispatcher {
    registry: Arc<AgentRegistry>,
    connectors: Vec<Arc<dyn CapabilityConnector>>,
}

impl ConnectorDispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            connectors: Vec::new(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn CapabilityConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Hand the event to every connector whose capability the agent has
    /// enabled. Each call runs detached; failures are only logged.
    pub fn dispatch(&self, event: &Event) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for connector in &self.connectors {
            if !connector.accepts(event.kind)
                || !self
                    .registry
                    .has_capability(&event.agent_id, connector.capability())
            {
                continue;
            }

            let connector = connector.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = connector.handle(&event).await {
                    warn!(
                        connector = connector.name(),
                        agent_id = %event.agent_id,
                        sequence = event.sequence,
                        error = %e,
                        "connector failed"
                    );
                }
            }));
        }
        handles
    }

    /// Consume events until shutdown. Falling behind drops the subscription;
    /// the dispatcher resubscribes and carries on from the next event.
    pub async fn run(self, mut subscription: Subscription, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(connectors = self.connectors.len(), "connector dispatcher starting");

        loop {
            tokio::select! {
                next = subscription.recv() => {
                    match next {
                        Ok(Some(event)) => {
                            let spawned = self.dispatch(&event).len();
                            if spawned > 0 {
                                debug!(agent_id = %event.agent_id, kind = %event.kind, spawned, "event dispatched");
                            }
                        }
                        Ok(None) => break,
                        Err(RunereumError::SubscriberOverflow { agent_id, last_sequence, .. }) => {
                            warn!(%agent_id, last_sequence, "connector dispatcher fell behind, resubscribing");
                            subscription = self.registry.broadcaster().subscribe_all();
                        }
                        Err(e) => {
                            warn!(error = %e, "connector dispatcher stream error");
                            break;
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        info!("connector dispatcher stopped");
    }
}

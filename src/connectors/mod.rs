//! Capability connectors
//!
//! Side channels (social posting, notifications) that react to an agent's
//! events when the matching capability is enabled. They observe the event
//! stream only; nothing they do feeds back into the registry.

pub mod announcer;
pub mod dispatcher;

use async_trait::async_trait;

use crate::domain::{Capability, Event, EventKind};
use crate::error::Result;

pub use announcer::TradeAnnouncer;
pub use dispatcher::ConnectorDispatcher;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityConnector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability the agent must have enabled for this connector to run
    fn capability(&self) -> Capability;

    fn accepts(&self, kind: EventKind) -> bool;

    async fn handle(&self, event: &Event) -> Result<()>;
}

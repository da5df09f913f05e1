//! Receiving side of an event subscription

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::Event;
use crate::error::{Result, RunereumError};

/// Which events a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionScope {
    /// Events of one agent
    Agent(String),
    /// Events of every agent
    All,
}

impl SubscriptionScope {
    pub fn matches(&self, agent_id: &str) -> bool {
        match self {
            SubscriptionScope::Agent(id) => id == agent_id,
            SubscriptionScope::All => true,
        }
    }
}

/// Sent to a subscriber that was dropped because its buffer filled up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowNotice {
    pub subscriber_id: Uuid,
    /// Agent whose event could not be delivered
    pub agent_id: String,
    /// Sequence number of the first undelivered event
    pub undelivered_sequence: u64,
    pub dropped_at: DateTime<Utc>,
}

/// Handle held by an observer; events arrive in per-agent sequence order
pub struct Subscription {
    id: Uuid,
    scope: SubscriptionScope,
    rx: mpsc::Receiver<Event>,
    overflow_rx: Option<oneshot::Receiver<OverflowNotice>>,
}

impl Subscription {
    pub(crate) fn new(
        id: Uuid,
        scope: SubscriptionScope,
        rx: mpsc::Receiver<Event>,
        overflow_rx: oneshot::Receiver<OverflowNotice>,
    ) -> Self {
        Self {
            id,
            scope,
            rx,
            overflow_rx: Some(overflow_rx),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once the subscription has been closed, and
    /// `Err(SubscriberOverflow)` exactly once if it was dropped for falling behind.
    /// Events buffered before the overflow are still delivered first.
    pub async fn recv(&mut self) -> Result<Option<Event>> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => self.closed(),
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `Ok(None)` also means "nothing yet"
    pub fn try_recv(&mut self) -> Result<Option<Event>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => self.closed(),
        }
    }

    fn closed(&mut self) -> Result<Option<Event>> {
        let Some(mut overflow_rx) = self.overflow_rx.take() else {
            return Ok(None);
        };
        match overflow_rx.try_recv() {
            Ok(notice) => Err(RunereumError::SubscriberOverflow {
                subscriber_id: notice.subscriber_id.to_string(),
                agent_id: notice.agent_id,
                last_sequence: notice.undelivered_sequence.saturating_sub(1),
            }),
            Err(_) => Ok(None),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

//! Event Broadcaster
//!
//! Assigns per-agent sequence numbers and fans events out to bounded
//! per-subscriber queues. Publishing never waits on a subscriber: a full
//! queue gets the subscriber dropped with an overflow notice.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::subscription::{OverflowNotice, Subscription, SubscriptionScope};
use crate::domain::{Event, EventKind};

/// Broadcast statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub overflowed: u64,
    pub subscribers: usize,
}

struct SubscriberEntry {
    id: Uuid,
    scope: SubscriptionScope,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    overflow_tx: Mutex<Option<oneshot::Sender<OverflowNotice>>>,
    dropped: AtomicBool,
}

enum Delivery {
    Sent,
    Skipped,
    Overflow,
    Closed,
}

impl SubscriberEntry {
    fn deliver(&self, event: &Event) -> Delivery {
        if self.dropped.load(Ordering::Acquire) || !self.scope.matches(&event.agent_id) {
            return Delivery::Skipped;
        }

        let mut guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            return Delivery::Closed;
        };

        match tx.try_send(event.clone()) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.store(true, Ordering::Release);
                if let Some(notice_tx) = self
                    .overflow_tx
                    .lock()
                    .map(|mut g| g.take())
                    .unwrap_or(None)
                {
                    let _ = notice_tx.send(OverflowNotice {
                        subscriber_id: self.id,
                        agent_id: event.agent_id.clone(),
                        undelivered_sequence: event.sequence,
                        dropped_at: Utc::now(),
                    });
                }
                // Closing the queue lets the receiver drain, then see the notice.
                guard.take();
                Delivery::Overflow
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.store(true, Ordering::Release);
                guard.take();
                Delivery::Closed
            }
        }
    }
}

/// Publishes events to all current subscribers
pub struct EventBroadcaster {
    buffer: usize,
    /// Per-agent last sequence number; its lock also serializes that agent's publications
    sequences: DashMap<String, Arc<Mutex<u64>>>,
    subscribers: RwLock<Vec<Arc<SubscriberEntry>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    overflowed: AtomicU64,
}

impl EventBroadcaster {
    /// Create a broadcaster whose subscriber queues hold `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            sequences: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Subscribe to one agent's events from now on
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        self.add_subscriber(SubscriptionScope::Agent(agent_id.to_string()))
    }

    /// Subscribe to every agent's events from now on
    pub fn subscribe_all(&self) -> Subscription {
        self.add_subscriber(SubscriptionScope::All)
    }

    fn add_subscriber(&self, scope: SubscriptionScope) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let (overflow_tx, overflow_rx) = oneshot::channel();

        let entry = Arc::new(SubscriberEntry {
            id,
            scope: scope.clone(),
            tx: Mutex::new(Some(tx)),
            overflow_tx: Mutex::new(Some(overflow_tx)),
            dropped: AtomicBool::new(false),
        });

        match self.subscribers.write() {
            Ok(mut subs) => subs.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        debug!(subscriber_id = %id, ?scope, "subscriber attached");

        Subscription::new(id, scope, rx, overflow_rx)
    }

    /// Detach a subscriber; its stream ends after buffered events
    pub fn unsubscribe(&self, subscriber_id: Uuid) -> bool {
        let mut subs = match self.subscribers.write() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subs.len();
        subs.retain(|s| s.id != subscriber_id);
        before != subs.len()
    }

    /// Assign the agent's next sequence number and deliver to matching subscribers
    pub fn publish(&self, agent_id: &str, kind: EventKind, payload: serde_json::Value) -> Event {
        let slot = self
            .sequences
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone();

        let mut last = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last += 1;

        let event = Event {
            agent_id: agent_id.to_string(),
            sequence: *last,
            kind,
            payload,
            timestamp: Utc::now(),
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        // Delivery stays under the agent's lock so per-agent order holds per queue.
        let mut stale = false;
        {
            let subs = match self.subscribers.read() {
                Ok(subs) => subs,
                Err(poisoned) => poisoned.into_inner(),
            };
            for sub in subs.iter() {
                match sub.deliver(&event) {
                    Delivery::Sent => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Skipped => {}
                    Delivery::Overflow => {
                        self.overflowed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscriber_id = %sub.id,
                            agent_id,
                            sequence = event.sequence,
                            "subscriber overflow, dropping subscriber"
                        );
                        stale = true;
                    }
                    Delivery::Closed => stale = true,
                }
            }
        }
        drop(last);

        if stale {
            self.prune();
        }

        event
    }

    fn prune(&self) {
        let mut subs = match self.subscribers.write() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|s| !s.dropped.load(Ordering::Acquire));
    }

    /// Last sequence number assigned to an agent (0 if none)
    pub fn last_sequence(&self, agent_id: &str) -> u64 {
        self.sequences
            .get(agent_id)
            .map(|slot| match slot.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            })
            .unwrap_or(0)
    }

    /// Drop an agent's sequence counter; a later publication for the id starts at 1
    pub fn forget(&self, agent_id: &str) -> bool {
        self.sequences.remove(agent_id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunereumError;
    use serde_json::json;

    #[tokio::test]
    async fn test_sequences_are_per_agent_and_gapless() {
        let broadcaster = EventBroadcaster::new(16);
        let mut sub = broadcaster.subscribe_all();

        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        broadcaster.publish("a2", EventKind::Lifecycle, json!({}));
        broadcaster.publish("a1", EventKind::Decision, json!({}));

        let e1 = sub.recv().await.unwrap().unwrap();
        let e2 = sub.recv().await.unwrap().unwrap();
        let e3 = sub.recv().await.unwrap().unwrap();
        assert_eq!((e1.agent_id.as_str(), e1.sequence), ("a1", 1));
        assert_eq!((e2.agent_id.as_str(), e2.sequence), ("a2", 1));
        assert_eq!((e3.agent_id.as_str(), e3.sequence), ("a1", 2));
        assert_eq!(broadcaster.last_sequence("a1"), 2);
    }

    #[tokio::test]
    async fn test_agent_scope_filters() {
        let broadcaster = EventBroadcaster::new(16);
        let mut sub = broadcaster.subscribe("a2");

        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        broadcaster.publish("a2", EventKind::Lifecycle, json!({}));

        let event = sub.recv().await.unwrap().unwrap();
        assert_eq!(event.agent_id, "a2");
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_joiner_sees_only_new_events() {
        let broadcaster = EventBroadcaster::new(16);
        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));

        let mut sub = broadcaster.subscribe("a1");
        broadcaster.publish("a1", EventKind::Decision, json!({}));

        let event = sub.recv().await.unwrap().unwrap();
        assert_eq!(event.sequence, 3);
    }

    #[tokio::test]
    async fn test_overflow_drops_only_slow_subscriber() {
        let broadcaster = EventBroadcaster::new(2);
        let mut slow = broadcaster.subscribe_all();
        let mut fast = broadcaster.subscribe_all();

        for i in 0..3 {
            broadcaster.publish("a1", EventKind::Decision, json!({ "i": i }));
            // fast keeps up
            assert!(fast.recv().await.unwrap().is_some());
        }

        // slow gets its two buffered events, then the overflow notice
        assert_eq!(slow.recv().await.unwrap().unwrap().sequence, 1);
        assert_eq!(slow.recv().await.unwrap().unwrap().sequence, 2);
        match slow.recv().await {
            Err(RunereumError::SubscriberOverflow {
                agent_id,
                last_sequence,
                ..
            }) => {
                assert_eq!((agent_id.as_str(), last_sequence), ("a1", 2))
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        assert!(slow.recv().await.unwrap().is_none());

        broadcaster.publish("a1", EventKind::Decision, json!({}));
        assert_eq!(fast.recv().await.unwrap().unwrap().sequence, 4);

        let stats = broadcaster.stats();
        assert_eq!(stats.overflowed, 1);
        assert_eq!(stats.subscribers, 1);
    }

    #[tokio::test]
    async fn test_global_overflow_names_the_agent() {
        let broadcaster = EventBroadcaster::new(1);
        let mut sub = broadcaster.subscribe_all();

        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        broadcaster.publish("a1", EventKind::Decision, json!({}));
        broadcaster.publish("a2", EventKind::Lifecycle, json!({}));

        assert_eq!(sub.recv().await.unwrap().unwrap().agent_id, "a1");
        match sub.recv().await {
            // a1's second event was the one that did not fit
            Err(RunereumError::SubscriberOverflow {
                agent_id,
                last_sequence,
                ..
            }) => assert_eq!((agent_id.as_str(), last_sequence), ("a1", 1)),
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_forget_resets_sequence() {
        let broadcaster = EventBroadcaster::new(4);
        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        assert!(broadcaster.forget("a1"));
        assert!(!broadcaster.forget("a1"));
        assert_eq!(broadcaster.last_sequence("a1"), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broadcaster = EventBroadcaster::new(4);
        let sub = broadcaster.subscribe("a1");
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(sub);

        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let broadcaster = EventBroadcaster::new(4);
        let mut sub = broadcaster.subscribe("a1");
        broadcaster.publish("a1", EventKind::Lifecycle, json!({}));
        assert!(broadcaster.unsubscribe(sub.id()));

        assert!(sub.recv().await.unwrap().is_some());
        assert!(sub.recv().await.unwrap().is_none());
    }
}

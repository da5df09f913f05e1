//! Event fan-out to observers
//!
//! Every event gets a per-agent sequence number at publication time.
//! Subscribers only see events published after they subscribed.

mod broadcaster;
mod subscription;

pub use broadcaster::{BroadcastStats, EventBroadcaster};
pub use subscription::{OverflowNotice, Subscription, SubscriptionScope};

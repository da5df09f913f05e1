//! Trade announcements for agents with social presence
//!
//! Formats confirmed trades and lifecycle milestones as short text posts.
//! Posts go to the log; wiring a real social API is a deployment concern.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::CapabilityConnector;
use crate::domain::{Capability, Event, EventKind, TradeAction, TransactionRecord};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct TradeAnnouncer {
    posted: AtomicU64,
}

impl TradeAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Text for an event, `None` when the event is not worth a post
    pub fn render(event: &Event) -> Result<Option<String>> {
        let text = match event.kind {
            EventKind::TxConfirmed => {
                let tx: TransactionRecord = serde_json::from_value(event.payload.clone())?;
                let verb = match tx.action {
                    TradeAction::Buy => "Bought",
                    TradeAction::Sell => "Sold",
                    TradeAction::None => return Ok(None),
                };
                let reference = tx
                    .tx_ref
                    .as_deref()
                    .map(|r| format!(" | tx {}", r.chars().take(16).collect::<String>()))
                    .unwrap_or_default();
                format!(
                    "{} {} {}{}",
                    verb,
                    tx.amount.normalize(),
                    tx.asset.to_uppercase(),
                    reference
                )
            }
            EventKind::StrategyAttached => {
                let kind = event
                    .payload
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .unwrap_or("new");
                format!("Now running a {} strategy", kind)
            }
            _ => return Ok(None),
        };
        Ok(Some(text))
    }
}

#[async_trait]
impl CapabilityConnector for TradeAnnouncer {
    fn name(&self) -> &'static str {
        "trade-announcer"
    }

    fn capability(&self) -> Capability {
        Capability::SocialMedia
    }

    fn accepts(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::TxConfirmed | EventKind::StrategyAttached)
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if let Some(text) = Self::render(event)? {
            self.posted.fetch_add(1, Ordering::Relaxed);
            info!(agent_id = %event.agent_id, sequence = event.sequence, post = %text, "announcement");
        }
        Ok(())
    }
}

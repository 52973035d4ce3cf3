//! Per-epoch subscription bookkeeping and inbound frame demultiplexing.

use anyhow::{Context, Result};
use shared::protocol::{BrokerEvent, Topic};
use tracing::{debug, info, warn};

use crate::transport::{BrokerHandle, InboundFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub topic: Topic,
    pub epoch: u64,
}

#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    active_epoch: Option<u64>,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn active_epoch(&self) -> Option<u64> {
        self.active_epoch
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Subscribes every topic for `epoch`. Returns `Ok(false)` without touching
    /// the broker when that epoch (or a newer one) is already active.
    pub async fn on_connected(&mut self, epoch: u64, handle: &dyn BrokerHandle) -> Result<bool> {
        if let Some(active) = self.active_epoch {
            if active >= epoch {
                debug!(epoch, active, "router: subscriptions already active");
                return Ok(false);
            }
        }

        self.subscriptions.clear();
        for (index, topic) in Topic::ALL.into_iter().enumerate() {
            let id = format!("sub-{epoch}-{index}");
            handle
                .subscribe(&id, topic.destination())
                .await
                .with_context(|| format!("failed to subscribe {}", topic.destination()))?;
            self.subscriptions.push(Subscription { id, topic, epoch });
        }
        self.active_epoch = Some(epoch);
        info!(epoch, "router: subscriptions established");
        Ok(true)
    }

    pub fn on_disconnected(&mut self) {
        if let Some(epoch) = self.active_epoch.take() {
            debug!(epoch, "router: subscriptions released");
        }
        self.subscriptions.clear();
    }

    /// Decodes a frame that belongs to the active epoch. Anything else, and
    /// anything malformed, is logged and dropped.
    pub fn route(&self, epoch: u64, frame: &InboundFrame) -> Option<BrokerEvent> {
        if self.active_epoch != Some(epoch) {
            debug!(
                epoch,
                active = ?self.active_epoch,
                destination = %frame.destination,
                "router: dropping frame outside the active epoch"
            );
            return None;
        }

        match BrokerEvent::decode(&frame.destination, &frame.body) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(epoch, error = %err, "router: dropping undecodable frame");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;

//! Broker transport session: one live connection at a time, perpetual
//! reconnect with a fixed backoff, and an ordered stream of connection events.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub destination: String,
    pub body: String,
}

#[derive(Debug)]
pub enum LinkEvent {
    Frame(InboundFrame),
    Closed(Option<String>),
}

/// Outbound half of an established broker connection.
#[async_trait]
pub trait BrokerHandle: Send + Sync {
    async fn subscribe(&self, subscription_id: &str, destination: &str) -> Result<()>;
    async fn publish(&self, destination: &str, body: &str) -> Result<()>;
    async fn close(&self);
}

pub struct BrokerLink {
    pub handle: Arc<dyn BrokerHandle>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<BrokerLink>;
}

/// Everything the session reports, in the order it happened.
#[derive(Debug)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Established { epoch: u64 },
    Frame { epoch: u64, frame: InboundFrame },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transmission failed: {0}")]
    Transmission(String),
}

enum LinkEnd {
    Lost,
    Forced,
}

pub struct TransportSession {
    connector: Arc<dyn BrokerConnector>,
    backoff: Duration,
    inner: Mutex<SessionInner>,
    events: mpsc::UnboundedSender<TransportEvent>,
    wake: mpsc::UnboundedSender<()>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

struct SessionInner {
    state: ConnectionState,
    epoch: u64,
    handle: Option<Arc<dyn BrokerHandle>>,
    // Per-connection, so a stale request can never tear down a later link.
    force: Option<Arc<Notify>>,
    shut_down: bool,
}

impl TransportSession {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        backoff: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            connector,
            backoff,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                epoch: 0,
                handle: None,
                force: None,
                shut_down: false,
            }),
            events,
            wake,
            wake_rx: Mutex::new(Some(wake_rx)),
        });
        (session, events_rx)
    }

    /// Spawns the connection supervisor, which connects immediately. Calling
    /// it again is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let Some(wake_rx) = self.wake_rx.lock().await.take() else {
            debug!("transport: supervisor already running");
            return;
        };
        tokio::spawn(Arc::clone(self).supervise(wake_rx));
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Number of successful connections so far.
    pub async fn epoch(&self) -> u64 {
        self.inner.lock().await.epoch
    }

    pub async fn handle_for_epoch(&self, epoch: u64) -> Option<Arc<dyn BrokerHandle>> {
        let inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.state != ConnectionState::Connected {
            return None;
        }
        inner.handle.clone()
    }

    /// Skips any pending backoff when the session is disconnected.
    pub async fn ensure_connected(&self) {
        let inner = self.inner.lock().await;
        if !inner.shut_down && inner.state == ConnectionState::Disconnected {
            let _ = self.wake.send(());
        }
    }

    /// Drops the current link, if any, and reconnects without waiting for the
    /// backoff.
    pub async fn force_reconnect(&self) {
        let inner = self.inner.lock().await;
        if inner.shut_down {
            return;
        }
        match inner.state {
            ConnectionState::Connected => {
                if let Some(force) = &inner.force {
                    info!(epoch = inner.epoch, "transport: forcing reconnect");
                    force.notify_one();
                }
            }
            ConnectionState::Disconnected => {
                let _ = self.wake.send(());
            }
            ConnectionState::Connecting => {}
        }
    }

    /// Fire-and-forget publish. Nothing is queued while disconnected.
    pub async fn publish(&self, destination: &str, body: &str) -> Result<(), PublishError> {
        let handle = {
            let inner = self.inner.lock().await;
            match (&inner.handle, inner.state) {
                (Some(handle), ConnectionState::Connected) => Arc::clone(handle),
                _ => {
                    warn!(destination, "transport: dropping publish while not connected");
                    return Err(PublishError::NotConnected);
                }
            }
        };

        handle.publish(destination, body).await.map_err(|err| {
            warn!(destination, error = %err, "transport: publish failed");
            PublishError::Transmission(err.to_string())
        })
    }

    /// Stops reconnecting and closes the current link.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shut_down = true;
        if let Some(force) = &inner.force {
            force.notify_one();
        }
        let _ = self.wake.send(());
        info!("transport: shutting down");
    }

    async fn supervise(self: Arc<Self>, mut wake: mpsc::UnboundedReceiver<()>) {
        let mut delay = None;
        loop {
            if let Some(delay) = delay.take() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = wake.recv() => debug!("transport: reconnect requested during backoff"),
                }
            }
            while wake.try_recv().is_ok() {}

            if !self.begin_attempt().await {
                break;
            }

            match self.connector.connect().await {
                Ok(BrokerLink { handle, events }) => {
                    match self.on_connected(Arc::clone(&handle)).await {
                        Some((epoch, force)) => {
                            let end = self.pump(epoch, events, force).await;
                            handle.close().await;
                            delay = match end {
                                LinkEnd::Lost => Some(self.backoff),
                                LinkEnd::Forced => None,
                            };
                        }
                        None => handle.close().await,
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "transport: connect failed, retrying after backoff"
                    );
                    delay = Some(self.backoff);
                }
            }

            self.mark_disconnected().await;
        }
        debug!("transport: supervisor stopped");
    }

    async fn begin_attempt(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return false;
        }
        self.transition(&mut inner, ConnectionState::Connecting);
        true
    }

    async fn on_connected(&self, handle: Arc<dyn BrokerHandle>) -> Option<(u64, Arc<Notify>)> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return None;
        }
        inner.epoch += 1;
        inner.handle = Some(handle);
        let force = Arc::new(Notify::new());
        inner.force = Some(Arc::clone(&force));
        self.transition(&mut inner, ConnectionState::Connected);
        let _ = self.events.send(TransportEvent::Established { epoch: inner.epoch });
        info!(epoch = inner.epoch, "transport: connected");
        Some((inner.epoch, force))
    }

    async fn pump(
        &self,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        force: Arc<Notify>,
    ) -> LinkEnd {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LinkEvent::Frame(frame)) => {
                        let _ = self.events.send(TransportEvent::Frame { epoch, frame });
                    }
                    Some(LinkEvent::Closed(reason)) => {
                        warn!(
                            epoch,
                            reason = reason.as_deref().unwrap_or("closed by peer"),
                            "transport: connection lost"
                        );
                        return LinkEnd::Lost;
                    }
                    None => {
                        warn!(epoch, "transport: connection dropped");
                        return LinkEnd::Lost;
                    }
                },
                () = force.notified() => return LinkEnd::Forced,
            }
        }
    }

    async fn mark_disconnected(&self) {
        let mut inner = self.inner.lock().await;
        inner.handle = None;
        inner.force = None;
        self.transition(&mut inner, ConnectionState::Disconnected);
    }

    // State is flipped before the event is queued so no consumer sees a stale value.
    fn transition(&self, inner: &mut SessionInner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        debug!(from = ?inner.state, to = ?next, "transport: state change");
        inner.state = next;
        let _ = self.events.send(TransportEvent::StateChanged(next));
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

use std::{sync::Arc, time::Duration};

use shared::domain::UserId;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    backend::ChatBackend,
    transport::{ConnectionState, TransportSession},
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic presence ping. A failed ping, or a transport seen disconnected,
/// triggers a reconnect.
pub struct HeartbeatTask {
    task: JoinHandle<()>,
}

impl HeartbeatTask {
    pub fn start(
        user_id: UserId,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<TransportSession>,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match backend.heartbeat(user_id).await {
                    Ok(()) => debug!(user_id = user_id.0, "heartbeat: ok"),
                    Err(err) => {
                        warn!(user_id = user_id.0, error = %err, "heartbeat: failed, reconnecting");
                        transport.force_reconnect().await;
                        continue;
                    }
                }
                if transport.state().await == ConnectionState::Disconnected {
                    debug!("heartbeat: transport disconnected, reconnecting");
                    transport.ensure_connected().await;
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/heartbeat_tests.rs"]
mod tests;

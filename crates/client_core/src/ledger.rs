//! Unread counters and presence labels.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use futures::future::join_all;
use shared::domain::{PresenceStatus, UserId};
use tracing::warn;

use crate::{backend::ChatBackend, conversation::Peer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadLedger {
    counts: HashMap<UserId, u32>,
}

impl UnreadLedger {
    #[cfg(test)]
    pub(crate) fn get(&self, peer_id: UserId) -> u32 {
        self.counts.get(&peer_id).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &HashMap<UserId, u32> {
        &self.counts
    }

    /// Replaces the count with the message store's authoritative value.
    pub fn set_baseline(&mut self, peer_id: UserId, count: u32) {
        self.counts.insert(peer_id, count);
    }

    pub fn increment(&mut self, peer_id: UserId) -> u32 {
        let count = self.counts.entry(peer_id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Returns the count that was cleared.
    pub fn reset(&mut self, peer_id: UserId) -> u32 {
        self.counts.insert(peer_id, 0).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// Fetches every peer's unread count concurrently. A failed fetch counts as 0.
pub async fn fetch_unread_baseline(
    backend: &dyn ChatBackend,
    user_id: UserId,
    peer_ids: &[UserId],
) -> Vec<(UserId, u32)> {
    join_all(peer_ids.iter().map(|&peer_id| async move {
        match backend.unread_count(user_id, peer_id).await {
            Ok(count) => (peer_id, count),
            Err(err) => {
                warn!(peer_id = peer_id.0, error = %err, "ledger: unread count unavailable");
                (peer_id, 0)
            }
        }
    }))
    .await
}

pub fn relative_time(then: NaiveDateTime, now: NaiveDateTime) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min{} ago", plural(minutes));
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} hour{} ago", plural(hours));
    }
    let days = hours / 24;
    format!("{days} day{} ago", plural(days))
}

/// Recomputed on every call; callers must not cache the result.
pub fn presence_label(peer: &Peer, now: NaiveDateTime) -> String {
    match (peer.status, peer.last_seen_at) {
        (PresenceStatus::Online, _) => "Online".to_string(),
        (PresenceStatus::Offline, Some(last_seen)) => {
            format!("Last seen {}", relative_time(last_seen, now))
        }
        (PresenceStatus::Offline, None) => "Offline".to_string(),
    }
}

fn plural(n: i64) -> &'static str {
    if n > 1 {
        "s"
    } else {
        ""
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;

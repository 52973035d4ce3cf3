use super::*;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use shared::protocol::{ChatMessage, UserSummary};

fn at(hour: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|date| date.and_hms_opt(hour, min, 0))
        .expect("valid time")
}

fn peer(status: PresenceStatus, last_seen_at: Option<NaiveDateTime>) -> Peer {
    Peer {
        id: UserId(2),
        username: "bob".into(),
        status,
        last_seen_at,
    }
}

#[test]
fn relative_time_buckets() {
    let now = at(12, 0);
    assert_eq!(relative_time(now - Duration::seconds(30), now), "just now");
    assert_eq!(relative_time(now - Duration::minutes(1), now), "1 min ago");
    assert_eq!(relative_time(now - Duration::minutes(59), now), "59 mins ago");
    assert_eq!(relative_time(now - Duration::hours(1), now), "1 hour ago");
    assert_eq!(relative_time(now - Duration::hours(23), now), "23 hours ago");
    assert_eq!(relative_time(now - Duration::days(1), now), "1 day ago");
    assert_eq!(relative_time(now - Duration::days(12), now), "12 days ago");
}

#[test]
fn presence_label_is_recomputed_against_now() {
    let last_seen = at(11, 0);
    let offline = peer(PresenceStatus::Offline, Some(last_seen));

    assert_eq!(presence_label(&offline, at(11, 0)), "Last seen just now");
    assert_eq!(presence_label(&offline, at(11, 5)), "Last seen 5 mins ago");
    assert_eq!(
        presence_label(&peer(PresenceStatus::Online, Some(last_seen)), at(12, 0)),
        "Online"
    );
    assert_eq!(presence_label(&peer(PresenceStatus::Offline, None), at(12, 0)), "Offline");
}

#[test]
fn ledger_counts_never_go_negative() {
    let mut ledger = UnreadLedger::default();
    assert_eq!(ledger.get(UserId(3)), 0);
    assert_eq!(ledger.increment(UserId(3)), 1);
    assert_eq!(ledger.increment(UserId(3)), 2);
    assert_eq!(ledger.reset(UserId(3)), 2);
    assert_eq!(ledger.reset(UserId(3)), 0);

    ledger.set_baseline(UserId(4), 7);
    assert_eq!(ledger.get(UserId(4)), 7);
    ledger.clear();
    assert!(ledger.counts().is_empty());
}

struct CountingBackend;

#[async_trait]
impl ChatBackend for CountingBackend {
    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        Ok(Vec::new())
    }

    async fn fetch_user(&self, _user_id: UserId) -> Result<UserSummary> {
        Err(anyhow!("unused"))
    }

    async fn fetch_history(&self, _user_id: UserId, _peer_id: UserId) -> Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }

    async fn unread_count(&self, _user_id: UserId, peer_id: UserId) -> Result<u32> {
        match peer_id.0 {
            2 => Ok(3),
            3 => Err(anyhow!("store unavailable")),
            other => Ok(other as u32),
        }
    }

    async fn mark_as_read(&self, _user_id: UserId, _peer_id: UserId) -> Result<()> {
        Ok(())
    }

    async fn heartbeat(&self, _user_id: UserId) -> Result<()> {
        Ok(())
    }

    async fn logout(&self, _user_id: UserId) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn baseline_degrades_failed_counts_to_zero() {
    let baseline =
        fetch_unread_baseline(&CountingBackend, UserId(1), &[UserId(2), UserId(3), UserId(5)])
            .await;

    assert_eq!(
        baseline,
        vec![(UserId(2), 3), (UserId(3), 0), (UserId(5), 5)]
    );
}

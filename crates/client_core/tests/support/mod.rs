#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use client_core::{
    transport::{BrokerConnector, BrokerHandle, BrokerLink, InboundFrame, LinkEvent},
    ChatBackend, ChatClient, ClientEvent, Session,
};
use shared::{
    domain::{PresenceStatus, UserId},
    protocol::{
        ChatMessage, Topic, UserSummary, SEND_MESSAGE_DESTINATION, SEND_TYPING_DESTINATION,
    },
};
use tokio::sync::{broadcast, mpsc};

pub const ALICE: UserId = UserId(1);
pub const BOB: UserId = UserId(2);
pub const CAROL: UserId = UserId(3);

#[derive(Default)]
struct BrokerState {
    attempts: usize,
    links: Vec<mpsc::UnboundedSender<LinkEvent>>,
    subscriptions: Vec<(usize, String, String)>,
    published: Vec<(String, String)>,
    publish_failures: usize,
    echo: bool,
}

/// In-memory broker: every connect yields a fresh link, publishes are
/// recorded and, with echo on, broadcast back like a real topic would.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn echoing() -> Self {
        let broker = Self::default();
        broker.state.lock().unwrap().echo = true;
        broker
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// `(link index, subscription id, destination)` in subscribe order.
    pub fn subscriptions(&self) -> Vec<(usize, String, String)> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, body)| serde_json::from_str(&body).expect("published json"))
            .collect()
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().publish_failures = count;
    }

    /// Pushes a frame down the most recent link.
    pub fn deliver(&self, topic: Topic, body: impl Into<String>) {
        let state = self.state.lock().unwrap();
        let link = state.links.last().expect("no link yet");
        let _ = link.send(LinkEvent::Frame(InboundFrame {
            destination: topic.destination().to_string(),
            body: body.into(),
        }));
    }

    pub fn deliver_message(&self, message: &ChatMessage) {
        self.deliver(Topic::Messages, serde_json::to_string(message).expect("json"));
    }

    pub fn drop_link(&self) {
        let state = self.state.lock().unwrap();
        let link = state.links.last().expect("no link yet");
        let _ = link.send(LinkEvent::Closed(Some("connection reset".into())));
    }
}

struct FakeHandle {
    index: usize,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerHandle for FakeHandle {
    async fn subscribe(&self, subscription_id: &str, destination: &str) -> Result<()> {
        self.state.lock().unwrap().subscriptions.push((
            self.index,
            subscription_id.to_string(),
            destination.to_string(),
        ));
        Ok(())
    }

    async fn publish(&self, destination: &str, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.publish_failures > 0 {
            state.publish_failures -= 1;
            return Err(anyhow!("socket write failed"));
        }
        state
            .published
            .push((destination.to_string(), body.to_string()));
        if state.echo {
            let topic = match destination {
                SEND_MESSAGE_DESTINATION => Topic::Messages,
                SEND_TYPING_DESTINATION => Topic::Typing,
                _ => return Ok(()),
            };
            let _ = state.links[self.index].send(LinkEvent::Frame(InboundFrame {
                destination: topic.destination().to_string(),
                body: body.to_string(),
            }));
        }
        Ok(())
    }

    async fn close(&self) {}
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    async fn connect(&self) -> Result<BrokerLink> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        let (tx, events) = mpsc::unbounded_channel();
        state.links.push(tx);
        Ok(BrokerLink {
            handle: Arc::new(FakeHandle {
                index: state.links.len() - 1,
                state: Arc::clone(&self.state),
            }),
            events,
        })
    }
}

#[derive(Default)]
struct BackendState {
    users: Vec<UserSummary>,
    unread: HashMap<UserId, u32>,
    history: HashMap<UserId, Vec<ChatMessage>>,
    calls: Vec<String>,
    directory_down: bool,
    logout_fails: bool,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    /// Alice, Bob (3 unread) and Carol.
    pub fn with_directory() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            state.users = [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol")]
                .into_iter()
                .map(|(id, username)| UserSummary {
                    id,
                    username: username.into(),
                    status: Some(PresenceStatus::Online),
                    last_seen: None,
                })
                .collect();
            state.unread.insert(BOB, 3);
        }
        backend
    }

    pub fn set_history(&self, peer_id: UserId, messages: Vec<ChatMessage>) {
        self.state.lock().unwrap().history.insert(peer_id, messages);
    }

    pub fn set_directory_down(&self) {
        self.state.lock().unwrap().directory_down = true;
    }

    pub fn set_logout_fails(&self) {
        self.state.lock().unwrap().logout_fails = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, BackendState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let state = self.record("GET users".into());
        if state.directory_down {
            return Err(anyhow!("503 Service Unavailable"));
        }
        Ok(state.users.clone())
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<UserSummary> {
        let state = self.record(format!("GET users/{user_id}"));
        state
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found"))
    }

    async fn fetch_history(&self, user_id: UserId, peer_id: UserId) -> Result<Vec<ChatMessage>> {
        let state = self.record(format!("GET messages/{user_id}/{peer_id}"));
        Ok(state.history.get(&peer_id).cloned().unwrap_or_default())
    }

    async fn unread_count(&self, user_id: UserId, peer_id: UserId) -> Result<u32> {
        let state = self.record(format!("GET messages/unread/{user_id}/{peer_id}"));
        Ok(state.unread.get(&peer_id).copied().unwrap_or(0))
    }

    async fn mark_as_read(&self, user_id: UserId, peer_id: UserId) -> Result<()> {
        let mut state = self.record(format!("PUT messages/read/{user_id}/{peer_id}"));
        state.unread.insert(peer_id, 0);
        Ok(())
    }

    async fn heartbeat(&self, user_id: UserId) -> Result<()> {
        self.record(format!("POST heartbeat/{user_id}"));
        Ok(())
    }

    async fn logout(&self, user_id: UserId) -> Result<()> {
        let state = self.record(format!("POST logout/{user_id}"));
        if state.logout_fails {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

pub fn alice() -> Session {
    Session {
        user_id: ALICE,
        username: "alice".into(),
    }
}

/// Starts a client for Alice and waits until the first epoch is subscribed.
pub async fn start_client(
    broker: &FakeBroker,
    backend: &FakeBackend,
) -> (Arc<ChatClient>, broadcast::Receiver<ClientEvent>) {
    let client = ChatClient::new(alice(), Arc::new(backend.clone()), Arc::new(broker.clone()));
    let mut events = client.subscribe_events();
    client.start().await.expect("start");
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::Subscribed { epoch: 1 })
    })
    .await;
    (client, events)
}

pub async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    wanted: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

/// Everything already queued on the bus, without waiting.
pub fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

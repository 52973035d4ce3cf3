use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Local;
use shared::{
    domain::UserId,
    protocol::{
        BrokerEvent, ChatMessage, TypingPayload, SEND_MESSAGE_DESTINATION,
        SEND_TYPING_DESTINATION,
    },
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

pub mod attachment;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod heartbeat;
pub mod ledger;
pub mod router;
pub mod stomp;
pub mod transport;
pub mod typing;
pub mod ws;

pub use attachment::Attachment;
pub use backend::{ChatBackend, HttpChatBackend};
pub use config::{ClientSettings, Identity, IdentityStore};
pub use conversation::{IncomingOutcome, Peer, Session};
pub use error::ClientError;
pub use transport::{BrokerConnector, ConnectionState};
pub use ws::WsStompConnector;

use crate::{
    conversation::ConversationState,
    heartbeat::{HeartbeatTask, HEARTBEAT_INTERVAL},
    ledger::fetch_unread_baseline,
    router::SubscriptionRouter,
    transport::{PublishError, TransportEvent, TransportSession, RECONNECT_BACKOFF},
    typing::{TypingDebouncer, TypingSignal, TYPING_IDLE_AFTER},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    Subscribed {
        epoch: u64,
    },
    DirectoryLoaded(Vec<Peer>),
    ActivePeerChanged(UserId),
    HistoryLoaded {
        peer_id: UserId,
        messages: Vec<ChatMessage>,
    },
    MessageReceived(ChatMessage),
    UnreadCountChanged {
        peer_id: UserId,
        count: u32,
    },
    PeerTypingChanged {
        peer_id: UserId,
        is_typing: bool,
    },
    NotificationRequested {
        from: String,
        body: String,
    },
    Failure(ClientError),
    LoggedOut,
}

/// Point-in-time copy of what the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub active_peer: Option<UserId>,
    pub messages: Vec<ChatMessage>,
    pub unread: HashMap<UserId, u32>,
    pub peer_typing: bool,
    pub connection: ConnectionState,
}

impl From<PublishError> for ClientError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::NotConnected => ClientError::NotConnected,
            PublishError::Transmission(reason) => ClientError::Publish(reason),
        }
    }
}

/// Timers the controller runs with. Tests shrink these; everything else uses
/// the defaults.
#[derive(Debug, Clone, Copy)]
pub struct ClientTimings {
    pub reconnect_backoff: Duration,
    pub typing_idle_after: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            reconnect_backoff: RECONNECT_BACKOFF,
            typing_idle_after: TYPING_IDLE_AFTER,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

#[async_trait]
pub trait ChatHandle: Send + Sync {
    async fn start(&self) -> Result<(), ClientError>;
    async fn load_directory(&self) -> Result<Vec<Peer>, ClientError>;
    async fn select_peer(&self, peer_id: UserId) -> Result<(), ClientError>;
    async fn send_text(&self, content: &str) -> Result<(), ClientError>;
    async fn send_attachment(&self, attachment: Attachment) -> Result<(), ClientError>;
    async fn note_input_activity(&self);
    async fn logout(&self);
    async fn snapshot(&self) -> ConversationSnapshot;
    async fn peers(&self) -> Vec<Peer>;
    async fn presence_label(&self, peer_id: UserId) -> Option<String>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Top-level controller: owns the conversation state and wires the transport,
/// router, typing debouncer, attachment pipeline and heartbeat together.
pub struct ChatClient {
    session: Session,
    timings: ClientTimings,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<TransportSession>,
    state: Mutex<ConversationState>,
    typing: Mutex<TypingDebouncer>,
    typing_timer: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<HeartbeatTask>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    transport_events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(
        session: Session,
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Arc<Self> {
        Self::new_with_timings(session, backend, connector, ClientTimings::default())
    }

    pub fn new_with_timings(
        session: Session,
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn BrokerConnector>,
        timings: ClientTimings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let (transport, transport_events) =
            TransportSession::new(connector, timings.reconnect_backoff);
        Arc::new(Self {
            state: Mutex::new(ConversationState::new(session.clone())),
            session,
            timings,
            backend,
            transport,
            typing: Mutex::new(TypingDebouncer::new(timings.typing_idle_after)),
            typing_timer: Mutex::new(None),
            heartbeat: Mutex::new(None),
            event_loop: Mutex::new(None),
            transport_events: Mutex::new(Some(transport_events)),
            events,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.state().await
    }

    /// Connects, starts the heartbeat and loads the directory. The directory
    /// failing does not stop the session.
    pub async fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        let Some(transport_events) = self.transport_events.lock().await.take() else {
            debug!("client: already started");
            return Ok(());
        };
        info!(
            user_id = self.session.user_id.0,
            username = %self.session.username,
            "client: starting session"
        );

        let client = Arc::clone(self);
        let event_loop = tokio::spawn(async move {
            client.run_event_loop(transport_events).await;
        });
        *self.event_loop.lock().await = Some(event_loop);

        self.transport.start().await;
        *self.heartbeat.lock().await = Some(HeartbeatTask::start(
            self.session.user_id,
            Arc::clone(&self.backend),
            Arc::clone(&self.transport),
            self.timings.heartbeat_interval,
        ));

        if let Err(err) = self.load_directory().await {
            warn!(error = %err, "client: starting with an empty directory");
        }
        Ok(())
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut router = SubscriptionRouter::new();
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::StateChanged(state) => {
                    if state == ConnectionState::Disconnected {
                        router.on_disconnected();
                    }
                    self.emit(ClientEvent::ConnectionStateChanged(state));
                }
                TransportEvent::Established { epoch } => {
                    let Some(handle) = self.transport.handle_for_epoch(epoch).await else {
                        debug!(epoch, "client: connection gone before subscribing");
                        continue;
                    };
                    match router.on_connected(epoch, handle.as_ref()).await {
                        Ok(true) => self.emit(ClientEvent::Subscribed { epoch }),
                        Ok(false) => {}
                        Err(err) => {
                            warn!(epoch, error = %err, "client: subscribe failed, reconnecting");
                            self.transport.force_reconnect().await;
                        }
                    }
                }
                TransportEvent::Frame { epoch, frame } => {
                    if let Some(event) = router.route(epoch, &frame) {
                        self.handle_broker_event(event).await;
                    }
                }
            }
        }
        debug!("client: event loop stopped");
    }

    async fn handle_broker_event(self: &Arc<Self>, event: BrokerEvent) {
        match event {
            BrokerEvent::Message(message) => {
                let outcome = self.state.lock().await.apply_incoming(message.clone());
                match outcome {
                    IncomingOutcome::Rendered => {
                        let from_peer = message.sender_id != self.session.user_id;
                        self.emit(ClientEvent::MessageReceived(message.clone()));
                        if from_peer {
                            self.spawn_notification(message);
                        }
                    }
                    IncomingOutcome::UnreadIncremented { peer_id, count } => {
                        debug!(peer_id = peer_id.0, count, "client: unread incremented");
                        self.emit(ClientEvent::UnreadCountChanged { peer_id, count });
                    }
                    IncomingOutcome::Ignored => {
                        debug!(
                            sender_id = message.sender_id.0,
                            receiver_id = message.receiver_id.0,
                            "client: ignoring message for another conversation"
                        );
                    }
                }
            }
            BrokerEvent::Typing(payload) => {
                let shown = self
                    .state
                    .lock()
                    .await
                    .apply_typing(payload, Instant::now());
                if let Some(is_typing) = shown {
                    self.emit(ClientEvent::PeerTypingChanged {
                        peer_id: payload.sender_id,
                        is_typing,
                    });
                }
            }
        }
    }

    fn spawn_notification(self: &Arc<Self>, message: ChatMessage) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let known = client.state.lock().await.username_of(message.sender_id);
            let from = match known {
                Some(username) => username,
                None => match client.backend.fetch_user(message.sender_id).await {
                    Ok(user) => user.username,
                    Err(err) => {
                        warn!(
                            sender_id = message.sender_id.0,
                            error = %err,
                            "client: sender lookup failed"
                        );
                        return;
                    }
                },
            };
            client.emit(ClientEvent::NotificationRequested {
                from,
                body: message.preview().to_string(),
            });
        });
    }

    /// Lists users, drops the local one and fetches unread baselines.
    pub async fn load_directory(&self) -> Result<Vec<Peer>, ClientError> {
        let users = match self.backend.list_users().await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, "client: user directory unavailable");
                self.state.lock().await.set_directory(Vec::new());
                let err = ClientError::DirectoryUnavailable(err.to_string());
                self.emit(ClientEvent::Failure(err.clone()));
                return Err(err);
            }
        };

        let peers = {
            let mut state = self.state.lock().await;
            state.set_directory(users.into_iter().map(Peer::from).collect());
            state.peers().to_vec()
        };
        info!(peers = peers.len(), "client: directory loaded");
        self.emit(ClientEvent::DirectoryLoaded(peers.clone()));

        let peer_ids: Vec<UserId> = peers.iter().map(|peer| peer.id).collect();
        let baseline =
            fetch_unread_baseline(self.backend.as_ref(), self.session.user_id, &peer_ids).await;
        let applied: Vec<(UserId, u32)> = {
            let mut state = self.state.lock().await;
            baseline
                .into_iter()
                .map(|(peer_id, count)| (peer_id, state.apply_unread_baseline(peer_id, count)))
                .collect()
        };
        for (peer_id, count) in applied {
            self.emit(ClientEvent::UnreadCountChanged { peer_id, count });
        }
        Ok(peers)
    }

    /// Switches the active conversation: mark-as-read first, then the unread
    /// reset, then the history reload.
    pub async fn select_peer(&self, peer_id: UserId) -> Result<(), ClientError> {
        let me = self.session.user_id;
        self.state.lock().await.activate_peer(peer_id);
        self.reset_outbound_typing().await;
        info!(peer_id = peer_id.0, "client: peer selected");
        self.emit(ClientEvent::ActivePeerChanged(peer_id));
        self.emit(ClientEvent::PeerTypingChanged {
            peer_id,
            is_typing: false,
        });

        if let Err(err) = self.backend.mark_as_read(me, peer_id).await {
            warn!(peer_id = peer_id.0, error = %err, "client: mark-as-read failed");
        }
        let cleared = self.state.lock().await.reset_unread(peer_id);
        debug!(peer_id = peer_id.0, cleared, "client: unread reset");
        self.emit(ClientEvent::UnreadCountChanged { peer_id, count: 0 });

        match self.backend.fetch_history(me, peer_id).await {
            Ok(messages) => {
                let rendered = self.state.lock().await.replace_history(peer_id, messages);
                match rendered {
                    Some(messages) => {
                        self.emit(ClientEvent::HistoryLoaded { peer_id, messages });
                    }
                    None => debug!(peer_id = peer_id.0, "client: dropping superseded history"),
                }
                Ok(())
            }
            Err(err) => {
                warn!(peer_id = peer_id.0, error = %err, "client: history unavailable");
                let err = ClientError::HistoryUnavailable(err.to_string());
                self.emit(ClientEvent::Failure(err.clone()));
                Err(err)
            }
        }
    }

    /// Publishes a text message. Nothing is rendered until the broker echoes it.
    pub async fn send_text(&self, content: &str) -> Result<(), ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let active_peer = self.state.lock().await.active_peer();
        let peer_id = active_peer.ok_or(ClientError::NoPeerSelected)?;
        if !self.transport.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let message = ChatMessage::text(self.session.user_id, peer_id, content);
        let body = serde_json::to_string(&message)
            .map_err(|err| ClientError::Encode(err.to_string()))?;
        self.transport.publish(SEND_MESSAGE_DESTINATION, &body).await?;
        debug!(peer_id = peer_id.0, "client: message published");

        self.cancel_typing_timer().await;
        let mut typing = self.typing.lock().await;
        if let Some(signal) = typing.on_message_sent(active_peer) {
            self.publish_typing(signal).await;
        }
        Ok(())
    }

    /// Validates, encodes and transmits an image to the active peer.
    pub async fn send_attachment(&self, attachment: Attachment) -> Result<(), ClientError> {
        let active_peer = self.state.lock().await.active_peer();
        let peer_id = attachment::validate(active_peer, &attachment).inspect_err(|err| {
            warn!(filename = %attachment.filename, error = %err, "client: attachment rejected");
        })?;

        let data_url = attachment::encode_data_url(attachment).await?;
        let message = ChatMessage::image(self.session.user_id, peer_id, data_url);
        let body = serde_json::to_string(&message)
            .map_err(|err| ClientError::Encode(err.to_string()))?;
        attachment::transmit(&self.transport, &body).await?;
        info!(peer_id = peer_id.0, "client: image sent");
        Ok(())
    }

    /// Feeds one keystroke into the typing debouncer.
    pub async fn note_input_activity(self: &Arc<Self>) {
        let active_peer = self.state.lock().await.active_peer();
        let mut typing = self.typing.lock().await;
        let Some(signal) = typing.on_input(active_peer, Instant::now()) else {
            return;
        };
        self.publish_typing(signal).await;
        drop(typing);

        let client = Arc::clone(self);
        let timer = tokio::spawn(async move { client.run_typing_timer().await });
        if let Some(previous) = self.typing_timer.lock().await.replace(timer) {
            previous.abort();
        }
    }

    async fn run_typing_timer(&self) {
        loop {
            let Some(deadline) = self.typing.lock().await.deadline() else {
                return;
            };
            tokio::time::sleep_until(deadline).await;
            let mut typing = self.typing.lock().await;
            if let Some(signal) = typing.poll_idle(Instant::now()) {
                self.publish_typing(signal).await;
                return;
            }
        }
    }

    async fn cancel_typing_timer(&self) {
        if let Some(timer) = self.typing_timer.lock().await.take() {
            timer.abort();
        }
    }

    async fn reset_outbound_typing(&self) {
        self.cancel_typing_timer().await;
        let mut typing = self.typing.lock().await;
        if let Some(signal) = typing.reset() {
            self.publish_typing(signal).await;
        }
    }

    async fn publish_typing(&self, signal: TypingSignal) {
        let payload = TypingPayload {
            sender_id: self.session.user_id,
            receiver_id: signal.receiver_id,
            is_typing: signal.is_typing,
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "client: failed to encode typing signal");
                return;
            }
        };
        if self
            .transport
            .publish(SEND_TYPING_DESTINATION, &body)
            .await
            .is_ok()
        {
            debug!(
                receiver_id = signal.receiver_id.0,
                is_typing = signal.is_typing,
                "client: typing signal published"
            );
        }
    }

    /// Tears the session down. Local state is cleared even when the logout
    /// call fails.
    pub async fn logout(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.stop();
        }
        self.cancel_typing_timer().await;
        self.typing.lock().await.reset();

        if let Err(err) = self.backend.logout(self.session.user_id).await {
            warn!(error = %err, "client: logout call failed, clearing session anyway");
        }
        self.transport.shutdown().await;
        self.state.lock().await.clear();
        if let Some(event_loop) = self.event_loop.lock().await.take() {
            event_loop.abort();
        }
        info!(user_id = self.session.user_id.0, "client: logged out");
        self.emit(ClientEvent::LoggedOut);
    }

    pub async fn snapshot(&self) -> ConversationSnapshot {
        let connection = self.transport.state().await;
        let state = self.state.lock().await;
        ConversationSnapshot {
            active_peer: state.active_peer(),
            messages: state.rendered().to_vec(),
            unread: state.unread().counts().clone(),
            peer_typing: state.active_peer_typing(),
            connection,
        }
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.state.lock().await.peers().to_vec()
    }

    /// Relative presence text for `peer_id`, computed against the current clock.
    pub async fn presence_label(&self, peer_id: UserId) -> Option<String> {
        let state = self.state.lock().await;
        state
            .peer(peer_id)
            .map(|peer| ledger::presence_label(peer, Local::now().naive_local()))
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ChatHandle for Arc<ChatClient> {
    async fn start(&self) -> Result<(), ClientError> {
        ChatClient::start(self).await
    }

    async fn load_directory(&self) -> Result<Vec<Peer>, ClientError> {
        ChatClient::load_directory(self).await
    }

    async fn select_peer(&self, peer_id: UserId) -> Result<(), ClientError> {
        ChatClient::select_peer(self, peer_id).await
    }

    async fn send_text(&self, content: &str) -> Result<(), ClientError> {
        ChatClient::send_text(self, content).await
    }

    async fn send_attachment(&self, attachment: Attachment) -> Result<(), ClientError> {
        ChatClient::send_attachment(self, attachment).await
    }

    async fn note_input_activity(&self) {
        ChatClient::note_input_activity(self).await
    }

    async fn logout(&self) {
        ChatClient::logout(self).await
    }

    async fn snapshot(&self) -> ConversationSnapshot {
        ChatClient::snapshot(self).await
    }

    async fn peers(&self) -> Vec<Peer> {
        ChatClient::peers(self).await
    }

    async fn presence_label(&self, peer_id: UserId) -> Option<String> {
        ChatClient::presence_label(self, peer_id).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

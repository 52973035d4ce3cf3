//! Conversation state for the local user: directory, active peer, rendered
//! messages, unread counters and the remote typing indicator.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use shared::{
    domain::{PresenceStatus, UserId},
    protocol::{ChatMessage, TypingPayload, UserSummary},
};
use tokio::time::Instant;

use crate::ledger::UnreadLedger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: UserId,
    pub username: String,
    pub status: PresenceStatus,
    pub last_seen_at: Option<NaiveDateTime>,
}

impl From<UserSummary> for Peer {
    fn from(user: UserSummary) -> Self {
        Self {
            id: user.id,
            username: user.username,
            status: user.status.unwrap_or(PresenceStatus::Offline),
            last_seen_at: user.last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingState {
    pub is_typing: bool,
    pub last_activity_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingOutcome {
    Rendered,
    UnreadIncremented { peer_id: UserId, count: u32 },
    Ignored,
}

#[derive(Debug)]
pub struct ConversationState {
    session: Session,
    active_peer: Option<UserId>,
    rendered: Vec<ChatMessage>,
    peers: Vec<Peer>,
    unread: UnreadLedger,
    typing: HashMap<UserId, TypingState>,
}

impl ConversationState {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            active_peer: None,
            rendered: Vec::new(),
            peers: Vec::new(),
            unread: UnreadLedger::default(),
            typing: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active_peer
    }

    pub fn rendered(&self) -> &[ChatMessage] {
        &self.rendered
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, peer_id: UserId) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.id == peer_id)
    }

    pub fn username_of(&self, user_id: UserId) -> Option<String> {
        self.peer(user_id).map(|peer| peer.username.clone())
    }

    pub fn unread(&self) -> &UnreadLedger {
        &self.unread
    }

    pub fn set_directory(&mut self, peers: Vec<Peer>) {
        let me = self.session.user_id;
        self.peers = peers.into_iter().filter(|peer| peer.id != me).collect();
    }

    /// The active peer always reads 0, whatever the store says.
    pub fn apply_unread_baseline(&mut self, peer_id: UserId, count: u32) -> u32 {
        let count = if self.active_peer == Some(peer_id) { 0 } else { count };
        self.unread.set_baseline(peer_id, count);
        count
    }

    /// Makes `peer_id` the active conversation. The rendered list is emptied
    /// until its history arrives and the peer's typing indicator is cleared.
    pub fn activate_peer(&mut self, peer_id: UserId) {
        self.active_peer = Some(peer_id);
        self.rendered.clear();
        self.typing.remove(&peer_id);
    }

    pub fn reset_unread(&mut self, peer_id: UserId) -> u32 {
        self.unread.reset(peer_id)
    }

    /// Installs fetched history when `peer_id` is still active. Returns the
    /// rendered list, or `None` when a newer selection superseded this one.
    pub fn replace_history(
        &mut self,
        peer_id: UserId,
        messages: Vec<ChatMessage>,
    ) -> Option<Vec<ChatMessage>> {
        if self.active_peer != Some(peer_id) {
            return None;
        }
        let me = self.session.user_id;
        self.rendered = messages
            .into_iter()
            .filter(|message| message.is_between(me, peer_id))
            .collect();
        Some(self.rendered.clone())
    }

    /// Appends in arrival order when the message belongs to the active
    /// conversation; otherwise counts it as unread if it was sent to us.
    pub fn apply_incoming(&mut self, message: ChatMessage) -> IncomingOutcome {
        let me = self.session.user_id;
        if let Some(peer_id) = self.active_peer {
            if message.is_between(me, peer_id) {
                self.rendered.push(message);
                return IncomingOutcome::Rendered;
            }
        }

        if message.receiver_id == me && message.sender_id != me {
            let count = self.unread.increment(message.sender_id);
            return IncomingOutcome::UnreadIncremented {
                peer_id: message.sender_id,
                count,
            };
        }

        IncomingOutcome::Ignored
    }

    /// Records a remote typing signal addressed to us. Returns the indicator
    /// value when it concerns the active peer.
    pub fn apply_typing(&mut self, payload: TypingPayload, now: Instant) -> Option<bool> {
        let me = self.session.user_id;
        if payload.receiver_id != me || payload.sender_id == me {
            return None;
        }
        self.typing.insert(
            payload.sender_id,
            TypingState {
                is_typing: payload.is_typing,
                last_activity_at: now,
            },
        );
        (self.active_peer == Some(payload.sender_id)).then_some(payload.is_typing)
    }

    pub fn active_peer_typing(&self) -> bool {
        self.active_peer
            .and_then(|peer_id| self.typing.get(&peer_id))
            .is_some_and(|state| state.is_typing)
    }

    /// Forgets everything tied to the session, keeping only the identity.
    pub fn clear(&mut self) {
        self.active_peer = None;
        self.rendered.clear();
        self.peers.clear();
        self.unread.clear();
        self.typing.clear();
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;

//! Outbound typing-indicator debouncing, kept free of timers and I/O.

use std::time::Duration;

use shared::domain::UserId;
use tokio::time::Instant;

pub const TYPING_IDLE_AFTER: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingSignal {
    pub receiver_id: UserId,
    pub is_typing: bool,
}

impl TypingSignal {
    fn started(receiver_id: UserId) -> Self {
        Self {
            receiver_id,
            is_typing: true,
        }
    }

    fn stopped(receiver_id: UserId) -> Self {
        Self {
            receiver_id,
            is_typing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Typing {
        receiver_id: UserId,
        last_activity_at: Instant,
    },
}

/// Turns raw keystrokes into started/stopped signals. The caller owns the
/// clock and the timer: it feeds `now` in and sleeps until [`deadline`].
///
/// [`deadline`]: TypingDebouncer::deadline
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    phase: Phase,
    idle_after: Duration,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_IDLE_AFTER)
    }
}

impl TypingDebouncer {
    pub fn new(idle_after: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            idle_after,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_typing(&self) -> bool {
        matches!(self.phase, Phase::Typing { .. })
    }

    /// Emits `started` on the first keystroke only; later keystrokes just push
    /// the deadline back. Nothing happens without an active peer.
    pub fn on_input(&mut self, active_peer: Option<UserId>, now: Instant) -> Option<TypingSignal> {
        let peer_id = active_peer?;
        let signal = match self.phase {
            Phase::Typing { receiver_id, .. } if receiver_id == peer_id => None,
            _ => Some(TypingSignal::started(peer_id)),
        };
        self.phase = Phase::Typing {
            receiver_id: peer_id,
            last_activity_at: now,
        };
        signal
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Typing {
                last_activity_at, ..
            } => Some(last_activity_at + self.idle_after),
            Phase::Idle => None,
        }
    }

    /// Emits `stopped` once the idle window has elapsed since the last keystroke.
    pub fn poll_idle(&mut self, now: Instant) -> Option<TypingSignal> {
        let Phase::Typing {
            receiver_id,
            last_activity_at,
        } = self.phase
        else {
            return None;
        };
        if now < last_activity_at + self.idle_after {
            return None;
        }
        self.phase = Phase::Idle;
        Some(TypingSignal::stopped(receiver_id))
    }

    /// Sending a message always announces `stopped`, timer or not.
    pub fn on_message_sent(&mut self, active_peer: Option<UserId>) -> Option<TypingSignal> {
        let receiver_id = match self.phase {
            Phase::Typing { receiver_id, .. } => Some(receiver_id),
            Phase::Idle => active_peer,
        }?;
        self.phase = Phase::Idle;
        Some(TypingSignal::stopped(receiver_id))
    }

    /// Drops back to idle, announcing `stopped` only if typing was in progress.
    pub fn reset(&mut self) -> Option<TypingSignal> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Typing { receiver_id, .. } => Some(TypingSignal::stopped(receiver_id)),
            Phase::Idle => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;

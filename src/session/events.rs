//! Session-event bus.
//!
//! The Session Manager publishes; the routing layer and anything else that
//! cares about sign-in state subscribes. Replaces ad hoc redirects scattered
//! across call sites.

use tokio::sync::broadcast;

use super::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(Identity),
    /// Explicit logout.
    LoggedOut,
    /// The server rejected the credential (401).
    Expired,
}

#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        tracing::debug!(?event, subscribers = self.tx.receiver_count(), "Session event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new(32)
    }
}

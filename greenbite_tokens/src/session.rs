//! Session lifecycle notifications

use crate::CredentialStore;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// Why a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The user logged out
    Logout,
    /// The refresh token could not be exchanged for a new access token
    RefreshFailed,
}

/// A change in the application's session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user signed in and credentials were stored
    Started,
    /// The stored credentials were cleared and the user must sign in again
    Ended {
        /// Why the session ended
        reason: EndReason,
    },
}

/// Ends the current session by clearing the credential store
///
/// Ending a session that has already ended is a no-op, so observers are
/// notified once per session no matter how many times this is invoked.
#[derive(Clone, Debug)]
pub struct SessionTerminator {
    store: CredentialStore,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTerminator {
    /// Constructs a terminator for the given store
    pub fn new(store: CredentialStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    /// The store this terminator clears
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Subscribes to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Announces that a new session has started
    pub fn started(&self) {
        tracing::debug!("session started");
        // No subscribers is fine
        let _ = self.events.send(SessionEvent::Started);
    }

    /// Clears stored credentials and notifies observers that the session ended
    ///
    /// Returns `true` if this call ended an active session.
    pub fn terminate(&self, reason: EndReason) -> bool {
        if !self.store.clear() {
            tracing::trace!(?reason, "session already ended");
            return false;
        }

        tracing::info!(?reason, "session ended");
        let _ = self.events.send(SessionEvent::Ended { reason });
        true
    }
}

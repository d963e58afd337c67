//! Session-level event broadcasting.
//!
//! The app-wide "your login expired" signal is a typed event on a broadcast
//! channel rather than a stringly-named notification: there is exactly one
//! producer (the executor, once refresh has definitively failed) and any
//! number of subscribers (screens that must drop to the login flow).

use tokio::sync::broadcast;

/// Process-wide session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials are gone for good: refresh failed or was impossible.
    /// Subscribers should treat the session as logged out.
    Expired,
}

/// Broadcasts [`SessionEvent`]s to all subscribers.
///
/// Cloning shares the underlying channel. Events sent while no subscriber is
/// listening are dropped, which is fine for a signal that only matters to a
/// live UI.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Creates a broadcaster with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning the number of subscribers reached.
    pub fn send(&self, event: SessionEvent) -> usize {
        // send() errs only when there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(16)
    }
}

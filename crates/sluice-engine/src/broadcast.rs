//! Live-update fan-out.
//!
//! State changes publish a `{event_id, state}` hint; the console uses
//! it only as a signal to refresh. No ordering, delivery, or
//! backpressure guarantees.

use tokio::sync::broadcast;

use sluice_core::EventState;

const CHANNEL_CAPACITY: usize = 256;

/// One state-change hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventUpdate {
    /// The event that changed.
    pub event_id: i64,
    /// Its new state.
    pub state: EventState,
}

/// Cloneable publisher/subscriber handle over one broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EventUpdate>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publishes a state-change hint. Dropped silently when no
    /// subscriber is connected.
    pub fn publish(&self, event_id: i64, state: EventState) {
        let _ = self.tx.send(EventUpdate { event_id, state });
    }

    /// Subscribes to state-change hints.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventUpdate> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_updates() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(42, EventState::Processed);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.event_id, 42);
        assert_eq!(update.state, EventState::Processed);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(1, EventState::Pending);
    }
}

use tokio::sync::mpsc;

/// Events emitted by a [`CartSession`](crate::CartSession).
///
/// These replace UI side effects baked into the data layer: a consumer that
/// shows a slide-over cart listens for [`Event::CartPanelRequested`] instead
/// of the session toggling visibility itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The cart snapshot was replaced by a server response
    CartUpdated { items_count: u64 },
    /// An item was added; consumers usually open the side cart
    CartPanelRequested,
    /// The server issued a cart token that is now persisted
    TokenIssued,
    /// The stored cart token was rejected and discarded
    TokenDiscarded { status: u16 },
    /// Another session signalled an update and this one refetched
    SyncRefreshed,
    /// A non-fatal warning
    Warning { message: String },
    /// An operation failed
    Error { message: String },
}

/// Sender for cart events.
///
/// Wraps a `tokio::sync::mpsc::Sender<Event>`. If constructed with `noop()`,
/// all sends are silently dropped.
#[derive(Clone, Default)]
pub struct EventSender {
    inner: Option<mpsc::Sender<Event>>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self {
            inner: Some(sender),
        }
    }

    /// Create a sender paired with a fresh receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Create a no-op sender that silently drops all events.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Emit an event (best-effort, drops on backpressure).
    pub fn emit(&self, event: Event) {
        if let Some(ref sender) = self.inner {
            let _ = sender.try_send(event);
        }
    }

    /// Returns true if this sender is connected (not noop).
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_to_receiver() {
        let (events, mut rx) = EventSender::channel(4);
        events.emit(Event::CartPanelRequested);
        assert_eq!(rx.recv().await, Some(Event::CartPanelRequested));
    }

    #[test]
    fn test_noop_sender_is_inactive() {
        let events = EventSender::noop();
        assert!(!events.is_active());
        events.emit(Event::SyncRefreshed);
    }

    #[tokio::test]
    async fn test_emit_drops_when_full() {
        let (events, mut rx) = EventSender::channel(1);
        events.emit(Event::TokenIssued);
        events.emit(Event::SyncRefreshed);
        assert_eq!(rx.recv().await, Some(Event::TokenIssued));
        drop(events);
        assert_eq!(rx.recv().await, None);
    }
}

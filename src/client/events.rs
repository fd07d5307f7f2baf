//! Client events and their subscribers.
//!
//! Handlers run on the client's receive task in registration order. A
//! handler that panics is logged and skipped; the remaining handlers still
//! see the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::status::EngineStatus;

/// Something that happened on a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection is up and the receive loop is running.
    Connected,
    /// The connection ended. Raised once per connection.
    Disconnected,
    /// An unstructured text message from the server.
    Message(String),
    /// The server published a new engine status.
    StatusChanged(EngineStatus),
}

/// Callback invoked for every event.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered list of event handlers.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, EventHandler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, EventHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a handler.
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Deliver `event` to every handler.
    ///
    /// The handler list is copied first, so handlers may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, event: &ClientEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(?event, "event handler panicked");
            }
        }
    }

    /// Number of subscribed handlers.
    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

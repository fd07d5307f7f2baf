//! Session registry: the server's map from endpoint to outbound path.
//!
//! The accept path inserts sessions, session tasks remove themselves, and
//! the engine thread sends replies and broadcasts. All three meet at one
//! mutex; sends only enqueue on a session's writer task, so the lock is
//! never held across I/O.
//!
//! Replies are always queued so every request is answered; they are lost
//! only when the session's writer has stopped. Broadcasts and text messages
//! are best-effort: a saturated or closed writer drops the frame for that
//! session and does not affect the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{fact_frame, Frame, Reply, SENTINEL_ID};
use crate::status::EngineStatus;
use crate::writer::{OutboundFrame, WriterHandle};

/// Fact name used for unstructured messages when none is configured.
pub const DEFAULT_FACT_NAME: &str = "network";

struct SessionEntry {
    writer: WriterHandle,
    fact_name: Option<String>,
}

struct Inner {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    default_fact_name: String,
}

/// Shared, synchronized registry of connected sessions.
///
/// Cheap to clone; all clones see the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry using `default_fact_name` for sessions
    /// without an override.
    pub fn new(default_fact_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                default_fact_name: default_fact_name.into(),
            }),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        // Entries stay consistent even if a holder panicked.
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the outbound path of a new session.
    pub fn register(&self, endpoint: &str, writer: WriterHandle) {
        let previous = self.sessions().insert(
            endpoint.to_string(),
            SessionEntry {
                writer,
                fact_name: None,
            },
        );
        if previous.is_some() {
            warn!(%endpoint, "replaced stale session");
        }
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn unregister(&self, endpoint: &str) -> bool {
        self.sessions().remove(endpoint).is_some()
    }

    /// Whether `endpoint` is connected.
    pub fn contains(&self, endpoint: &str) -> bool {
        self.sessions().contains_key(endpoint)
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Check if no session is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Endpoints of all connected sessions, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<_> = self.sessions().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Remove every session, closing their outbound paths.
    pub fn clear(&self) {
        self.sessions().clear();
    }

    /// Fact name for unstructured messages from `endpoint`.
    pub fn fact_name(&self, endpoint: &str) -> String {
        self.sessions()
            .get(endpoint)
            .and_then(|entry| entry.fact_name.clone())
            .unwrap_or_else(|| self.inner.default_fact_name.clone())
    }

    /// Override (or with `None`, restore) the fact name of one session.
    ///
    /// Returns `false` if the session is not connected.
    pub fn set_fact_name(&self, endpoint: &str, name: Option<String>) -> bool {
        match self.sessions().get_mut(endpoint) {
            Some(entry) => {
                entry.fact_name = name;
                true
            }
            None => false,
        }
    }

    /// Unicast a frame, dropping it if the session is saturated. Returns
    /// whether it was queued.
    pub fn send_to(&self, endpoint: &str, frame: &Frame) -> bool {
        self.unicast(endpoint, frame, Delivery::BestEffort)
    }

    fn unicast(&self, endpoint: &str, frame: &Frame, delivery: Delivery) -> bool {
        let outbound = match OutboundFrame::from_frame(frame) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!(%endpoint, error = %e, "cannot encode frame");
                return false;
            }
        };

        let sessions = self.sessions();
        let Some(entry) = sessions.get(endpoint) else {
            debug!(%endpoint, "client disconnected or does not exist");
            return false;
        };
        match delivery {
            Delivery::BestEffort => deliver(endpoint, entry, outbound),
            Delivery::Always => match entry.writer.push(outbound) {
                Ok(()) => true,
                Err(e) => {
                    warn!(%endpoint, error = %e, "dropping reply");
                    false
                }
            },
        }
    }

    /// Send a frame to every session. Returns how many queued it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let outbound = match OutboundFrame::from_frame(frame) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!(error = %e, "cannot encode broadcast frame");
                return 0;
            }
        };

        self.sessions()
            .iter()
            .filter(|(endpoint, entry)| deliver(endpoint, entry, outbound.clone()))
            .count()
    }

    /// Send the reply to a request back to its session.
    ///
    /// Queued even when the session is saturated.
    pub fn send_reply(&self, endpoint: &str, reply: &Reply) -> bool {
        self.unicast(endpoint, &reply.to_frame(), Delivery::Always)
    }

    /// Send an unstructured text message to one session.
    pub fn send_text(&self, endpoint: &str, text: &str) -> bool {
        match text_frame(text) {
            Ok(frame) => self.send_to(endpoint, &frame),
            Err(e) => {
                warn!(%endpoint, error = %e, "cannot send text");
                false
            }
        }
    }

    /// Send an unstructured text message to every session.
    pub fn broadcast_text(&self, text: &str) -> usize {
        match text_frame(text) {
            Ok(frame) => self.broadcast(&frame),
            Err(e) => {
                warn!(error = %e, "cannot broadcast text");
                0
            }
        }
    }

    /// Send the engine status to one session.
    pub fn send_status(&self, endpoint: &str, status: &EngineStatus) -> bool {
        self.send_reply(endpoint, &status_reply(status))
    }

    /// Publish the engine status to every session.
    pub fn publish_status(&self, status: &EngineStatus) -> usize {
        debug!(%status, "publishing status");
        self.broadcast(&status_reply(status).to_frame())
    }
}

#[derive(Clone, Copy)]
enum Delivery {
    /// Drop the frame when the writer is saturated.
    BestEffort,
    /// Queue regardless of backpressure.
    Always,
}

fn deliver(endpoint: &str, entry: &SessionEntry, frame: OutboundFrame) -> bool {
    match entry.writer.try_send(frame) {
        Ok(()) => true,
        Err(e) => {
            warn!(%endpoint, error = %e, "dropping frame");
            false
        }
    }
}

fn status_reply(status: &EngineStatus) -> Reply {
    Reply::new(SENTINEL_ID, true, status.to_string())
}

/// Unstructured messages are newline-terminated on the wire.
fn text_frame(text: &str) -> Result<Frame> {
    if text.ends_with('\n') {
        fact_frame(text)
    } else {
        fact_frame(&format!("{text}\n"))
    }
}

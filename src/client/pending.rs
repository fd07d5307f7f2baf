//! Pending-request table.
//!
//! Each outstanding call owns a single-slot channel. The receive path
//! completes it by id; an abort empties the table, dropping every sender so
//! each waiter wakes with "no reply". Once aborted, the table refuses new
//! registrations, so a late caller cannot wait on a dead connection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};
use crate::protocol::{Reply, SENTINEL_ID};

#[derive(Default)]
struct Table {
    closed: bool,
    waiters: HashMap<u32, oneshot::Sender<Reply>>,
}

/// Outstanding calls of one connection, keyed by correlation id.
#[derive(Default)]
pub struct PendingTable {
    table: Mutex<Table>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` and return the receiver its reply will arrive on.
    ///
    /// Must be called before the request is written, so the reply can
    /// never arrive ahead of its entry.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` once [`abort_all`](Self::abort_all) has run.
    pub fn register(&self, id: u32) -> Result<oneshot::Receiver<Reply>> {
        debug_assert_ne!(id, SENTINEL_ID);
        let mut table = self.lock();
        if table.closed {
            return Err(BridgeError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a reply to its waiter.
    ///
    /// Returns `false` when no call is waiting on that id (unknown, already
    /// completed, abandoned, or the sentinel).
    pub fn complete(&self, reply: Reply) -> bool {
        if reply.id == SENTINEL_ID {
            return false;
        }
        let Some(tx) = self.lock().waiters.remove(&reply.id) else {
            return false;
        };
        tx.send(reply).is_ok()
    }

    /// Forget a call without completing it.
    pub fn remove(&self, id: u32) -> bool {
        self.lock().waiters.remove(&id).is_some()
    }

    /// Release every waiter with a failure and refuse further registrations.
    ///
    /// Returns how many calls were waiting.
    pub fn abort_all(&self) -> usize {
        let waiters = {
            let mut table = self.lock();
            table.closed = true;
            std::mem::take(&mut table.waiters)
        };
        waiters.len()
    }

    /// Whether [`abort_all`](Self::abort_all) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

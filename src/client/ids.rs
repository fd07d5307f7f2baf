//! Command ID allocator.
//!
//! Ids increase by one per request and wrap at the 32-bit boundary,
//! skipping `0` and the status sentinel. After 2^32 - 2 calls an id can
//! repeat; a collision with a still-pending call of the same id is an
//! accepted limitation.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::protocol::SENTINEL_ID;

/// Thread-safe source of correlation ids for one client.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    /// Allocator whose first id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose first id is `first` (or the next valid id after it).
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Take the next id. Never returns `0` or the sentinel.
    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if is_valid(id) {
                return id;
            }
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn is_valid(id: u32) -> bool {
    id != 0 && id != SENTINEL_ID
}

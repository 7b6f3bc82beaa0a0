// Copyright 2025 Cowboy AI, LLC.

//! Idempotent receiver guard
//!
//! Remembers recently seen event ids so transport redeliveries do not mutate
//! a group twice.

use std::num::NonZeroUsize;
use std::sync::Mutex as StdMutex;

use lru::LruCache;
use uuid::Uuid;

/// Bounded memory of recently seen event ids
#[derive(Debug)]
pub struct IdempotencyGuard {
    seen: StdMutex<LruCache<Uuid, ()>>,
}

impl IdempotencyGuard {
    /// Create a guard remembering up to `capacity` event ids
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: StdMutex::new(LruCache::new(capacity)),
        }
    }

    /// Record an event id, returning whether it was seen for the first time
    pub fn check_and_record(&self, id: Uuid) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(&id) {
            false
        } else {
            seen.put(id, ());
            true
        }
    }

    /// Forget an event id so a transport redelivery passes again
    ///
    /// Used when an event was recorded but never applied to a group, e.g.
    /// after a lock timeout.
    pub fn forget(&self, id: &Uuid) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.pop(id);
    }
}

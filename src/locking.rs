// Copyright 2025 Cowboy AI, LLC.

//! Per-key locking primitives
//!
//! A [`LockRegistry`] hands out mutual-exclusion handles scoped to one
//! correlation key. The [`LockTemplate`] wraps a registry with scoped
//! acquisition: the lock is released on every exit path, including errors
//! and cancellation, because the handle releases on drop.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;
use uuid::Uuid;

/// Errors that can occur while acquiring a per-key lock
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Bounded acquisition exceeded its timeout
    #[error("Lock acquisition timed out after {timeout:?} for key {key}")]
    Timeout {
        /// Key whose lock was contended
        key: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Blocking acquisition was interrupted
    #[error("Lock acquisition interrupted for key {key}")]
    Interrupted {
        /// Key whose lock was being acquired
        key: String,
    },
}

/// Ownership token for one key's lock, released on drop
pub struct LockHandle {
    _guard: Box<dyn Send>,
}

impl LockHandle {
    /// Wrap any droppable guard as a lock handle
    ///
    /// Dropping the handle drops the guard, which must release whatever the
    /// registry acquired.
    pub fn from_guard(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle").finish()
    }
}

/// Process-wide (potentially cross-instance) mutual exclusion keyed by
/// correlation key
#[async_trait]
pub trait LockRegistry: Send + Sync {
    /// Acquire the key's lock, failing with [`LockError::Timeout`] when the
    /// timeout elapses first
    async fn try_acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle, LockError>;

    /// Acquire the key's lock, blocking until granted
    ///
    /// The returned future is cancel-safe: dropping it before completion
    /// never leaks the lock.
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError>;
}

/// In-process registry over a per-key mutex map (single instance)
#[derive(Debug, Default)]
pub struct LocalLockRegistry {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LocalLockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn obtain(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl LockRegistry for LocalLockRegistry {
    async fn try_acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle, LockError> {
        let mutex = self.obtain(key);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockHandle::from_guard(guard)),
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                timeout,
            }),
        }
    }

    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let guard = self.obtain(key).lock_owned().await;
        Ok(LockHandle::from_guard(guard))
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: Instant,
}

type LeaseTable = Arc<StdMutex<HashMap<String, Lease>>>;

struct LeaseGuard {
    table: LeaseTable,
    key: String,
    owner: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // only release a lease this handle still owns; an expired lease may
        // have been claimed by another owner in the meantime
        if leases.get(&self.key).is_some_and(|lease| lease.owner == self.owner) {
            leases.remove(&self.key);
        }
    }
}

/// Lease-based registry for multi-instance deployments
///
/// Each grant records an owner id and expires after `ttl`; an expired lease
/// can be claimed by another owner, so a crashed holder cannot block its key
/// forever. Acquisition polls the lease table every `retry_interval`.
#[derive(Debug)]
pub struct LeaseLockRegistry {
    leases: LeaseTable,
    ttl: Duration,
    retry_interval: Duration,
}

impl LeaseLockRegistry {
    /// Create a registry granting leases of the given time-to-live
    pub fn new(ttl: Duration, retry_interval: Duration) -> Self {
        Self {
            leases: Arc::new(StdMutex::new(HashMap::new())),
            ttl,
            retry_interval,
        }
    }

    fn claim(&self, key: &str) -> Option<LockHandle> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match leases.get(key) {
            Some(lease) if lease.expires_at > now => None,
            _ => {
                let owner = Uuid::new_v4();
                leases.insert(
                    key.to_string(),
                    Lease {
                        owner,
                        expires_at: now + self.ttl,
                    },
                );
                trace!("Claimed lease {owner} for key {key}");
                Some(LockHandle::from_guard(LeaseGuard {
                    table: self.leases.clone(),
                    key: key.to_string(),
                    owner,
                }))
            }
        }
    }
}

#[async_trait]
impl LockRegistry for LeaseLockRegistry {
    async fn try_acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.claim(key) {
                return Ok(handle);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        loop {
            if let Some(handle) = self.claim(key) {
                return Ok(handle);
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// Executes closures under a per-key lock with guaranteed release
pub struct LockTemplate {
    registry: Arc<dyn LockRegistry>,
    timeout: Duration,
}

impl LockTemplate {
    /// Create a template over a registry with a bounded-acquisition timeout
    pub fn new(registry: Arc<dyn LockRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// The registry this template acquires locks from
    pub fn registry(&self) -> &Arc<dyn LockRegistry> {
        &self.registry
    }

    /// The configured bounded-acquisition timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` while holding the key's lock, acquired within the configured
    /// timeout
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.registry.try_acquire(key, self.timeout).await?;
        let result = f().await;
        drop(handle);
        Ok(result)
    }

    /// Run `f` while holding the key's lock, blocking for the lock until the
    /// interrupt future completes
    ///
    /// Interruption maps to [`LockError::Interrupted`], a retryable failure,
    /// never a silent drop. A lock acquired before the interrupt fires is
    /// released normally.
    pub async fn with_lock_interruptibly<T, F, Fut, I>(
        &self,
        key: &str,
        interrupt: I,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        I: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            handle = self.registry.acquire(key) => {
                let handle = handle?;
                let result = f().await;
                drop(handle);
                Ok(result)
            }
            _ = interrupt => Err(LockError::Interrupted {
                key: key.to_string(),
            }),
        }
    }
}

impl fmt::Debug for LockTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTemplate")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_local_registry_excludes_same_key() {
        let registry = Arc::new(LocalLockRegistry::new());

        let held = registry
            .try_acquire("a", Duration::from_millis(50))
            .await
            .unwrap();

        let err = registry
            .try_acquire("a", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(held);
        registry
            .try_acquire("a", Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_registry_distinct_keys_do_not_contend() {
        let registry = LocalLockRegistry::new();

        let _a = registry
            .try_acquire("a", Duration::from_millis(20))
            .await
            .unwrap();
        let _b = registry
            .try_acquire("b", Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lease_registry_excludes_until_release() {
        let registry = LeaseLockRegistry::new(Duration::from_secs(30), Duration::from_millis(5));

        let held = registry
            .try_acquire("a", Duration::from_millis(50))
            .await
            .unwrap();
        let err = registry
            .try_acquire("a", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(held);
        registry
            .try_acquire("a", Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_claimed() {
        let registry = LeaseLockRegistry::new(Duration::from_millis(60), Duration::from_millis(5));

        let stale = registry
            .try_acquire("a", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        // lease expired; another owner claims the key
        let fresh = registry
            .try_acquire("a", Duration::from_millis(100))
            .await
            .unwrap();

        // dropping the stale handle must not release the new owner's lease
        drop(stale);
        let err = registry
            .try_acquire("a", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        drop(fresh);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_success_and_error() {
        let registry = Arc::new(LocalLockRegistry::new());
        let template = LockTemplate::new(registry.clone(), Duration::from_millis(100));

        let ok: Result<u32, LockError> = template.with_lock("k", || async { 7 }).await;
        assert_eq!(ok.unwrap(), 7);

        let failed: Result<Result<(), String>, LockError> = template
            .with_lock("k", || async { Err("inner failure".to_string()) })
            .await;
        assert!(failed.unwrap().is_err());

        // lock must be free again after both paths
        registry
            .try_acquire("k", Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_with_lock_interruptibly_maps_interrupt() {
        let registry = Arc::new(LocalLockRegistry::new());
        let template = LockTemplate::new(registry.clone(), Duration::from_millis(100));

        let held = registry
            .try_acquire("k", Duration::from_millis(20))
            .await
            .unwrap();

        let interrupted = template
            .with_lock_interruptibly(
                "k",
                tokio::time::sleep(Duration::from_millis(20)),
                || async { 1 },
            )
            .await;
        assert!(matches!(interrupted, Err(LockError::Interrupted { .. })));

        drop(held);
        let granted = template
            .with_lock_interruptibly(
                "k",
                tokio::time::sleep(Duration::from_secs(5)),
                || async { 2 },
            )
            .await;
        assert_eq!(granted.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_serialized_critical_sections() {
        let registry = Arc::new(LocalLockRegistry::new());
        let template = Arc::new(LockTemplate::new(registry, Duration::from_secs(5)));
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let template = template.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                template
                    .with_lock("k", || async {
                        let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        in_section.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}

//! In-memory lock/state store.
//!
//! Implements the full lease semantics (expiry included) behind a process-
//! local mutex. Used by deterministic tests and by embedded deployments where
//! every component shares one process and the "cluster" is a single node.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{LockStateStore, StoreError};

struct Lease {
    owner: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    locks: HashMap<String, Lease>,
    states: HashMap<String, String>,
}

/// A [`LockStateStore`] backed by process memory.
pub struct MemoryLockStore {
    inner: Mutex<Inner>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock_held(inner: &Inner, lock_key: &str, now: Instant) -> bool {
        inner
            .locks
            .get(lock_key)
            .map(|lease| lease.expires_at > now)
            .unwrap_or(false)
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStateStore for MemoryLockStore {
    async fn fetch_lock(
        &self,
        lock_key: &str,
        locker_id: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("lock store mutex poisoned");
        let now = Instant::now();
        if Self::lock_held(&inner, lock_key, now) {
            return Ok(false);
        }
        inner.locks.insert(
            lock_key.to_string(),
            Lease {
                owner: locker_id.to_string(),
                expires_at: now + lease,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, lock_key: &str, locker_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("lock store mutex poisoned");
        let now = Instant::now();
        match inner.locks.get(lock_key) {
            Some(lease) if lease.expires_at > now && lease.owner == locker_id => {
                inner.locks.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_state(&self, state_key: &str) -> Result<String, StoreError> {
        let inner = self.inner.lock().expect("lock store mutex poisoned");
        Ok(inner.states.get(state_key).cloned().unwrap_or_default())
    }

    async fn set_state(&self, state_key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock store mutex poisoned");
        inner.states.insert(state_key.to_string(), value.to_string());
        Ok(())
    }

    async fn unlock_with_state(
        &self,
        lock_key: &str,
        locker_id: &str,
        state_key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("lock store mutex poisoned");
        let now = Instant::now();
        match inner.locks.get(lock_key) {
            Some(lease) if lease.expires_at > now && lease.owner == locker_id => {
                inner.states.insert(state_key.to_string(), value.to_string());
                inner.locks.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = "cast/lock";
    const STATE: &str = "cast/state";
    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn exactly_one_of_two_lockers_acquires() {
        let store = MemoryLockStore::new();
        let a = store.fetch_lock(LOCK, "proc-a", LEASE).await.unwrap();
        let b = store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap();
        assert!(a);
        assert!(!b);
    }

    #[tokio::test]
    async fn loser_acquires_after_release() {
        let store = MemoryLockStore::new();
        assert!(store.fetch_lock(LOCK, "proc-a", LEASE).await.unwrap());
        assert!(!store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());

        assert!(store.release_lock(LOCK, "proc-a").await.unwrap());
        assert!(store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn loser_acquires_after_lease_expiry() {
        let store = MemoryLockStore::new();
        assert!(store
            .fetch_lock(LOCK, "proc-a", Duration::from_millis(20))
            .await
            .unwrap());
        assert!(!store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_non_owner_is_refused() {
        let store = MemoryLockStore::new();
        assert!(store.fetch_lock(LOCK, "proc-a", LEASE).await.unwrap());
        assert!(!store.release_lock(LOCK, "proc-b").await.unwrap());
        // proc-a still holds it.
        assert!(!store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn state_defaults_to_empty_string() {
        let store = MemoryLockStore::new();
        assert_eq!(store.get_state(STATE).await.unwrap(), "");
    }

    #[tokio::test]
    async fn set_then_get_state() {
        let store = MemoryLockStore::new();
        store.set_state(STATE, "{\"height\":1}").await.unwrap();
        assert_eq!(store.get_state(STATE).await.unwrap(), "{\"height\":1}");
    }

    #[tokio::test]
    async fn unlock_with_state_persists_and_releases() {
        let store = MemoryLockStore::new();
        assert!(store.fetch_lock(LOCK, "proc-a", LEASE).await.unwrap());

        let ok = store
            .unlock_with_state(LOCK, "proc-a", STATE, "committed")
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(store.get_state(STATE).await.unwrap(), "committed");
        // Lock is free again.
        assert!(store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_with_state_by_non_owner_writes_nothing() {
        let store = MemoryLockStore::new();
        assert!(store.fetch_lock(LOCK, "proc-a", LEASE).await.unwrap());

        let ok = store
            .unlock_with_state(LOCK, "proc-b", STATE, "stale")
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(store.get_state(STATE).await.unwrap(), "");
        // proc-a still holds the lock.
        assert!(!store.fetch_lock(LOCK, "proc-b", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_with_state_after_expiry_is_refused() {
        let store = MemoryLockStore::new();
        assert!(store
            .fetch_lock(LOCK, "proc-a", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        let ok = store
            .unlock_with_state(LOCK, "proc-a", STATE, "late")
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(store.get_state(STATE).await.unwrap(), "");
    }
}

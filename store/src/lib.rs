//! The lock/state store consumed by the delivery coordinator.
//!
//! Every backend (network-backed for a multi-process cluster, local-file for
//! a single process, in-memory for tests and embedded use) implements the
//! [`LockStateStore`] trait. The rest of the workspace depends only on the
//! trait.
//!
//! The store provides two things: a lease-based mutual-exclusion lock so only
//! one process delivers a given block, and a small string-valued state slot
//! holding the last durably committed task. The one non-obvious operation is
//! [`LockStateStore::unlock_with_state`], which must be atomic — releasing
//! the lock without persisting would hand the next process stale progress,
//! and persisting without releasing would deadlock the cluster until the
//! lease expires.

pub mod error;
pub mod local;
pub mod memory;

pub use error::StoreError;
pub use local::LocalFileStore;
pub use memory::MemoryLockStore;

use async_trait::async_trait;
use std::time::Duration;

/// Lease-based mutual exclusion plus a persisted state slot.
///
/// All operations may fail or time out; callers treat every error as
/// transient and retry with backoff.
#[async_trait]
pub trait LockStateStore: Send + Sync {
    /// Non-blocking attempt to acquire the named lease for `lease` long.
    ///
    /// Returns `true` only if the lock was unheld or its previous lease had
    /// expired. Never blocks waiting for the holder.
    async fn fetch_lock(
        &self,
        lock_key: &str,
        locker_id: &str,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// Release the named lock, but only if `locker_id` still holds it.
    async fn release_lock(&self, lock_key: &str, locker_id: &str) -> Result<bool, StoreError>;

    /// Read the state slot. Returns the empty string if it was never set.
    async fn get_state(&self, state_key: &str) -> Result<String, StoreError>;

    /// Overwrite the state slot.
    async fn set_state(&self, state_key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically persist `value` into the state slot and release the lock,
    /// but only if `locker_id` still holds it.
    ///
    /// Returns `false` (with no state written) when the lease was lost —
    /// e.g. it expired and another process acquired the lock.
    async fn unlock_with_state(
        &self,
        lock_key: &str,
        locker_id: &str,
        state_key: &str,
        value: &str,
    ) -> Result<bool, StoreError>;
}

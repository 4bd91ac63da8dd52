//! Local-file lock/state store for single-process deployments.
//!
//! With only one process there is no contention to exclude, so the lock
//! operations are no-ops that always succeed; what matters is that committed
//! task state survives a restart. State lives in one file per state key under
//! a configured directory, written via a temp file and rename so a crash
//! mid-write never leaves a torn document behind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{LockStateStore, StoreError};

/// A [`LockStateStore`] for a node that owns its sinks exclusively.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Map a state key to a file path, flattening separators so keys like
    /// `cast/state` stay inside the store directory.
    fn state_path(&self, state_key: &str) -> PathBuf {
        let name: String = state_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl LockStateStore for LocalFileStore {
    async fn fetch_lock(
        &self,
        _lock_key: &str,
        _locker_id: &str,
        _lease: Duration,
    ) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn release_lock(&self, _lock_key: &str, _locker_id: &str) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn get_state(&self, state_key: &str) -> Result<String, StoreError> {
        match tokio::fs::read_to_string(self.state_path(state_key)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_state(&self, state_key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.state_path(state_key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn unlock_with_state(
        &self,
        _lock_key: &str,
        _locker_id: &str,
        state_key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        self.set_state(state_key, value).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locks_always_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();

        assert!(store
            .fetch_lock("k", "me", Duration::from_secs(1))
            .await
            .unwrap());
        // No contention in single-process mode: a second locker also wins.
        assert!(store
            .fetch_lock("k", "other", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(store.release_lock("k", "me").await.unwrap());
    }

    #[tokio::test]
    async fn missing_state_reads_as_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_state("cast/state").await.unwrap(), "");
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalFileStore::open(dir.path()).unwrap();
            store.set_state("cast/state", "{\"height\":42}").await.unwrap();
        }
        // A "restarted process" opening the same directory sees the state.
        let store = LocalFileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_state("cast/state").await.unwrap(), "{\"height\":42}");
    }

    #[tokio::test]
    async fn unlock_with_state_writes_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();

        let ok = store
            .unlock_with_state("k", "me", "cast/state", "v1")
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(store.get_state("cast/state").await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn separator_keys_stay_inside_the_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::open(dir.path()).unwrap();
        store.set_state("../escape/attempt", "x").await.unwrap();

        // Nothing was written outside the store directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with(dir.path()));
    }
}

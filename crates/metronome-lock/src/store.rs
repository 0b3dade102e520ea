use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};

use crate::error::Result;

/// Shared key-value store backing the task mutex.
///
/// Every scheduler process that may evaluate the same task must see the same
/// store. The contract is deliberately narrow; the load-bearing operation is
/// [`set_if_absent`](LockStore::set_if_absent), which must be a single atomic
/// check-and-set. A cache that can only offer separate "has" and "set" calls
/// cannot implement this trait correctly: two processes could both observe
/// "absent" and both proceed.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically store `key` with the given time-to-live when, and only
    /// when, it is currently absent or its previous lease has expired.
    /// Returns true when this call performed the set.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Non-authoritative probe: is the key currently live?
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the key. Removing an absent key is a no-op, not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local [`LockStore`] with per-key expiry.
///
/// Serves single-process deployments and tests. Distributed deployments
/// inject a store backed by something every process shares (Redis `SET NX
/// PX`, a table row with a unique key and expiry column, ...).
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, Instant>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        // The entry holds its shard lock across check and set, which is what
        // makes this one atomic operation instead of a has-then-set race.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return Ok(false);
                }
                // Previous lease ran out; reclaim in the same operation.
                occupied.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, expiry| *expiry <= now);
        Ok(self.entries.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_if_absent_wins_only_once() {
        let store = MemoryLockStore::new();
        assert!(store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_acquires_have_exactly_one_winner() {
        let store = Arc::new(MemoryLockStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("contended", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let store = MemoryLockStore::new();
        assert!(store
            .set_if_absent("k", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn remove_frees_the_key() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap();
        store.remove("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn removing_an_absent_key_is_a_noop() {
        let store = MemoryLockStore::new();
        store.remove("never-set").await.unwrap();
        store.remove("never-set").await.unwrap();
    }
}

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::store::LockStore;

/// Store key for a task's mutex.
///
/// Every process must derive the same key for the same task, so the key is a
/// pure function of the task name: `task-` followed by the hex SHA-256 digest
/// of the name. Hashing keeps arbitrary task names safe for backends with
/// restricted key alphabets.
pub fn mutex_key(task_name: &str) -> String {
    format!("task-{}", hex::encode(Sha256::digest(task_name.as_bytes())))
}

/// Lease-based mutual exclusion for one task.
///
/// Acquiring writes the task's key into the shared store with a time-to-live;
/// whoever performs the write owns the run. The lease is the crash-recovery
/// story: a holder that dies without releasing blocks rivals only until the
/// lease expires, at which point the key is reclaimable. The accepted risk is
/// the converse, a run that outlives its own lease stops being protected.
#[derive(Clone)]
pub struct TaskMutex {
    store: Arc<dyn LockStore>,
    key: String,
    lease: Duration,
}

impl TaskMutex {
    pub fn new(store: Arc<dyn LockStore>, task_name: &str, lease: Duration) -> Self {
        Self {
            store,
            key: mutex_key(task_name),
            lease,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try to take the mutex. True means this caller owns the run until it
    /// releases or the lease expires.
    pub async fn acquire(&self) -> Result<bool> {
        let acquired = self.store.set_if_absent(&self.key, self.lease).await?;
        debug!(key = %self.key, acquired, "task mutex acquire");
        Ok(acquired)
    }

    /// Drop the mutex. Unconditional and idempotent: releasing a mutex that
    /// is not held, or that another process holds, removes the key all the
    /// same. Callers only release after their own successful acquire.
    pub async fn release(&self) -> Result<()> {
        self.store.remove(&self.key).await?;
        debug!(key = %self.key, "task mutex released");
        Ok(())
    }

    /// Probe whether the mutex is currently held. The answer can go stale
    /// the instant it is produced; gate runs on [`acquire`](Self::acquire),
    /// never on this.
    pub async fn exists(&self) -> Result<bool> {
        self.store.exists(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;

    fn mutex(store: &Arc<MemoryLockStore>, name: &str, lease: Duration) -> TaskMutex {
        TaskMutex::new(Arc::clone(store) as Arc<dyn LockStore>, name, lease)
    }

    #[test]
    fn keys_are_stable_and_prefixed() {
        let key = mutex_key("emails:digest");
        assert_eq!(key, mutex_key("emails:digest"));
        assert!(key.starts_with("task-"));
        // SHA-256 digest renders as 64 hex characters.
        assert_eq!(key.len(), "task-".len() + 64);
    }

    #[test]
    fn distinct_tasks_get_distinct_keys() {
        assert_ne!(mutex_key("emails:digest"), mutex_key("emails:weekly"));
    }

    #[tokio::test]
    async fn acquire_then_release_cycles() {
        let store = Arc::new(MemoryLockStore::new());
        let mutex = mutex(&store, "cycle", Duration::from_secs(60));

        assert!(mutex.acquire().await.unwrap());
        assert!(!mutex.acquire().await.unwrap());
        mutex.release().await.unwrap();
        assert!(mutex.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn exists_tracks_the_lease() {
        let store = Arc::new(MemoryLockStore::new());
        let mutex = mutex(&store, "probe", Duration::from_secs(60));

        assert!(!mutex.exists().await.unwrap());
        mutex.acquire().await.unwrap();
        assert!(mutex.exists().await.unwrap());
        mutex.release().await.unwrap();
        assert!(!mutex.exists().await.unwrap());
    }

    #[tokio::test]
    async fn release_without_acquire_is_a_noop() {
        let store = Arc::new(MemoryLockStore::new());
        let mutex = mutex(&store, "idempotent", Duration::from_secs(60));

        mutex.release().await.unwrap();
        mutex.acquire().await.unwrap();
        mutex.release().await.unwrap();
        mutex.release().await.unwrap();
        assert!(mutex.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_lets_a_rival_in() {
        let store = Arc::new(MemoryLockStore::new());
        let first = mutex(&store, "expiry", Duration::from_millis(20));
        let rival = mutex(&store, "expiry", Duration::from_secs(60));

        assert!(first.acquire().await.unwrap());
        assert!(!rival.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rival.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn same_name_contends_on_one_key() {
        let store = Arc::new(MemoryLockStore::new());
        let here = mutex(&store, "shared", Duration::from_secs(60));
        let there = mutex(&store, "shared", Duration::from_secs(60));

        assert_eq!(here.key(), there.key());
        assert!(here.acquire().await.unwrap());
        assert!(!there.acquire().await.unwrap());
        there.release().await.unwrap();
        // Unconditional release: rival's release freed the holder's key.
        assert!(there.acquire().await.unwrap());
    }
}

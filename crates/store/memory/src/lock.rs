use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use warden_store::error::StoreError;
use warden_store::lock::{KeyGuard, KeyLock};

/// In-process [`KeyLock`] backed by a [`DashMap`] of owner tokens.
///
/// A name is held while its entry exists; the guard removes the entry when
/// released or dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyLock {
    held: Arc<DashMap<String, Uuid>>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl MemoryKeyLock {
    /// Create a new in-memory key lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently held.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[async_trait]
impl KeyLock for MemoryKeyLock {
    async fn try_acquire(&self, name: &str) -> Result<Option<Box<dyn KeyGuard>>, StoreError> {
        let owner = Uuid::new_v4();
        match self.held.entry(name.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(None),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(owner);
                Ok(Some(Box::new(MemoryKeyGuard {
                    held: Arc::clone(&self.held),
                    name: name.to_owned(),
                    owner,
                })))
            }
        }
    }

    async fn acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Box<dyn KeyGuard>, StoreError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(guard) = self.try_acquire(name).await? {
                return Ok(guard);
            }

            if Instant::now() >= deadline {
                return Err(StoreError::Timeout(timeout));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Guard for a name held via [`MemoryKeyLock`].
#[derive(Debug)]
pub struct MemoryKeyGuard {
    held: Arc<DashMap<String, Uuid>>,
    name: String,
    owner: Uuid,
}

impl Drop for MemoryKeyGuard {
    fn drop(&mut self) {
        // Only remove if we are still the owner.
        self.held.remove_if(&self.name, |_, owner| *owner == self.owner);
    }
}

#[async_trait]
impl KeyGuard for MemoryKeyGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StoreError> {
        Ok(self
            .held
            .get(&self.name)
            .is_some_and(|owner| *owner == self.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::testing::run_lock_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let lock = MemoryKeyLock::new();
        run_lock_conformance_tests(&lock)
            .await
            .expect("lock conformance tests should pass");
        assert_eq!(lock.held_count(), 0, "every guard should have been released");
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let lock = MemoryKeyLock::new();
        let guard = lock.try_acquire("target:ban").await.unwrap().unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("target:ban", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter should block while held");
        guard.release().await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        assert!(acquired.is_held().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_at_deadline() {
        let lock = MemoryKeyLock::new();
        let _guard = lock.try_acquire("target:mute").await.unwrap().unwrap();

        let started = Instant::now();
        let err = lock
            .acquire("target:mute", Duration::from_millis(50))
            .await
            .err()
            .expect("acquire should fail at deadline");
        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(50) + POLL_INTERVAL * 2);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let lock = MemoryKeyLock::new();
        let other = lock.clone();
        let _guard = lock.try_acquire("shared").await.unwrap().unwrap();
        assert!(other.try_acquire("shared").await.unwrap().is_none());
    }
}

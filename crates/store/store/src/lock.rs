use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// A held key lock. Dropping the guard releases it; [`KeyGuard::release`]
/// does the same explicitly.
#[async_trait]
pub trait KeyGuard: Send + Sync {
    /// Name the lock was taken under.
    fn name(&self) -> &str;

    /// Explicitly release the lock.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;

    /// Check if the lock is still held by this guard.
    async fn is_held(&self) -> Result<bool, StoreError>;
}

/// Mutual exclusion scoped to a single key.
///
/// Holders of different names never contend with each other.
#[async_trait]
pub trait KeyLock: Send + Sync {
    /// Try to take the lock for `name`.
    /// Returns `None` if it is already held.
    async fn try_acquire(&self, name: &str) -> Result<Option<Box<dyn KeyGuard>>, StoreError>;

    /// Take the lock for `name`, waiting up to `timeout` for it to free up.
    async fn acquire(&self, name: &str, timeout: Duration)
    -> Result<Box<dyn KeyGuard>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety of both traits.
    fn _assert_dyn_key_guard(_: &dyn KeyGuard) {}
    fn _assert_dyn_key_lock(_: &dyn KeyLock) {}
}

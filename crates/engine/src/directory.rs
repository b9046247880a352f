use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use warden_core::AccountKey;

use crate::error::EngineError;

/// Resolves display names to account keys.
///
/// Implemented by whatever knows the player base, such as a session
/// registry or a profile service.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// The account currently or last known under `name`.
    async fn resolve(&self, name: &str) -> Result<Option<AccountKey>, EngineError>;
}

/// An [`AccountDirectory`] over a fixed, case-insensitive name table.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    names: RwLock<HashMap<String, AccountKey>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` as belonging to `key`, replacing any previous owner.
    pub fn insert(&self, name: &str, key: AccountKey) {
        self.names.write().insert(name.to_lowercase(), key);
    }

    pub fn remove(&self, name: &str) -> Option<AccountKey> {
        self.names.write().remove(&name.to_lowercase())
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn resolve(&self, name: &str) -> Result<Option<AccountKey>, EngineError> {
        Ok(self.names.read().get(&name.to_lowercase()).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookups_ignore_case() {
        let dir = StaticDirectory::new();
        let key = AccountKey::random();
        dir.insert("Notch", key);
        assert_eq!(dir.resolve("notch").await.unwrap(), Some(key));
        assert_eq!(dir.resolve("NOTCH").await.unwrap(), Some(key));
        assert_eq!(dir.resolve("jeb_").await.unwrap(), None);

        assert_eq!(dir.remove("NoTcH"), Some(key));
        assert_eq!(dir.resolve("Notch").await.unwrap(), None);
    }
}

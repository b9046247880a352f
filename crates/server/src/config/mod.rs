mod dispatcher;
mod notifications;
mod reset;
mod store;

#[cfg(test)]
mod tests;

pub use dispatcher::*;
pub use notifications::*;
pub use reset::*;
pub use store::*;

use std::path::Path;

use serde::Deserialize;
use warden_core::GroupPolicies;

use crate::error::ServerError;

/// Top-level configuration for the Warden server, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct WardenConfig {
    /// Ledger store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Storage concurrency limits.
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    /// Daily reset schedule.
    #[serde(default)]
    pub reset: ResetConfig,
    /// Player-facing notices.
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Group policy table keyed by group name.
    #[serde(default = "GroupPolicies::builtin")]
    pub groups: GroupPolicies,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            dispatcher: DispatcherSection::default(),
            reset: ResetConfig::default(),
            notifications: NotificationsConfig::default(),
            groups: GroupPolicies::builtin(),
        }
    }
}

impl WardenConfig {
    /// Parse a configuration document.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from `path`, or fall back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}

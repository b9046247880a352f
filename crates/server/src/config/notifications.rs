use std::collections::BTreeMap;

use serde::Deserialize;

/// Player-facing notices.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Remind muted players of their mute when they connect.
    pub login_enabled: bool,
    /// Template overrides keyed by notice name: `ban`, `mute`,
    /// `lifted_ban`, `lifted_mute`.
    pub templates: BTreeMap<String, String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            login_enabled: true,
            templates: BTreeMap::new(),
        }
    }
}

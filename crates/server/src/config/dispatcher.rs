use std::time::Duration;

use serde::Deserialize;
use warden_engine::DispatcherConfig;

/// Worker pool limits for storage calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// Maximum storage calls in flight.
    pub max_concurrent: Option<usize>,
    /// Upper bound on a single storage call, in milliseconds.
    pub storage_timeout_ms: Option<u64>,
}

impl DispatcherSection {
    /// Overlay the configured values on the engine defaults.
    pub fn to_engine_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::default();
        if let Some(max) = self.max_concurrent {
            config.max_concurrent = max;
        }
        if let Some(ms) = self.storage_timeout_ms {
            config.storage_timeout = Duration::from_millis(ms);
        }
        config
    }
}

use serde::Deserialize;

/// Daily quota reset schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Whether the reset scheduler runs at all.
    pub enabled: bool,
    /// IANA zone whose midnight triggers the reset (e.g. `"Asia/Shanghai"`).
    pub timezone: String,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_owned(),
        }
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// The kinds of restriction a volunteer can issue.
///
/// Every kind has its own daily quota counter on the actor and its own
/// notice template. Adding a kind means adding a variant here and a
/// counter column in each storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    /// Access block: the account may not connect.
    Ban,
    /// Communication block: the account may connect but not chat.
    Mute,
}

impl RestrictionKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 2] = [Self::Ban, Self::Mute];

    /// Storage representation. Matches the legacy `type` column values.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "BAN",
            Self::Mute => "MUTE",
        }
    }

    /// Lowercase label used in configuration keys and log fields.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Mute => "mute",
        }
    }

    /// Whether this kind denies the connection outright.
    #[must_use]
    pub fn blocks_access(self) -> bool {
        matches!(self, Self::Ban)
    }
}

impl fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RestrictionKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(Self::Ban),
            "mute" => Ok(Self::Mute),
            _ => Err(ModelError::UnknownKind(s.to_owned())),
        }
    }
}

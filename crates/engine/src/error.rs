use thiserror::Error;

use warden_core::{AccountKey, ModelError, RestrictionKind, VolunteerId};
use warden_store::StoreError;

/// Errors surfaced by the engine and its façade.
///
/// Apart from [`EngineError::Storage`], every variant is a terminal outcome
/// for the call that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A storage call failed; `operation` names what was being attempted.
    #[error("storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// The caller has no actor record.
    #[error("{0} is not a volunteer")]
    NotAVolunteer(String),

    /// The actor has used up today's quota for this kind.
    #[error("daily {kind} quota exhausted ({used}/{quota})")]
    QuotaExhausted {
        kind: RestrictionKind,
        used: u32,
        quota: u32,
    },

    /// No account could be resolved for the given name or key.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The target already has an enforced restriction of this kind.
    #[error("{target} is already under an active {kind}")]
    AlreadyRestricted {
        target: AccountKey,
        kind: RestrictionKind,
    },

    /// Duration was negative or unparseable.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// The named group has no policy.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// The volunteer id is already assigned to another account.
    #[error("volunteer id {0} is already taken")]
    VolunteerIdTaken(VolunteerId),

    /// The engine or one of its parts was misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub(crate) fn storage(operation: &'static str, source: StoreError) -> Self {
        Self::Storage { operation, source }
    }

    /// Whether the caller should present this as "try again".
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// A distinct, human-readable message for each outcome.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Storage { .. } => {
                "The punishment database is temporarily unavailable, please try again.".to_owned()
            }
            Self::NotAVolunteer(_) => "You are not a volunteer.".to_owned(),
            Self::QuotaExhausted { kind, quota, .. } => {
                format!("You have reached today's {kind} limit ({quota}).")
            }
            Self::TargetNotFound(name) => format!("No player named {name} could be found."),
            Self::AlreadyRestricted { kind, .. } => match kind {
                RestrictionKind::Ban => "That player is already banned.".to_owned(),
                RestrictionKind::Mute => "That player is already muted.".to_owned(),
            },
            Self::InvalidDuration(input) => {
                format!("\"{input}\" is not a valid duration; use seconds or \"permanent\".")
            }
            Self::UnknownGroup(group) => format!("Group {group} does not exist."),
            Self::VolunteerIdTaken(id) => format!("Volunteer ID {id} is already in use."),
            Self::Configuration(_) => "The punishment system is misconfigured.".to_owned(),
        }
    }
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::InvalidAccountKey(raw) => Self::TargetNotFound(raw),
            ModelError::InvalidDuration(raw) => Self::InvalidDuration(raw),
            ModelError::UnknownKind(raw) => Self::Configuration(format!("unknown kind: {raw}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    fn every_variant() -> Vec<EngineError> {
        vec![
            EngineError::storage("ledger.issue", StoreError::Timeout(Duration::from_secs(5))),
            EngineError::NotAVolunteer("Steve".into()),
            EngineError::QuotaExhausted {
                kind: RestrictionKind::Ban,
                used: 3,
                quota: 3,
            },
            EngineError::TargetNotFound("Alex".into()),
            EngineError::AlreadyRestricted {
                target: AccountKey::random(),
                kind: RestrictionKind::Mute,
            },
            EngineError::InvalidDuration("-1".into()),
            EngineError::UnknownGroup("elite".into()),
            EngineError::VolunteerIdTaken(VolunteerId::from("07")),
            EngineError::Configuration("no store".into()),
        ]
    }

    #[test]
    fn only_storage_is_retryable() {
        let retryable: Vec<bool> = every_variant().iter().map(EngineError::is_retryable).collect();
        assert_eq!(retryable.iter().filter(|r| **r).count(), 1);
        assert!(retryable[0]);
    }

    #[test]
    fn user_messages_are_distinct() {
        let messages: HashSet<String> = every_variant().iter().map(EngineError::user_message).collect();
        assert_eq!(messages.len(), every_variant().len());
        assert!(messages.iter().any(|m| m.contains("try again")));
    }

    #[test]
    fn storage_display_names_operation() {
        let err = EngineError::storage("quota.consume", StoreError::Connection("refused".into()));
        assert_eq!(
            err.to_string(),
            "storage error during quota.consume: connection error: refused"
        );
    }

    #[test]
    fn model_errors_convert() {
        let err: EngineError = ModelError::InvalidDuration("abc".into()).into();
        assert!(matches!(err, EngineError::InvalidDuration(ref s) if s == "abc"));
    }
}

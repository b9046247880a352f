use thiserror::Error;

/// Errors raised while parsing or validating model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The input is not a valid account key.
    #[error("invalid account key: {0}")]
    InvalidAccountKey(String),

    /// The input is not a known restriction kind.
    #[error("unknown restriction kind: {0}")]
    UnknownKind(String),

    /// The input is not a usable duration.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

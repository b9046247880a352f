use thiserror::Error;

/// Errors that can occur when running the Warden server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An engine-level error surfaced during startup or reload.
    #[error("engine error: {0}")]
    Engine(#[from] warden_engine::EngineError),

    /// The storage backend could not be opened or migrated.
    #[error("store error: {0}")]
    Store(#[from] warden_store::StoreError),
}

impl From<toml::de::Error> for ServerError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

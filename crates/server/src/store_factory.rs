use std::sync::Arc;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
use std::time::Duration;

use tracing::info;
use warden_store::LedgerStore;
use warden_store_memory::MemoryLedgerStore;
#[cfg(feature = "postgres")]
use warden_store_postgres::{PostgresConfig, PostgresLedgerStore};
#[cfg(feature = "sqlite")]
use warden_store_sqlite::{SqliteConfig, SqliteLedgerStore};

use crate::config::StoreConfig;
use crate::error::ServerError;

/// Create a ledger store from the given configuration.
///
/// SQL backends run their migrations before returning.
#[allow(clippy::unused_async)]
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn LedgerStore>, ServerError> {
    let store: Arc<dyn LedgerStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryLedgerStore::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                ServerError::Config("postgres backend requires [store] url".into())
            })?;

            let mut pg_config = PostgresConfig {
                url: url.to_owned(),
                ..PostgresConfig::default()
            };
            if let Some(size) = config.pool_size {
                pg_config.pool_size = size;
            }
            if let Some(prefix) = &config.table_prefix {
                pg_config.table_prefix.clone_from(prefix);
            }
            if let Some(ms) = config.timeout_ms {
                pg_config.acquire_timeout = Duration::from_millis(ms);
            }

            Arc::new(PostgresLedgerStore::new(pg_config).await?)
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let mut sqlite_config = SqliteConfig::default();
            if let Some(url) = &config.url {
                sqlite_config.url.clone_from(url);
            }
            if let Some(size) = config.pool_size {
                sqlite_config.pool_size = size;
            }
            if let Some(prefix) = &config.table_prefix {
                sqlite_config.table_prefix.clone_from(prefix);
            }
            if let Some(ms) = config.timeout_ms {
                sqlite_config.busy_timeout = Duration::from_millis(ms);
            }

            Arc::new(SqliteLedgerStore::new(sqlite_config).await?)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported store backend: {other} (not compiled in or unknown)"
            )));
        }
    };

    info!(backend = %config.backend, "ledger store initialized");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend() {
        let store = create_store(&StoreConfig::default()).await.unwrap();
        assert!(store.list_actors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = StoreConfig {
            backend: "mongodb".into(),
            ..StoreConfig::default()
        };
        let err = create_store(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(ref m) if m.contains("mongodb")));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_in_memory_backend() {
        let config = StoreConfig {
            backend: "sqlite".into(),
            url: Some("sqlite::memory:".into()),
            pool_size: Some(1),
            ..StoreConfig::default()
        };
        let store = create_store(&config).await.unwrap();
        assert!(store.list_actors().await.unwrap().is_empty());
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn postgres_requires_url() {
        let config = StoreConfig {
            backend: "postgres".into(),
            ..StoreConfig::default()
        };
        let err = create_store(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }
}

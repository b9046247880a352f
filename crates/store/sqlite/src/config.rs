use std::time::Duration;

/// Configuration for the `SQLite` ledger store.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// `SQLite` connection URL (e.g. `sqlite://warden.db` or `sqlite::memory:`).
    pub url: String,

    /// Maximum number of pooled connections. Must be 1 for `sqlite::memory:`,
    /// where every connection would otherwise see its own empty database.
    pub pool_size: u32,

    /// Prefix applied to table names (e.g. `"warden_"`).
    pub table_prefix: String,

    /// How long a statement waits on a locked database, and how long a
    /// caller waits for a pooled connection.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: String::from("sqlite://warden.db"),
            pool_size: 4,
            table_prefix: String::from("warden_"),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// An isolated in-memory database, mostly for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: String::from("sqlite::memory:"),
            pool_size: 1,
            ..Self::default()
        }
    }

    pub(crate) fn volunteers_table(&self) -> String {
        format!("{}volunteers", self.table_prefix)
    }

    pub(crate) fn punishments_table(&self) -> String {
        format!("{}punishments", self.table_prefix)
    }

    pub(crate) fn punishment_index(&self) -> String {
        format!("{}punishments_target_kind_active", self.table_prefix)
    }
}

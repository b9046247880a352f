use sqlx::SqlitePool;

use crate::config::SqliteConfig;

/// Create the ledger tables and index if they do not exist.
///
/// Timestamps are stored as Unix epoch milliseconds.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &SqlitePool, config: &SqliteConfig) -> Result<(), sqlx::Error> {
    let volunteers = config.volunteers_table();
    let punishments = config.punishments_table();
    let index = config.punishment_index();

    let create_volunteers = format!(
        "CREATE TABLE IF NOT EXISTS {volunteers} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor_key TEXT NOT NULL UNIQUE,
            volunteer_id TEXT NOT NULL UNIQUE,
            group_name TEXT NOT NULL,
            daily_ban_used INTEGER NOT NULL DEFAULT 0,
            daily_mute_used INTEGER NOT NULL DEFAULT 0,
            last_reset INTEGER NOT NULL
        )"
    );

    let create_punishments = format!(
        "CREATE TABLE IF NOT EXISTS {punishments} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_key TEXT NOT NULL,
            volunteer_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            reason TEXT,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )"
    );

    let create_index = format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {punishments} (target_key, kind, active)"
    );

    sqlx::query(&create_volunteers).execute(pool).await?;
    sqlx::query(&create_punishments).execute(pool).await?;
    sqlx::query(&create_index).execute(pool).await?;

    Ok(())
}

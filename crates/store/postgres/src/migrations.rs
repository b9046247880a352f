use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// Every statement is additive, so running this against a schema created by
/// an earlier release is a no-op.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let volunteers = config.volunteers_table();
    let punishments = config.punishments_table();
    let index = config.punishment_index();

    let create_volunteers = format!(
        "CREATE TABLE IF NOT EXISTS {volunteers} (
            id BIGSERIAL PRIMARY KEY,
            actor_key UUID NOT NULL UNIQUE,
            volunteer_id TEXT NOT NULL UNIQUE,
            group_name TEXT NOT NULL,
            daily_ban_used INTEGER NOT NULL DEFAULT 0,
            daily_mute_used INTEGER NOT NULL DEFAULT 0,
            last_reset TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    );

    let create_punishments = format!(
        "CREATE TABLE IF NOT EXISTS {punishments} (
            id BIGSERIAL PRIMARY KEY,
            target_key UUID NOT NULL,
            volunteer_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            duration_seconds BIGINT NOT NULL,
            reason TEXT,
            issued_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ,
            active BOOLEAN NOT NULL DEFAULT TRUE
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

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use warden_core::{
    AccountKey, ActorQuota, NewPunishment, PunishmentRecord, RestrictionKind, VolunteerId,
};
use warden_store::error::StoreError;
use warden_store::store::{ConsumeAttempt, LedgerStore, PunishmentFilter};

use crate::config::PostgresConfig;
use crate::migrations;

type ActorRow = (Uuid, String, String, i32, i32, DateTime<Utc>);

type PunishmentRow = (
    i64,
    Uuid,
    String,
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    bool,
);

const ACTOR_COLUMNS: &str =
    "actor_key, volunteer_id, group_name, daily_ban_used, daily_mute_used, last_reset";

const PUNISHMENT_COLUMNS: &str = "id, target_key, volunteer_id, kind, duration_seconds, \
     reason, issued_at, expires_at, active";

/// Map a `sqlx` failure onto the storage error taxonomy.
fn map_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Constraint(db.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            StoreError::Connection(e.to_string())
        }
        sqlx::Error::PoolClosed => StoreError::Connection("connection pool closed".into()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn counter_column(kind: RestrictionKind) -> &'static str {
    match kind {
        RestrictionKind::Ban => "daily_ban_used",
        RestrictionKind::Mute => "daily_mute_used",
    }
}

fn to_counter(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("negative counter {value}")))
}

fn from_counter(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn actor_from_row(row: ActorRow) -> Result<ActorQuota, StoreError> {
    let (actor_key, volunteer_id, group_name, ban_used, mute_used, last_reset) = row;
    Ok(ActorQuota {
        actor_key: AccountKey::new(actor_key),
        volunteer_id: VolunteerId::from(volunteer_id),
        group_name,
        daily_ban_used: to_counter(ban_used)?,
        daily_mute_used: to_counter(mute_used)?,
        last_reset,
    })
}

fn punishment_from_row(row: PunishmentRow) -> Result<PunishmentRecord, StoreError> {
    let (id, target_key, volunteer_id, kind, duration_seconds, reason, issued_at, expires_at, active) =
        row;
    let kind = kind
        .parse::<RestrictionKind>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(PunishmentRecord {
        id,
        target_key: AccountKey::new(target_key),
        issuer_volunteer_id: VolunteerId::from(volunteer_id),
        kind,
        duration_seconds,
        reason,
        issued_at,
        expires_at,
        active,
    })
}

/// PostgreSQL-backed implementation of [`LedgerStore`].
///
/// Uses `sqlx::PgPool` for connection pooling; each pooled connection is
/// returned to the pool when the query future completes or is dropped.
/// Quota consumes are a single conditional `UPDATE ... WHERE used < limit`,
/// relying on the row lock to serialize concurrent consumes for one actor.
pub struct PostgresLedgerStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresLedgerStore {
    /// Create a new `PostgresLedgerStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the required tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresLedgerStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!(prefix = %config.table_prefix, "postgres ledger schema ready");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    async fn current_counter(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
    ) -> Result<Option<u32>, StoreError> {
        let table = self.config.volunteers_table();
        let column = counter_column(kind);
        let query = format!("SELECT {column} FROM {table} WHERE volunteer_id = $1");

        let row: Option<(i32,)> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(|(v,)| to_counter(v)).transpose()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run_migrations(&self.pool, &self.config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_actor(&self, actor_key: &AccountKey) -> Result<Option<ActorQuota>, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} WHERE actor_key = $1");

        let row: Option<ActorRow> = sqlx::query_as(&query)
            .bind(actor_key.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(actor_from_row).transpose()
    }

    async fn find_actor_by_volunteer_id(
        &self,
        volunteer_id: &VolunteerId,
    ) -> Result<Option<ActorQuota>, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} WHERE volunteer_id = $1");

        let row: Option<ActorRow> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(actor_from_row).transpose()
    }

    async fn list_actors(&self) -> Result<Vec<ActorQuota>, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} ORDER BY volunteer_id COLLATE \"C\"");

        let rows: Vec<ActorRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        rows.into_iter().map(actor_from_row).collect()
    }

    async fn upsert_actor(&self, actor: &ActorQuota) -> Result<(), StoreError> {
        let table = self.config.volunteers_table();

        // A clash on volunteer_id is not covered by the ON CONFLICT target and
        // surfaces as a unique violation.
        let query = format!(
            "INSERT INTO {table} ({ACTOR_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (actor_key) DO UPDATE \
             SET volunteer_id = EXCLUDED.volunteer_id, \
                 group_name = EXCLUDED.group_name"
        );

        sqlx::query(&query)
            .bind(actor.actor_key.as_uuid())
            .bind(actor.volunteer_id.as_str())
            .bind(&actor.group_name)
            .bind(from_counter(actor.daily_ban_used))
            .bind(from_counter(actor.daily_mute_used))
            .bind(actor.last_reset)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(())
    }

    async fn delete_actor(&self, actor_key: &AccountKey) -> Result<bool, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("DELETE FROM {table} WHERE actor_key = $1");

        let result = sqlx::query(&query)
            .bind(actor_key.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_consume(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        limit: u32,
    ) -> Result<ConsumeAttempt, StoreError> {
        let table = self.config.volunteers_table();
        let column = counter_column(kind);
        let query = format!(
            "UPDATE {table} SET {column} = {column} + 1 \
             WHERE volunteer_id = $1 AND {column} < $2 \
             RETURNING {column}"
        );

        let row: Option<(i32,)> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .bind(i64::from(limit))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        if let Some((used,)) = row {
            return Ok(ConsumeAttempt::Consumed {
                used: to_counter(used)?,
            });
        }

        // Nothing updated: either the actor is missing or the limit is hit.
        Ok(match self.current_counter(volunteer_id, kind).await? {
            Some(used) => ConsumeAttempt::Exhausted { used },
            None => ConsumeAttempt::NoSuchActor,
        })
    }

    async fn adjust_counter(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        delta: i32,
    ) -> Result<Option<u32>, StoreError> {
        let table = self.config.volunteers_table();
        let column = counter_column(kind);
        let query = format!(
            "UPDATE {table} SET {column} = GREATEST({column} + $2, 0) \
             WHERE volunteer_id = $1 \
             RETURNING {column}"
        );

        let row: Option<(i32,)> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .bind(delta)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(|(v,)| to_counter(v)).transpose()
    }

    async fn reset_all_counters(&self, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!(
            "UPDATE {table} SET daily_ban_used = 0, daily_mute_used = 0, last_reset = $1"
        );

        let result = sqlx::query(&query)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }

    async fn insert_punishment(
        &self,
        punishment: &NewPunishment,
    ) -> Result<PunishmentRecord, StoreError> {
        // TIMESTAMPTZ keeps microseconds.
        let punishment = &NewPunishment {
            issued_at: punishment.issued_at.trunc_subsecs(6),
            ..punishment.clone()
        };
        let table = self.config.punishments_table();
        let query = format!(
            "INSERT INTO {table} \
             (target_key, volunteer_id, kind, duration_seconds, reason, issued_at, expires_at, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE) \
             RETURNING id"
        );

        let (id,): (i64,) = sqlx::query_as(&query)
            .bind(punishment.target_key.as_uuid())
            .bind(punishment.issuer_volunteer_id.as_str())
            .bind(punishment.kind.as_str())
            .bind(punishment.duration_seconds)
            .bind(punishment.reason.as_deref())
            .bind(punishment.issued_at)
            .bind(punishment.expires_at())
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(PunishmentRecord::assign(id, punishment))
    }

    async fn list_punishments(
        &self,
        filter: &PunishmentFilter,
    ) -> Result<Vec<PunishmentRecord>, StoreError> {
        let table = self.config.punishments_table();
        let query = format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM {table} \
             WHERE target_key = $1 \
               AND ($2::TEXT IS NULL OR kind = $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR \
                    (active AND (expires_at IS NULL OR expires_at > $3))) \
             ORDER BY issued_at DESC, id DESC"
        );

        let rows: Vec<PunishmentRow> = sqlx::query_as(&query)
            .bind(filter.target_key.as_uuid())
            .bind(filter.kind.map(RestrictionKind::as_str))
            .bind(filter.enforced_at)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        rows.into_iter().map(punishment_from_row).collect()
    }

    async fn deactivate_punishments(
        &self,
        target_key: &AccountKey,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let table = self.config.punishments_table();
        let query = format!(
            "UPDATE {table} SET active = FALSE \
             WHERE target_key = $1 AND kind = $2 AND active \
               AND (expires_at IS NULL OR expires_at > $3)"
        );

        let result = sqlx::query(&query)
            .bind(target_key.as_uuid())
            .bind(kind.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/warden_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresLedgerStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        warden_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = PostgresLedgerStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        store.migrate().await.expect("second migration should be a no-op");
        store.migrate().await.expect("third migration should be a no-op");
    }
}

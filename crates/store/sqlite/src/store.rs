use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use warden_core::{
    AccountKey, ActorQuota, NewPunishment, PunishmentRecord, RestrictionKind, VolunteerId,
};
use warden_store::error::StoreError;
use warden_store::store::{ConsumeAttempt, LedgerStore, PunishmentFilter};

use crate::config::SqliteConfig;
use crate::migrations;

type ActorRow = (String, String, String, i64, i64, i64);

type PunishmentRow = (
    i64,
    String,
    String,
    String,
    i64,
    Option<String>,
    i64,
    Option<i64>,
    bool,
);

const ACTOR_COLUMNS: &str =
    "actor_key, volunteer_id, group_name, daily_ban_used, daily_mute_used, last_reset";

const PUNISHMENT_COLUMNS: &str = "id, target_key, volunteer_id, kind, duration_seconds, \
     reason, issued_at, expires_at, active";

fn map_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Constraint(db.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => StoreError::Connection(e.to_string()),
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

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {ms}")))
}

fn to_counter(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("bad counter {value}")))
}

fn parse_key(raw: &str) -> Result<AccountKey, StoreError> {
    raw.parse::<AccountKey>()
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn actor_from_row(row: ActorRow) -> Result<ActorQuota, StoreError> {
    let (actor_key, volunteer_id, group_name, ban_used, mute_used, last_reset) = row;
    Ok(ActorQuota {
        actor_key: parse_key(&actor_key)?,
        volunteer_id: VolunteerId::from(volunteer_id),
        group_name,
        daily_ban_used: to_counter(ban_used)?,
        daily_mute_used: to_counter(mute_used)?,
        last_reset: from_millis(last_reset)?,
    })
}

fn punishment_from_row(row: PunishmentRow) -> Result<PunishmentRecord, StoreError> {
    let (id, target_key, volunteer_id, kind, duration_seconds, reason, issued_at, expires_at, active) =
        row;
    Ok(PunishmentRecord {
        id,
        target_key: parse_key(&target_key)?,
        issuer_volunteer_id: VolunteerId::from(volunteer_id),
        kind: kind
            .parse::<RestrictionKind>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        duration_seconds,
        reason,
        issued_at: from_millis(issued_at)?,
        expires_at: expires_at.map(from_millis).transpose()?,
        active,
    })
}

/// SQLite-backed implementation of [`LedgerStore`] for single-host
/// deployments.
///
/// `SQLite` takes a database-wide write lock per statement, so the
/// conditional consume `UPDATE` is atomic without further coordination.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
}

impl SqliteLedgerStore {
    /// Open (creating if missing) the database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL is invalid or the pool
    /// cannot connect, or [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: SqliteConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(config.busy_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!(url = %config.url, "sqlite ledger schema ready");

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
        let query = format!("SELECT {column} FROM {table} WHERE volunteer_id = ?1");

        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(|(v,)| to_counter(v)).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run_migrations(&self.pool, &self.config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_actor(&self, actor_key: &AccountKey) -> Result<Option<ActorQuota>, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} WHERE actor_key = ?1");

        let row: Option<ActorRow> = sqlx::query_as(&query)
            .bind(actor_key.to_string())
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
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} WHERE volunteer_id = ?1");

        let row: Option<ActorRow> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(actor_from_row).transpose()
    }

    async fn list_actors(&self) -> Result<Vec<ActorQuota>, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("SELECT {ACTOR_COLUMNS} FROM {table} ORDER BY volunteer_id");

        let rows: Vec<ActorRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        rows.into_iter().map(actor_from_row).collect()
    }

    async fn upsert_actor(&self, actor: &ActorQuota) -> Result<(), StoreError> {
        let table = self.config.volunteers_table();
        let query = format!(
            "INSERT INTO {table} ({ACTOR_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (actor_key) DO UPDATE \
             SET volunteer_id = excluded.volunteer_id, \
                 group_name = excluded.group_name"
        );

        sqlx::query(&query)
            .bind(actor.actor_key.to_string())
            .bind(actor.volunteer_id.as_str())
            .bind(&actor.group_name)
            .bind(i64::from(actor.daily_ban_used))
            .bind(i64::from(actor.daily_mute_used))
            .bind(to_millis(actor.last_reset))
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(())
    }

    async fn delete_actor(&self, actor_key: &AccountKey) -> Result<bool, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!("DELETE FROM {table} WHERE actor_key = ?1");

        let result = sqlx::query(&query)
            .bind(actor_key.to_string())
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
             WHERE volunteer_id = ?1 AND {column} < ?2 \
             RETURNING {column}"
        );

        let row: Option<(i64,)> = sqlx::query_as(&query)
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
            "UPDATE {table} SET {column} = MAX({column} + ?2, 0) \
             WHERE volunteer_id = ?1 \
             RETURNING {column}"
        );

        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(volunteer_id.as_str())
            .bind(i64::from(delta))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.map(|(v,)| to_counter(v)).transpose()
    }

    async fn reset_all_counters(&self, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = self.config.volunteers_table();
        let query = format!(
            "UPDATE {table} SET daily_ban_used = 0, daily_mute_used = 0, last_reset = ?1"
        );

        let result = sqlx::query(&query)
            .bind(to_millis(at))
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }

    async fn insert_punishment(
        &self,
        punishment: &NewPunishment,
    ) -> Result<PunishmentRecord, StoreError> {
        // Stored as epoch milliseconds.
        let punishment = &NewPunishment {
            issued_at: punishment.issued_at.trunc_subsecs(3),
            ..punishment.clone()
        };
        let table = self.config.punishments_table();
        let query = format!(
            "INSERT INTO {table} \
             (target_key, volunteer_id, kind, duration_seconds, reason, issued_at, expires_at, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1) \
             RETURNING id"
        );

        let (id,): (i64,) = sqlx::query_as(&query)
            .bind(punishment.target_key.to_string())
            .bind(punishment.issuer_volunteer_id.as_str())
            .bind(punishment.kind.as_str())
            .bind(punishment.duration_seconds)
            .bind(punishment.reason.as_deref())
            .bind(to_millis(punishment.issued_at))
            .bind(punishment.expires_at().map(to_millis))
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
             WHERE target_key = ?1 \
               AND (?2 IS NULL OR kind = ?2) \
               AND (?3 IS NULL OR (active = 1 AND (expires_at IS NULL OR expires_at > ?3))) \
             ORDER BY issued_at DESC, id DESC"
        );

        let rows: Vec<PunishmentRow> = sqlx::query_as(&query)
            .bind(filter.target_key.to_string())
            .bind(filter.kind.map(RestrictionKind::as_str))
            .bind(filter.enforced_at.map(to_millis))
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
            "UPDATE {table} SET active = 0 \
             WHERE target_key = ?1 AND kind = ?2 AND active = 1 \
               AND (expires_at IS NULL OR expires_at > ?3)"
        );

        let result = sqlx::query(&query)
            .bind(target_key.to_string())
            .bind(kind.as_str())
            .bind(to_millis(now))
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }
}

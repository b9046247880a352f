use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_core::{
    AccountKey, ActorQuota, NewPunishment, PunishmentRecord, RestrictionKind, VolunteerId,
};

use crate::error::StoreError;

/// Outcome of a conditional quota consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeAttempt {
    /// The counter was below the limit and has been incremented to `used`.
    Consumed { used: u32 },
    /// The counter was already at or above the limit and was left alone.
    Exhausted { used: u32 },
    /// No actor carries this volunteer id.
    NoSuchActor,
}

/// Selection criteria for [`LedgerStore::list_punishments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentFilter {
    pub target_key: AccountKey,
    /// Restrict to a single kind.
    pub kind: Option<RestrictionKind>,
    /// Keep only records enforced at this instant (active and not expired).
    pub enforced_at: Option<DateTime<Utc>>,
}

impl PunishmentFilter {
    /// Every record for `target_key`, lifted or not.
    #[must_use]
    pub fn history(target_key: AccountKey) -> Self {
        Self {
            target_key,
            kind: None,
            enforced_at: None,
        }
    }

    /// Records for `target_key` still enforced at `now`.
    #[must_use]
    pub fn enforced(target_key: AccountKey, now: DateTime<Utc>) -> Self {
        Self {
            target_key,
            kind: None,
            enforced_at: Some(now),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: RestrictionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Whether `record` passes this filter.
    #[must_use]
    pub fn matches(&self, record: &PunishmentRecord) -> bool {
        record.target_key == self.target_key
            && self.kind.is_none_or(|k| record.kind == k)
            && self.enforced_at.is_none_or(|now| record.is_enforced_at(now))
    }
}

/// Storage gateway over the two persisted collections: actor quota rows and
/// punishment records.
///
/// Values returned are detached copies. Implementations must be `Send + Sync`
/// and safe for concurrent access; every conditional write below is a single
/// atomic step against the backing store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the backing schema if absent. Safe to call repeatedly.
    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Fetch the actor whose account is `actor_key`.
    async fn get_actor(&self, actor_key: &AccountKey) -> Result<Option<ActorQuota>, StoreError>;

    /// Fetch the actor currently holding `volunteer_id`.
    async fn find_actor_by_volunteer_id(
        &self,
        volunteer_id: &VolunteerId,
    ) -> Result<Option<ActorQuota>, StoreError>;

    /// All actors, ordered by volunteer id.
    async fn list_actors(&self) -> Result<Vec<ActorQuota>, StoreError>;

    /// Insert the actor keyed by `actor.actor_key`, or update its
    /// `volunteer_id` and `group_name` if it already exists.
    ///
    /// Counters and `last_reset` are written only on insert; afterwards they
    /// change solely through [`try_consume`](Self::try_consume),
    /// [`adjust_counter`](Self::adjust_counter) and
    /// [`reset_all_counters`](Self::reset_all_counters).
    ///
    /// Fails with [`StoreError::Constraint`] when `actor.volunteer_id` is
    /// already held by a different account.
    async fn upsert_actor(&self, actor: &ActorQuota) -> Result<(), StoreError>;

    /// Remove an actor. Returns `true` if a row existed.
    async fn delete_actor(&self, actor_key: &AccountKey) -> Result<bool, StoreError>;

    /// Increment the `kind` counter of the actor holding `volunteer_id`,
    /// but only while it is strictly below `limit`.
    async fn try_consume(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        limit: u32,
    ) -> Result<ConsumeAttempt, StoreError>;

    /// Add `delta` to the `kind` counter of the actor holding
    /// `volunteer_id`, flooring at zero. Returns the new value, or `None`
    /// when the actor does not exist.
    async fn adjust_counter(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        delta: i32,
    ) -> Result<Option<u32>, StoreError>;

    /// Zero every counter of every actor and stamp `last_reset = at`.
    /// Returns the number of actors touched.
    async fn reset_all_counters(&self, at: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Persist a new punishment and return it with its assigned id.
    async fn insert_punishment(
        &self,
        punishment: &NewPunishment,
    ) -> Result<PunishmentRecord, StoreError>;

    /// Records matching `filter`, newest `issued_at` first, ties broken by
    /// descending id.
    async fn list_punishments(
        &self,
        filter: &PunishmentFilter,
    ) -> Result<Vec<PunishmentRecord>, StoreError>;

    /// Clear `active` on every record of `kind` against `target_key` that is
    /// enforced at `now`. Returns the number of records changed.
    async fn deactivate_punishments(
        &self,
        target_key: &AccountKey,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn _assert_dyn_ledger_store(_: &dyn LedgerStore) {}

    fn record(kind: RestrictionKind, duration_seconds: i64) -> PunishmentRecord {
        PunishmentRecord::assign(
            1,
            &NewPunishment {
                target_key: AccountKey::random(),
                issuer_volunteer_id: VolunteerId::from("01"),
                kind,
                duration_seconds,
                reason: None,
                issued_at: Utc::now(),
            },
        )
    }

    #[test]
    fn filter_matches_target_and_kind() {
        let rec = record(RestrictionKind::Mute, 0);
        let filter = PunishmentFilter::history(rec.target_key);
        assert!(filter.matches(&rec));
        assert!(filter.clone().with_kind(RestrictionKind::Mute).matches(&rec));
        assert!(!filter.with_kind(RestrictionKind::Ban).matches(&rec));
        assert!(!PunishmentFilter::history(AccountKey::random()).matches(&rec));
    }

    #[test]
    fn enforced_filter_drops_expired_and_lifted() {
        let mut rec = record(RestrictionKind::Ban, 60);
        let later = rec.issued_at + Duration::seconds(61);
        assert!(PunishmentFilter::enforced(rec.target_key, rec.issued_at).matches(&rec));
        assert!(!PunishmentFilter::enforced(rec.target_key, later).matches(&rec));

        rec.active = false;
        assert!(!PunishmentFilter::enforced(rec.target_key, rec.issued_at).matches(&rec));
        assert!(PunishmentFilter::history(rec.target_key).matches(&rec));
    }
}

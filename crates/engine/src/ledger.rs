use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use warden_core::{AccountKey, NewPunishment, PunishmentRecord, RestrictionKind};
use warden_store::{LedgerStore, PunishmentFilter};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;

/// Owns the meaning of "target X is currently restricted under kind K".
///
/// Enforcement is always evaluated against the instant passed in (wall-clock
/// time for the plain variants), never cached.
pub struct PunishmentLedger {
    store: Arc<dyn LedgerStore>,
    dispatcher: Arc<Dispatcher>,
}

impl PunishmentLedger {
    pub fn new(store: Arc<dyn LedgerStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Whether `target` has an enforced restriction of `kind` right now.
    pub async fn is_restricted(
        &self,
        target: &AccountKey,
        kind: RestrictionKind,
    ) -> Result<bool, EngineError> {
        self.is_restricted_at(target, kind, Utc::now()).await
    }

    /// Whether `target` has a restriction of `kind` enforced at `now`.
    pub async fn is_restricted_at(
        &self,
        target: &AccountKey,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        Ok(self.governing_at(target, kind, now).await?.is_some())
    }

    /// The most recently issued restriction of `kind` enforced at `now`.
    pub async fn governing_at(
        &self,
        target: &AccountKey,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<Option<PunishmentRecord>, EngineError> {
        let filter = PunishmentFilter::enforced(*target, now).with_kind(kind);
        let store = Arc::clone(&self.store);
        let records = self
            .dispatcher
            .storage("ledger.is_restricted", async move {
                store.list_punishments(&filter).await
            })
            .await?;
        Ok(records.into_iter().next())
    }

    /// All enforced records for `target` across kinds, newest first.
    pub async fn active_records(
        &self,
        target: &AccountKey,
    ) -> Result<Vec<PunishmentRecord>, EngineError> {
        self.active_records_at(target, Utc::now()).await
    }

    /// All records for `target` enforced at `now`, newest first.
    pub async fn active_records_at(
        &self,
        target: &AccountKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<PunishmentRecord>, EngineError> {
        let filter = PunishmentFilter::enforced(*target, now);
        let store = Arc::clone(&self.store);
        self.dispatcher
            .storage("ledger.active_records", async move {
                store.list_punishments(&filter).await
            })
            .await
    }

    /// Persist a new restriction.
    ///
    /// Does not look at quota; callers consume quota first.
    pub async fn issue(&self, punishment: &NewPunishment) -> Result<PunishmentRecord, EngineError> {
        if punishment.duration_seconds < 0 {
            return Err(EngineError::InvalidDuration(
                punishment.duration_seconds.to_string(),
            ));
        }
        let store = Arc::clone(&self.store);
        let punishment = punishment.clone();
        let record = self
            .dispatcher
            .storage("ledger.issue", async move {
                store.insert_punishment(&punishment).await
            })
            .await?;
        info!(
            id = record.id,
            target = %record.target_key,
            kind = %record.kind,
            volunteer_id = %record.issuer_volunteer_id,
            duration_seconds = record.duration_seconds,
            "restriction issued"
        );
        Ok(record)
    }

    /// Deactivate every enforced record of `kind` against `target`.
    ///
    /// Returns how many records changed; zero is not an error.
    pub async fn lift(&self, target: &AccountKey, kind: RestrictionKind) -> Result<u64, EngineError> {
        let store = Arc::clone(&self.store);
        let key = *target;
        let lifted = self
            .dispatcher
            .storage("ledger.lift", async move {
                store.deactivate_punishments(&key, kind, Utc::now()).await
            })
            .await?;
        debug!(target = %target, kind = %kind, lifted, "restriction lift applied");
        Ok(lifted)
    }

    /// Every record for `target`, lifted or not, newest first.
    pub async fn history(&self, target: &AccountKey) -> Result<Vec<PunishmentRecord>, EngineError> {
        let filter = PunishmentFilter::history(*target);
        let store = Arc::clone(&self.store);
        self.dispatcher
            .storage("ledger.history", async move {
                store.list_punishments(&filter).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use warden_core::VolunteerId;
    use warden_store_memory::MemoryLedgerStore;

    use super::*;
    use crate::dispatcher::{DispatcherConfig, NoopHooks};
    use crate::metrics::WardenMetrics;

    fn ledger() -> PunishmentLedger {
        let dispatcher = Dispatcher::start(
            DispatcherConfig::default(),
            Arc::new(NoopHooks),
            Arc::new(WardenMetrics::default()),
        );
        PunishmentLedger::new(Arc::new(MemoryLedgerStore::new()), Arc::new(dispatcher))
    }

    fn punishment(target: AccountKey, kind: RestrictionKind, duration_seconds: i64) -> NewPunishment {
        NewPunishment {
            target_key: target,
            issuer_volunteer_id: VolunteerId::from("01"),
            kind,
            duration_seconds,
            reason: None,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn negative_duration_is_rejected() {
        let ledger = ledger();
        let result = ledger
            .issue(&punishment(AccountKey::random(), RestrictionKind::Ban, -1))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidDuration(_))));
    }

    #[tokio::test]
    async fn finite_restriction_expires_without_lift() {
        let ledger = ledger();
        let target = AccountKey::random();
        let record = ledger
            .issue(&punishment(target, RestrictionKind::Mute, 600))
            .await
            .unwrap();

        assert!(ledger.is_restricted(&target, RestrictionKind::Mute).await.unwrap());
        assert!(!ledger.is_restricted(&target, RestrictionKind::Ban).await.unwrap());

        let after_expiry = record.issued_at + Duration::seconds(601);
        assert!(
            !ledger
                .is_restricted_at(&target, RestrictionKind::Mute, after_expiry)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn lift_clears_restriction_but_keeps_history() {
        let ledger = ledger();
        let target = AccountKey::random();
        ledger.issue(&punishment(target, RestrictionKind::Ban, 0)).await.unwrap();

        assert_eq!(ledger.lift(&target, RestrictionKind::Ban).await.unwrap(), 1);
        assert!(!ledger.is_restricted(&target, RestrictionKind::Ban).await.unwrap());
        assert_eq!(ledger.lift(&target, RestrictionKind::Ban).await.unwrap(), 0);

        let history = ledger.history(&target).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].active);
    }

    #[tokio::test]
    async fn governing_record_is_most_recent() {
        let ledger = ledger();
        let target = AccountKey::random();
        let mut older = punishment(target, RestrictionKind::Ban, 0);
        older.issued_at -= Duration::minutes(5);
        ledger.issue(&older).await.unwrap();
        let newer = ledger
            .issue(&punishment(target, RestrictionKind::Ban, 86_400))
            .await
            .unwrap();

        let governing = ledger
            .governing_at(&target, RestrictionKind::Ban, Utc::now())
            .await
            .unwrap();
        assert_eq!(governing, Some(newer));
        assert_eq!(ledger.active_records(&target).await.unwrap().len(), 2);
    }
}

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use warden_core::{
    AccountKey, ActorQuota, NewPunishment, PunishmentRecord, RestrictionKind, VolunteerId,
};
use warden_store::error::StoreError;
use warden_store::store::{ConsumeAttempt, LedgerStore, PunishmentFilter};

/// In-memory [`LedgerStore`] backed by [`DashMap`]s.
///
/// Counter updates take the shard lock of a single actor entry, so
/// consumes for different actors never contend. Writes that touch the
/// volunteer id index are serialized through `index_gate` to keep the two
/// maps consistent.
#[derive(Debug)]
pub struct MemoryLedgerStore {
    actors: DashMap<AccountKey, ActorQuota>,
    by_volunteer_id: DashMap<VolunteerId, AccountKey>,
    index_gate: Mutex<()>,
    punishments: DashMap<AccountKey, Vec<PunishmentRecord>>,
    next_id: AtomicI64,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self {
            actors: DashMap::new(),
            by_volunteer_id: DashMap::new(),
            index_gate: Mutex::new(()),
            punishments: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryLedgerStore {
    /// Create a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    fn actor_key_for(&self, volunteer_id: &VolunteerId) -> Option<AccountKey> {
        self.by_volunteer_id.get(volunteer_id).map(|k| *k)
    }
}

fn newest_first(records: &mut [PunishmentRecord]) {
    records.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_actor(&self, actor_key: &AccountKey) -> Result<Option<ActorQuota>, StoreError> {
        Ok(self.actors.get(actor_key).map(|a| a.clone()))
    }

    async fn find_actor_by_volunteer_id(
        &self,
        volunteer_id: &VolunteerId,
    ) -> Result<Option<ActorQuota>, StoreError> {
        Ok(self
            .actor_key_for(volunteer_id)
            .and_then(|key| self.actors.get(&key).map(|a| a.clone())))
    }

    async fn list_actors(&self) -> Result<Vec<ActorQuota>, StoreError> {
        let mut actors: Vec<ActorQuota> = self.actors.iter().map(|a| a.clone()).collect();
        actors.sort_by(|a, b| a.volunteer_id.cmp(&b.volunteer_id));
        Ok(actors)
    }

    async fn upsert_actor(&self, actor: &ActorQuota) -> Result<(), StoreError> {
        let _gate = self.index_gate.lock();

        if let Some(holder) = self.actor_key_for(&actor.volunteer_id) {
            if holder != actor.actor_key {
                return Err(StoreError::Constraint(format!(
                    "volunteer id {} already assigned to {holder}",
                    actor.volunteer_id
                )));
            }
        }

        let previous_id = match self.actors.entry(actor.actor_key) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                let previous_id =
                    std::mem::replace(&mut existing.volunteer_id, actor.volunteer_id.clone());
                existing.group_name.clone_from(&actor.group_name);
                Some(previous_id)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(actor.clone());
                None
            }
        };
        if let Some(previous_id) = previous_id.filter(|id| *id != actor.volunteer_id) {
            self.by_volunteer_id.remove(&previous_id);
        }
        self.by_volunteer_id
            .insert(actor.volunteer_id.clone(), actor.actor_key);
        Ok(())
    }

    async fn delete_actor(&self, actor_key: &AccountKey) -> Result<bool, StoreError> {
        let _gate = self.index_gate.lock();
        match self.actors.remove(actor_key) {
            Some((_, removed)) => {
                self.by_volunteer_id.remove(&removed.volunteer_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn try_consume(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        limit: u32,
    ) -> Result<ConsumeAttempt, StoreError> {
        let Some(key) = self.actor_key_for(volunteer_id) else {
            return Ok(ConsumeAttempt::NoSuchActor);
        };
        // The shard write lock makes check-and-increment a single step.
        let Some(mut actor) = self.actors.get_mut(&key) else {
            return Ok(ConsumeAttempt::NoSuchActor);
        };
        let counter = actor.used_mut(kind);
        if *counter >= limit {
            return Ok(ConsumeAttempt::Exhausted { used: *counter });
        }
        *counter += 1;
        Ok(ConsumeAttempt::Consumed { used: *counter })
    }

    async fn adjust_counter(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
        delta: i32,
    ) -> Result<Option<u32>, StoreError> {
        let Some(key) = self.actor_key_for(volunteer_id) else {
            return Ok(None);
        };
        Ok(self.actors.get_mut(&key).map(|mut actor| {
            actor.adjust(kind, delta);
            actor.used(kind)
        }))
    }

    async fn reset_all_counters(&self, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut touched = 0;
        for mut actor in self.actors.iter_mut() {
            actor.reset(at);
            touched += 1;
        }
        Ok(touched)
    }

    async fn insert_punishment(
        &self,
        punishment: &NewPunishment,
    ) -> Result<PunishmentRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = PunishmentRecord::assign(id, punishment);
        self.punishments
            .entry(punishment.target_key)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn list_punishments(
        &self,
        filter: &PunishmentFilter,
    ) -> Result<Vec<PunishmentRecord>, StoreError> {
        let mut records: Vec<PunishmentRecord> = self
            .punishments
            .get(&filter.target_key)
            .map(|records| records.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        newest_first(&mut records);
        Ok(records)
    }

    async fn deactivate_punishments(
        &self,
        target_key: &AccountKey,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let Some(mut records) = self.punishments.get_mut(target_key) else {
            return Ok(0);
        };
        let mut changed = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.kind == kind && r.is_enforced_at(now))
        {
            record.active = false;
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use warden_store::testing::run_store_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let store = MemoryLedgerStore::new();
        run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn returned_actors_are_detached_copies() {
        let store = MemoryLedgerStore::new();
        let actor = ActorQuota::new(AccountKey::random(), "01", "default", Utc::now());
        store.upsert_actor(&actor).await.unwrap();

        let mut copy = store.get_actor(&actor.actor_key).await.unwrap().unwrap();
        copy.daily_ban_used = 9;
        copy.group_name = "senior".into();

        let stored = store.get_actor(&actor.actor_key).await.unwrap().unwrap();
        assert_eq!(stored, actor);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_consumes_never_overrun() {
        let store = Arc::new(MemoryLedgerStore::new());
        let actor = ActorQuota::new(AccountKey::random(), "race", "default", Utc::now());
        store.upsert_actor(&actor).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            let id = actor.volunteer_id.clone();
            handles.push(tokio::spawn(async move {
                store.try_consume(&id, RestrictionKind::Mute, 5).await
            }));
        }

        let mut consumed = 0;
        for handle in handles {
            if let ConsumeAttempt::Consumed { .. } = handle.await.unwrap().unwrap() {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 5);
        let stored = store.get_actor(&actor.actor_key).await.unwrap().unwrap();
        assert_eq!(stored.daily_mute_used, 5);
    }

    #[tokio::test]
    async fn deactivate_leaves_expired_records_untouched() {
        let store = MemoryLedgerStore::new();
        let target = AccountKey::random();
        let issued_at = Utc::now() - chrono::Duration::hours(1);
        let expired = store
            .insert_punishment(&NewPunishment {
                target_key: target,
                issuer_volunteer_id: VolunteerId::from("01"),
                kind: RestrictionKind::Ban,
                duration_seconds: 60,
                reason: None,
                issued_at,
            })
            .await
            .unwrap();

        let changed = store
            .deactivate_punishments(&target, RestrictionKind::Ban, Utc::now())
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let history = store
            .list_punishments(&PunishmentFilter::history(target))
            .await
            .unwrap();
        assert_eq!(history, vec![expired]);
    }
}

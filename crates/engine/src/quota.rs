use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use warden_core::{ActorQuota, GroupPolicies, RestrictionKind, VolunteerId};
use warden_store::{ConsumeAttempt, LedgerStore};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::metrics::WardenMetrics;

/// Result of [`QuotaEnforcer::check_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// One unit was taken; `used` now counts it.
    Consumed { used: u32, quota: u32 },
    /// Nothing left to take.
    QuotaExhausted { used: u32, quota: u32 },
    /// The volunteer id belongs to no actor.
    NotAVolunteer,
}

/// Outcome of a bulk reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Counters were zeroed for `actors` actors.
    Completed { actors: u64 },
    /// Another reset was still running.
    Skipped,
}

/// Usage against quota for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: u32,
    pub quota: u32,
}

impl Usage {
    /// Units left; zero when the quota was lowered below current use.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.quota.saturating_sub(self.used)
    }
}

/// Display view of one actor's quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub volunteer_id: VolunteerId,
    pub group_name: String,
    pub ban: Usage,
    pub mute: Usage,
    pub last_reset: DateTime<Utc>,
}

impl QuotaSnapshot {
    #[must_use]
    pub fn from_actor(actor: &ActorQuota, policies: &GroupPolicies) -> Self {
        let usage = |kind| Usage {
            used: actor.used(kind),
            quota: policies.quota(&actor.group_name, kind),
        };
        Self {
            volunteer_id: actor.volunteer_id.clone(),
            group_name: actor.group_name.clone(),
            ban: usage(RestrictionKind::Ban),
            mute: usage(RestrictionKind::Mute),
            last_reset: actor.last_reset,
        }
    }

    #[must_use]
    pub fn usage(&self, kind: RestrictionKind) -> Usage {
        match kind {
            RestrictionKind::Ban => self.ban,
            RestrictionKind::Mute => self.mute,
        }
    }
}

/// Per-actor, per-kind daily usage counters.
///
/// The consume itself is a single conditional write in the store, so two
/// concurrent consumes by one actor can never both take the last unit.
pub struct QuotaEnforcer {
    store: Arc<dyn LedgerStore>,
    dispatcher: Arc<Dispatcher>,
    policies: Arc<RwLock<GroupPolicies>>,
    metrics: Arc<WardenMetrics>,
    reset_gate: tokio::sync::Mutex<()>,
}

impl QuotaEnforcer {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        dispatcher: Arc<Dispatcher>,
        policies: Arc<RwLock<GroupPolicies>>,
        metrics: Arc<WardenMetrics>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            policies,
            metrics,
            reset_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn quota_for(&self, group: &str, kind: RestrictionKind) -> u32 {
        self.policies.read().quota(group, kind)
    }

    /// Take one unit of `kind` quota from the actor holding `volunteer_id`.
    pub async fn check_and_consume(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
    ) -> Result<ConsumeResult, EngineError> {
        let actor = self.find_actor("quota.lookup", volunteer_id).await?;
        let Some(actor) = actor else {
            return Ok(ConsumeResult::NotAVolunteer);
        };

        let quota = self.quota_for(&actor.group_name, kind);
        let store = Arc::clone(&self.store);
        let id = volunteer_id.clone();
        let attempt = self
            .dispatcher
            .storage("quota.consume", async move {
                store.try_consume(&id, kind, quota).await
            })
            .await?;

        Ok(match attempt {
            ConsumeAttempt::Consumed { used } => {
                debug!(volunteer_id = %volunteer_id, kind = %kind, used, quota, "quota consumed");
                ConsumeResult::Consumed { used, quota }
            }
            ConsumeAttempt::Exhausted { used } => {
                self.metrics.increment_quota_exhausted();
                debug!(volunteer_id = %volunteer_id, kind = %kind, used, quota, "quota exhausted");
                ConsumeResult::QuotaExhausted { used, quota }
            }
            // Removed between the lookup and the consume.
            ConsumeAttempt::NoSuchActor => ConsumeResult::NotAVolunteer,
        })
    }

    /// Give back one unit after a failed issuance. Floors at zero.
    pub async fn refund(
        &self,
        volunteer_id: &VolunteerId,
        kind: RestrictionKind,
    ) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        let id = volunteer_id.clone();
        let after = self
            .dispatcher
            .storage("quota.refund", async move {
                store.adjust_counter(&id, kind, -1).await
            })
            .await?;
        match after {
            Some(used) => {
                self.metrics.increment_refunded();
                info!(volunteer_id = %volunteer_id, kind = %kind, used, "quota refunded");
            }
            None => warn!(volunteer_id = %volunteer_id, kind = %kind, "refund for unknown volunteer"),
        }
        Ok(())
    }

    /// Current usage for display. Not synchronized with in-flight consumes.
    pub async fn snapshot(
        &self,
        volunteer_id: &VolunteerId,
    ) -> Result<Option<QuotaSnapshot>, EngineError> {
        let actor = self.find_actor("quota.snapshot", volunteer_id).await?;
        Ok(actor.map(|a| self.snapshot_of(&a)))
    }

    async fn find_actor(
        &self,
        operation: &'static str,
        volunteer_id: &VolunteerId,
    ) -> Result<Option<ActorQuota>, EngineError> {
        let store = Arc::clone(&self.store);
        let id = volunteer_id.clone();
        self.dispatcher
            .storage(operation, async move {
                store.find_actor_by_volunteer_id(&id).await
            })
            .await
    }

    /// Usage view of an already-loaded actor.
    pub fn snapshot_of(&self, actor: &ActorQuota) -> QuotaSnapshot {
        QuotaSnapshot::from_actor(actor, &self.policies.read())
    }

    /// Zero every actor's counters, stamping `last_reset = at`.
    ///
    /// Never runs two resets at once: a call that finds one in progress
    /// returns [`ResetOutcome::Skipped`].
    pub async fn reset_all(&self, at: DateTime<Utc>) -> Result<ResetOutcome, EngineError> {
        let Ok(_running) = self.reset_gate.try_lock() else {
            warn!("quota reset already in progress, skipping");
            return Ok(ResetOutcome::Skipped);
        };
        let store = Arc::clone(&self.store);
        let actors = self
            .dispatcher
            .storage("quota.reset_all", async move {
                store.reset_all_counters(at).await
            })
            .await?;
        self.metrics.increment_resets();
        info!(actors, at = %at, "daily quotas reset");
        Ok(ResetOutcome::Completed { actors })
    }
}

#[cfg(test)]
mod tests {
    use warden_core::{AccountKey, GroupPolicy};
    use warden_store_memory::MemoryLedgerStore;

    use super::*;
    use crate::dispatcher::{DispatcherConfig, NoopHooks};

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        enforcer: QuotaEnforcer,
    }

    fn fixture(ban_quota: u32, mute_quota: u32) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let metrics = Arc::new(WardenMetrics::default());
        let dispatcher = Arc::new(Dispatcher::start(
            DispatcherConfig::default(),
            Arc::new(NoopHooks),
            Arc::clone(&metrics),
        ));
        let policies = GroupPolicies::new()
            .with_group("default", GroupPolicy::with_quotas(ban_quota, mute_quota));
        let enforcer = QuotaEnforcer::new(
            store.clone(),
            dispatcher,
            Arc::new(RwLock::new(policies)),
            metrics,
        );
        Fixture { store, enforcer }
    }

    async fn add_actor(store: &MemoryLedgerStore, id: &str, group: &str) -> ActorQuota {
        let actor = ActorQuota::new(AccountKey::random(), id, group, Utc::now());
        store.upsert_actor(&actor).await.unwrap();
        actor
    }

    #[tokio::test]
    async fn consumes_until_quota_then_exhausts() {
        let f = fixture(3, 1);
        add_actor(&f.store, "01", "default").await;
        let id = VolunteerId::from("01");

        for n in 1..=3 {
            assert_eq!(
                f.enforcer.check_and_consume(&id, RestrictionKind::Ban).await.unwrap(),
                ConsumeResult::Consumed { used: n, quota: 3 }
            );
            let snap = f.enforcer.snapshot(&id).await.unwrap().unwrap();
            assert_eq!(snap.ban.remaining(), 3 - n);
        }
        assert_eq!(
            f.enforcer.check_and_consume(&id, RestrictionKind::Ban).await.unwrap(),
            ConsumeResult::QuotaExhausted { used: 3, quota: 3 }
        );
    }

    #[tokio::test]
    async fn unknown_volunteer_is_not_a_volunteer() {
        let f = fixture(3, 3);
        assert_eq!(
            f.enforcer
                .check_and_consume(&VolunteerId::from("99"), RestrictionKind::Mute)
                .await
                .unwrap(),
            ConsumeResult::NotAVolunteer
        );
        assert!(f.enforcer.snapshot(&VolunteerId::from("99")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_without_policy_has_no_quota() {
        let f = fixture(3, 3);
        add_actor(&f.store, "02", "retired").await;
        assert_eq!(
            f.enforcer
                .check_and_consume(&VolunteerId::from("02"), RestrictionKind::Ban)
                .await
                .unwrap(),
            ConsumeResult::QuotaExhausted { used: 0, quota: 0 }
        );
    }

    #[tokio::test]
    async fn refund_restores_one_unit_and_floors() {
        let f = fixture(1, 1);
        add_actor(&f.store, "03", "default").await;
        let id = VolunteerId::from("03");

        f.enforcer.check_and_consume(&id, RestrictionKind::Mute).await.unwrap();
        f.enforcer.refund(&id, RestrictionKind::Mute).await.unwrap();
        f.enforcer.refund(&id, RestrictionKind::Mute).await.unwrap();
        let snap = f.enforcer.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snap.mute, Usage { used: 0, quota: 1 });
    }

    #[tokio::test]
    async fn lowered_quota_reports_zero_remaining() {
        let f = fixture(5, 5);
        add_actor(&f.store, "04", "default").await;
        let id = VolunteerId::from("04");
        for _ in 0..4 {
            f.enforcer.check_and_consume(&id, RestrictionKind::Ban).await.unwrap();
        }
        f.enforcer
            .policies
            .write()
            .insert("default", GroupPolicy::with_quotas(2, 5));

        let snap = f.enforcer.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snap.ban, Usage { used: 4, quota: 2 });
        assert_eq!(snap.ban.remaining(), 0);
        assert!(matches!(
            f.enforcer.check_and_consume(&id, RestrictionKind::Ban).await.unwrap(),
            ConsumeResult::QuotaExhausted { .. }
        ));
    }

    #[tokio::test]
    async fn reset_all_zeroes_every_actor() {
        let f = fixture(2, 2);
        let a = add_actor(&f.store, "05", "default").await;
        let b = add_actor(&f.store, "06", "default").await;
        f.enforcer
            .check_and_consume(&a.volunteer_id, RestrictionKind::Ban)
            .await
            .unwrap();

        let at = Utc::now();
        assert_eq!(
            f.enforcer.reset_all(at).await.unwrap(),
            ResetOutcome::Completed { actors: 2 }
        );
        for key in [a.actor_key, b.actor_key] {
            let actor = f.store.get_actor(&key).await.unwrap().unwrap();
            assert_eq!((actor.daily_ban_used, actor.daily_mute_used), (0, 0));
            assert_eq!(actor.last_reset, at);
        }
    }

    #[tokio::test]
    async fn overlapping_reset_is_skipped() {
        let f = fixture(1, 1);
        let _held = f.enforcer.reset_gate.lock().await;
        assert_eq!(
            f.enforcer.reset_all(Utc::now()).await.unwrap(),
            ResetOutcome::Skipped
        );
    }
}

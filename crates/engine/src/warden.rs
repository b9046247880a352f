use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use warden_core::{
    AccountKey, ActorQuota, DEFAULT_GROUP, GroupPolicies, NewPunishment, PunishmentRecord,
    RestrictionKind, VolunteerId,
};
use warden_store::{KeyGuard, KeyLock, LedgerStore, StoreError};

use crate::directory::AccountDirectory;
use crate::dispatcher::{Dispatcher, Effect};
use crate::error::EngineError;
use crate::ledger::PunishmentLedger;
use crate::metrics::WardenMetrics;
use crate::notice::{NoticeKind, NoticeTemplates};
use crate::quota::{ConsumeResult, QuotaEnforcer, QuotaSnapshot, ResetOutcome, Usage};
use crate::scheduler::{ResetSchedule, ResetScheduler, ResetSchedulerHandle};

/// A request to restrict `target`, issued by the volunteer behind `issuer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub issuer: AccountKey,
    pub target: AccountKey,
    pub kind: RestrictionKind,
    /// `0` for permanent.
    pub duration_seconds: i64,
    pub reason: Option<String>,
}

/// What a successful issuance produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReceipt {
    pub record: PunishmentRecord,
    /// The issuer's quota for this kind after the issuance.
    pub usage: Usage,
}

/// The restriction governing a target right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRestriction {
    pub record: PunishmentRecord,
    /// Seconds left, `None` when permanent.
    pub remaining_seconds: Option<i64>,
}

/// Result of the connection-time check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectDecision {
    /// The connection is refused because of this access block.
    Denied(PunishmentRecord),
    /// The connection may proceed; `muted` tells whether chat is blocked.
    Admitted { muted: bool },
}

/// Engine façade for the command and session front ends.
///
/// Storage work is spawned onto the dispatcher's worker pool. Every
/// session-visible outcome is queued to the serial context as an
/// [`Effect`].
pub struct Warden {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) lock: Arc<dyn KeyLock>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) ledger: PunishmentLedger,
    pub(crate) quota: Arc<QuotaEnforcer>,
    pub(crate) policies: Arc<RwLock<GroupPolicies>>,
    pub(crate) notices: NoticeTemplates,
    pub(crate) directory: Option<Arc<dyn AccountDirectory>>,
    pub(crate) metrics: Arc<WardenMetrics>,
    pub(crate) login_notices: bool,
    pub(crate) lock_timeout: Duration,
}

fn lock_name(target: &AccountKey, kind: RestrictionKind) -> String {
    format!("restrict:{target}:{}", kind.label())
}

async fn release_lock(guard: Box<dyn KeyGuard>) {
    let name = guard.name().to_owned();
    if let Err(e) = guard.release().await {
        warn!(lock = %name, error = %e, "failed to release restriction lock");
    }
}

impl Warden {
    /// Return a handle to the engine metrics.
    pub fn metrics(&self) -> &Arc<WardenMetrics> {
        &self.metrics
    }

    /// Return the punishment ledger.
    pub fn ledger(&self) -> &PunishmentLedger {
        &self.ledger
    }

    /// Return the quota enforcer.
    pub fn quota(&self) -> &Arc<QuotaEnforcer> {
        &self.quota
    }

    /// A copy of the current group policy table.
    pub fn policies(&self) -> GroupPolicies {
        self.policies.read().clone()
    }

    /// Swap in a new group policy table. Existing counters are kept.
    pub fn replace_policies(&self, policies: GroupPolicies) {
        info!(groups = policies.len(), "group policies replaced");
        *self.policies.write() = policies;
    }

    /// Spawn the daily reset task.
    pub fn start_reset_scheduler(&self, schedule: ResetSchedule) -> ResetSchedulerHandle {
        ResetScheduler::start(Arc::clone(&self.quota), schedule)
    }

    /// Run a reset now, unless one is already running.
    pub async fn reset_now(&self) -> Result<ResetOutcome, EngineError> {
        self.quota.reset_all(Utc::now()).await
    }

    /// Wait until every queued effect has been applied.
    pub async fn flush_effects(&self) {
        self.dispatcher.flush().await;
    }

    /// Drain queued effects and stop the serial context.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        let snapshot = self.metrics.snapshot();
        info!(
            issued = snapshot.issued,
            lifted = snapshot.lifted,
            quota_exhausted = snapshot.quota_exhausted,
            refunded = snapshot.refunded,
            storage_errors = snapshot.storage_errors,
            resets = snapshot.resets,
            "warden stopped"
        );
    }

    async fn require_volunteer(&self, account: &AccountKey) -> Result<ActorQuota, EngineError> {
        self.fetch_actor("warden.lookup_volunteer", account)
            .await?
            .ok_or_else(|| EngineError::NotAVolunteer(account.to_string()))
    }

    async fn fetch_actor(
        &self,
        operation: &'static str,
        account: &AccountKey,
    ) -> Result<Option<ActorQuota>, EngineError> {
        let store = Arc::clone(&self.store);
        let key = *account;
        self.dispatcher
            .storage(operation, async move { store.get_actor(&key).await })
            .await
    }

    async fn save_actor(
        &self,
        operation: &'static str,
        actor: &ActorQuota,
    ) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        let actor = actor.clone();
        self.dispatcher
            .storage(operation, async move { store.upsert_actor(&actor).await })
            .await
    }

    async fn lock_target(
        &self,
        target: &AccountKey,
        kind: RestrictionKind,
    ) -> Result<Box<dyn KeyGuard>, EngineError> {
        self.lock
            .acquire(&lock_name(target, kind), self.lock_timeout)
            .await
            .map_err(|e| EngineError::storage("warden.lock_target", e))
    }

    fn render(&self, notice: NoticeKind, record: &PunishmentRecord) -> String {
        self.notices.render(notice, record).unwrap_or_else(|e| {
            warn!(error = %e, "notice rendering failed, using plain text");
            match notice {
                NoticeKind::Restricted(RestrictionKind::Ban) => "You have been banned.".to_owned(),
                NoticeKind::Restricted(RestrictionKind::Mute) => "You have been muted.".to_owned(),
                NoticeKind::Lifted(kind) => format!("Your {kind} has been lifted."),
            }
        })
    }

    /// Restrict a target.
    ///
    /// Order: validate, serialize on `(target, kind)`, refuse if already
    /// restricted, consume quota, write the record. A failed write refunds
    /// the quota before the error is returned.
    #[instrument(
        name = "warden.issue",
        skip_all,
        fields(target = %request.target, kind = %request.kind)
    )]
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueReceipt, EngineError> {
        if request.duration_seconds < 0 {
            return Err(EngineError::InvalidDuration(request.duration_seconds.to_string()));
        }
        let actor = self.require_volunteer(&request.issuer).await?;
        let kind = request.kind;

        let guard = self.lock_target(&request.target, kind).await?;

        if self.ledger.is_restricted(&request.target, kind).await? {
            return Err(EngineError::AlreadyRestricted {
                target: request.target,
                kind,
            });
        }

        let usage = match self.quota.check_and_consume(&actor.volunteer_id, kind).await? {
            ConsumeResult::Consumed { used, quota } => Usage { used, quota },
            ConsumeResult::QuotaExhausted { used, quota } => {
                return Err(EngineError::QuotaExhausted { kind, used, quota });
            }
            ConsumeResult::NotAVolunteer => {
                return Err(EngineError::NotAVolunteer(request.issuer.to_string()));
            }
        };

        let punishment = NewPunishment {
            target_key: request.target,
            issuer_volunteer_id: actor.volunteer_id.clone(),
            kind,
            duration_seconds: request.duration_seconds,
            reason: request.reason,
            // Whole milliseconds survive every backend.
            issued_at: Utc::now().trunc_subsecs(3),
        };
        let record = match self.ledger.issue(&punishment).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(refund_err) = self.quota.refund(&actor.volunteer_id, kind).await {
                    error!(
                        volunteer_id = %actor.volunteer_id,
                        error = %refund_err,
                        "refund after failed issuance also failed, one quota unit lost"
                    );
                }
                return Err(e);
            }
        };
        release_lock(guard).await;
        self.metrics.increment_issued();

        let message = self.render(NoticeKind::Restricted(kind), &record);
        let effect = if kind.blocks_access() {
            Effect::Disconnect {
                target: record.target_key,
                message,
            }
        } else {
            Effect::Message {
                target: record.target_key,
                message,
            }
        };
        self.dispatcher.dispatch(effect).await;

        Ok(IssueReceipt { record, usage })
    }

    /// Lift every enforced restriction of `kind` against `target`.
    ///
    /// The caller must be a volunteer. Lifting never gives quota back.
    /// Returns how many records were deactivated.
    #[instrument(name = "warden.lift", skip_all, fields(target = %target, kind = %kind))]
    pub async fn lift(
        &self,
        actor: &AccountKey,
        target: &AccountKey,
        kind: RestrictionKind,
    ) -> Result<u64, EngineError> {
        let volunteer = self.require_volunteer(actor).await?;

        let guard = self.lock_target(target, kind).await?;
        let governing = self.ledger.governing_at(target, kind, Utc::now()).await?;
        let lifted = self.ledger.lift(target, kind).await?;
        release_lock(guard).await;

        if lifted == 0 {
            return Ok(0);
        }
        self.metrics.add_lifted(lifted);
        info!(volunteer_id = %volunteer.volunteer_id, lifted, "restriction lifted");

        self.dispatcher
            .dispatch(Effect::RestrictionLifted {
                target: *target,
                kind,
            })
            .await;
        if let Some(record) = governing {
            let message = self.render(NoticeKind::Lifted(kind), &record);
            self.dispatcher
                .dispatch(Effect::Message {
                    target: *target,
                    message,
                })
                .await;
        }
        Ok(lifted)
    }

    /// The restriction that currently governs `target`.
    ///
    /// An access block outranks a communication block; within a kind the
    /// most recently issued record wins.
    pub async fn query_status(
        &self,
        target: &AccountKey,
    ) -> Result<Option<ActiveRestriction>, EngineError> {
        let now = Utc::now();
        let active = self.ledger.active_records_at(target, now).await?;
        let governing = active
            .iter()
            .find(|r| r.kind.blocks_access())
            .or_else(|| active.first())
            .cloned();
        Ok(governing.map(|record| ActiveRestriction {
            remaining_seconds: record.remaining_seconds(now),
            record,
        }))
    }

    /// Connection-time check for `target`.
    ///
    /// Queues a disconnect for an active access block, otherwise (when
    /// login notices are enabled) a reminder of an active communication
    /// block.
    #[instrument(name = "warden.on_connect", skip_all, fields(target = %target))]
    pub async fn on_connect(&self, target: &AccountKey) -> Result<ConnectDecision, EngineError> {
        let active = self.ledger.active_records(target).await?;

        if let Some(ban) = active.iter().find(|r| r.kind == RestrictionKind::Ban) {
            let message = self.render(NoticeKind::Restricted(RestrictionKind::Ban), ban);
            self.dispatcher
                .dispatch(Effect::Disconnect {
                    target: *target,
                    message,
                })
                .await;
            return Ok(ConnectDecision::Denied(ban.clone()));
        }

        let mute = active.iter().find(|r| r.kind == RestrictionKind::Mute);
        if let Some(mute) = mute.filter(|_| self.login_notices) {
            let message = self.render(NoticeKind::Restricted(RestrictionKind::Mute), mute);
            self.dispatcher
                .dispatch(Effect::Message {
                    target: *target,
                    message,
                })
                .await;
        }
        Ok(ConnectDecision::Admitted {
            muted: mute.is_some(),
        })
    }

    /// Whether `target` may not chat right now.
    pub async fn is_muted(&self, target: &AccountKey) -> Result<bool, EngineError> {
        self.ledger
            .is_restricted(target, RestrictionKind::Mute)
            .await
    }

    /// Make `target` a volunteer under `volunteer_id`, or give an existing
    /// volunteer a new id.
    ///
    /// `group` defaults to [`DEFAULT_GROUP`] for new volunteers; existing
    /// volunteers keep theirs unless one is given.
    #[instrument(name = "warden.assign_volunteer", skip_all, fields(target = %target, volunteer_id = %volunteer_id))]
    pub async fn assign_volunteer(
        &self,
        target: &AccountKey,
        volunteer_id: VolunteerId,
        group: Option<&str>,
    ) -> Result<ActorQuota, EngineError> {
        if let Some(group) = group {
            self.require_group(group)?;
        }

        let existing = self.fetch_actor("warden.assign_volunteer", target).await?;
        let created = existing.is_none();
        let actor = match existing {
            Some(mut actor) => {
                actor.volunteer_id = volunteer_id;
                if let Some(group) = group {
                    group.clone_into(&mut actor.group_name);
                }
                actor
            }
            None => {
                let group = group.unwrap_or(DEFAULT_GROUP);
                self.require_group(group)?;
                ActorQuota::new(*target, volunteer_id, group, Utc::now().trunc_subsecs(3))
            }
        };

        match self.save_actor("warden.assign_volunteer", &actor).await {
            Err(EngineError::Storage {
                source: StoreError::Constraint(_),
                ..
            }) => return Err(EngineError::VolunteerIdTaken(actor.volunteer_id)),
            other => other?,
        }

        info!(group = %actor.group_name, created, "volunteer assigned");
        if created {
            self.dispatcher
                .dispatch(Effect::VolunteerStatusChanged {
                    target: *target,
                    granted: true,
                })
                .await;
        }
        Ok(actor)
    }

    /// Remove `target`'s volunteer status. Returns `false` if it had none.
    #[instrument(name = "warden.revoke_volunteer", skip_all, fields(target = %target))]
    pub async fn revoke_volunteer(&self, target: &AccountKey) -> Result<bool, EngineError> {
        let store = Arc::clone(&self.store);
        let key = *target;
        let removed = self
            .dispatcher
            .storage("warden.revoke_volunteer", async move {
                store.delete_actor(&key).await
            })
            .await?;
        if removed {
            info!("volunteer revoked");
            self.dispatcher
                .dispatch(Effect::VolunteerStatusChanged {
                    target: *target,
                    granted: false,
                })
                .await;
        }
        Ok(removed)
    }

    /// Move the volunteer holding `volunteer_id` to `group`.
    #[instrument(name = "warden.reassign_group", skip_all, fields(volunteer_id = %volunteer_id, group = %group))]
    pub async fn reassign_group(
        &self,
        volunteer_id: &VolunteerId,
        group: &str,
    ) -> Result<ActorQuota, EngineError> {
        self.require_group(group)?;
        let store = Arc::clone(&self.store);
        let id = volunteer_id.clone();
        let mut actor = self
            .dispatcher
            .storage("warden.reassign_group", async move {
                store.find_actor_by_volunteer_id(&id).await
            })
            .await?
            .ok_or_else(|| EngineError::NotAVolunteer(volunteer_id.to_string()))?;

        group.clone_into(&mut actor.group_name);
        self.save_actor("warden.reassign_group", &actor).await?;
        info!("volunteer group changed");
        Ok(actor)
    }

    /// Every record against `target`, newest first.
    pub async fn history(&self, target: &AccountKey) -> Result<Vec<PunishmentRecord>, EngineError> {
        self.ledger.history(target).await
    }

    /// Quota view for the volunteer behind `actor`.
    pub async fn quota_snapshot(&self, actor: &AccountKey) -> Result<QuotaSnapshot, EngineError> {
        let actor = self.require_volunteer(actor).await?;
        Ok(self.quota.snapshot_of(&actor))
    }

    /// Resolve a player name or account key string to an account.
    pub async fn resolve_target(&self, name: &str) -> Result<AccountKey, EngineError> {
        if let Ok(key) = name.parse::<AccountKey>() {
            return Ok(key);
        }
        let Some(directory) = &self.directory else {
            return Err(EngineError::TargetNotFound(name.to_owned()));
        };
        directory
            .resolve(name)
            .await?
            .ok_or_else(|| EngineError::TargetNotFound(name.to_owned()))
    }

    fn require_group(&self, group: &str) -> Result<(), EngineError> {
        if self.policies.read().contains(group) {
            Ok(())
        } else {
            Err(EngineError::UnknownGroup(group.to_owned()))
        }
    }
}

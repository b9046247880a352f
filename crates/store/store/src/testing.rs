use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use warden_core::{
    AccountKey, ActorQuota, NewPunishment, PunishmentRecord, RestrictionKind, VolunteerId,
};

use crate::error::StoreError;
use crate::lock::KeyLock;
use crate::store::{ConsumeAttempt, LedgerStore, PunishmentFilter};

/// Current time truncated to whole milliseconds, the coarsest precision any
/// backend keeps.
fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_default()
}

fn test_actor(volunteer_id: &str) -> ActorQuota {
    ActorQuota::new(AccountKey::random(), volunteer_id, "default", now_ms())
}

fn test_punishment(
    target_key: AccountKey,
    kind: RestrictionKind,
    duration_seconds: i64,
    issued_at: DateTime<Utc>,
) -> NewPunishment {
    NewPunishment {
        target_key,
        issuer_volunteer_id: VolunteerId::from("conf-issuer"),
        kind,
        duration_seconds,
        reason: Some("conformance".into()),
        issued_at,
    }
}

/// Run the full ledger store conformance test suite.
///
/// Call this from your backend's test module with a fresh, migrated store.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn LedgerStore) -> Result<(), StoreError> {
    test_get_missing_actor(store).await?;
    test_actor_upsert_and_lookup(store).await?;
    test_volunteer_id_unique(store).await?;
    test_delete_actor(store).await?;
    test_try_consume(store).await?;
    test_try_consume_concurrent(store).await?;
    test_adjust_counter_floor(store).await?;
    test_reset_all_counters(store).await?;
    test_punishment_round_trip(store).await?;
    test_insert_reports_stored_timestamps(store).await?;
    test_punishment_ordering(store).await?;
    test_enforced_filter(store).await?;
    test_deactivate(store).await?;
    Ok(())
}

async fn test_get_missing_actor(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let missing = store.get_actor(&AccountKey::random()).await?;
    assert!(missing.is_none(), "get_actor on unknown key should return None");
    let missing = store
        .find_actor_by_volunteer_id(&VolunteerId::from("conf-nobody"))
        .await?;
    assert!(missing.is_none(), "unknown volunteer id should return None");
    Ok(())
}

async fn test_actor_upsert_and_lookup(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let mut actor = test_actor("conf-a1");
    store.upsert_actor(&actor).await?;

    let fetched = store.get_actor(&actor.actor_key).await?;
    assert_eq!(fetched.as_ref(), Some(&actor));
    let by_id = store.find_actor_by_volunteer_id(&actor.volunteer_id).await?;
    assert_eq!(by_id.as_ref(), Some(&actor));

    actor.group_name = "senior".into();
    actor.volunteer_id = VolunteerId::from("conf-a1-renamed");
    let mut stale = actor.clone();
    stale.daily_ban_used = 9;
    stale.last_reset = now_ms() - chrono::Duration::days(3);
    store.upsert_actor(&stale).await?;
    let fetched = store.get_actor(&actor.actor_key).await?;
    assert_eq!(
        fetched.as_ref(),
        Some(&actor),
        "update should change identity fields and leave counters alone"
    );
    assert!(
        store
            .find_actor_by_volunteer_id(&VolunteerId::from("conf-a1"))
            .await?
            .is_none(),
        "old volunteer id should no longer resolve"
    );

    let listed = store.list_actors().await?;
    assert!(listed.iter().any(|a| a == &actor));
    let ids: Vec<&str> = listed.iter().map(|a| a.volunteer_id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted, "list_actors should be ordered by volunteer id");
    Ok(())
}

async fn test_volunteer_id_unique(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let first = test_actor("conf-dup");
    store.upsert_actor(&first).await?;

    let second = test_actor("conf-dup");
    let result = store.upsert_actor(&second).await;
    assert!(
        matches!(result, Err(StoreError::Constraint(_))),
        "duplicate volunteer id should violate a constraint, got {result:?}"
    );
    assert!(store.get_actor(&second.actor_key).await?.is_none());

    let mut moved = first.clone();
    moved.volunteer_id = VolunteerId::from("conf-dup-moved");
    store.upsert_actor(&moved).await?;
    store.upsert_actor(&second).await?;
    let holder = store
        .find_actor_by_volunteer_id(&VolunteerId::from("conf-dup"))
        .await?;
    assert_eq!(holder.map(|a| a.actor_key), Some(second.actor_key));
    Ok(())
}

async fn test_delete_actor(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let actor = test_actor("conf-del");
    store.upsert_actor(&actor).await?;
    assert!(store.delete_actor(&actor.actor_key).await?, "delete should report an existing row");
    assert!(store.get_actor(&actor.actor_key).await?.is_none());
    assert!(
        store.find_actor_by_volunteer_id(&actor.volunteer_id).await?.is_none(),
        "deleted actor's volunteer id should be free"
    );
    assert!(!store.delete_actor(&actor.actor_key).await?, "second delete should report nothing");

    // The freed id is reusable by another account.
    store.upsert_actor(&test_actor("conf-del")).await?;
    Ok(())
}

async fn test_try_consume(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let actor = test_actor("conf-consume");
    store.upsert_actor(&actor).await?;
    let id = &actor.volunteer_id;

    let ban = RestrictionKind::Ban;
    assert_eq!(store.try_consume(id, ban, 2).await?, ConsumeAttempt::Consumed { used: 1 });
    assert_eq!(store.try_consume(id, ban, 2).await?, ConsumeAttempt::Consumed { used: 2 });
    assert_eq!(store.try_consume(id, ban, 2).await?, ConsumeAttempt::Exhausted { used: 2 });

    let mute = RestrictionKind::Mute;
    assert_eq!(
        store.try_consume(id, mute, 1).await?,
        ConsumeAttempt::Consumed { used: 1 },
        "counters are independent per kind"
    );
    assert_eq!(store.try_consume(id, mute, 0).await?, ConsumeAttempt::Exhausted { used: 1 });

    assert_eq!(
        store
            .try_consume(&VolunteerId::from("conf-ghost"), ban, 5)
            .await?,
        ConsumeAttempt::NoSuchActor
    );

    let stored = store.get_actor(&actor.actor_key).await?;
    assert_eq!(stored.map(|a| (a.daily_ban_used, a.daily_mute_used)), Some((2, 1)));
    Ok(())
}

async fn test_try_consume_concurrent(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let actor = test_actor("conf-race");
    store.upsert_actor(&actor).await?;

    let attempts = (0..10).map(|_| store.try_consume(&actor.volunteer_id, RestrictionKind::Ban, 3));
    let results = join_all(attempts).await;

    let mut consumed = 0;
    let mut exhausted = 0;
    for result in results {
        match result? {
            ConsumeAttempt::Consumed { .. } => consumed += 1,
            ConsumeAttempt::Exhausted { .. } => exhausted += 1,
            ConsumeAttempt::NoSuchActor => panic!("actor vanished mid-test"),
        }
    }
    assert_eq!(consumed, 3, "never more consumes than the limit");
    assert_eq!(exhausted, 7);
    Ok(())
}

async fn test_adjust_counter_floor(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let actor = test_actor("conf-adjust");
    store.upsert_actor(&actor).await?;
    let id = &actor.volunteer_id;

    assert_eq!(store.adjust_counter(id, RestrictionKind::Mute, -1).await?, Some(0));
    assert_eq!(store.adjust_counter(id, RestrictionKind::Mute, 3).await?, Some(3));
    assert_eq!(store.adjust_counter(id, RestrictionKind::Mute, -1).await?, Some(2));
    assert_eq!(store.adjust_counter(id, RestrictionKind::Mute, -10).await?, Some(0));
    assert_eq!(
        store
            .adjust_counter(&VolunteerId::from("conf-ghost"), RestrictionKind::Mute, 1)
            .await?,
        None
    );
    Ok(())
}

async fn test_reset_all_counters(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let busy = test_actor("conf-reset-busy");
    let idle = test_actor("conf-reset-idle");
    store.upsert_actor(&busy).await?;
    store.upsert_actor(&idle).await?;
    store.adjust_counter(&busy.volunteer_id, RestrictionKind::Ban, 4).await?;
    store.adjust_counter(&busy.volunteer_id, RestrictionKind::Mute, 2).await?;

    let at = now_ms() + chrono::Duration::minutes(5);
    let touched = store.reset_all_counters(at).await?;
    assert!(touched >= 2, "reset should touch every actor, touched {touched}");

    for key in [busy.actor_key, idle.actor_key] {
        let actor = store.get_actor(&key).await?;
        let actor = actor.ok_or_else(|| StoreError::Backend("actor missing after reset".into()))?;
        assert_eq!(actor.daily_ban_used, 0);
        assert_eq!(actor.daily_mute_used, 0);
        assert_eq!(actor.last_reset, at);
    }
    Ok(())
}

async fn test_punishment_round_trip(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let target = AccountKey::random();
    let new = test_punishment(target, RestrictionKind::Ban, 3600, now_ms());
    let record = store.insert_punishment(&new).await?;
    assert_eq!(record, PunishmentRecord::assign(record.id, &new));

    let history = store.list_punishments(&PunishmentFilter::history(target)).await?;
    assert_eq!(history, vec![record.clone()]);

    let permanent = test_punishment(target, RestrictionKind::Mute, 0, now_ms());
    let permanent = store.insert_punishment(&permanent).await?;
    assert!(permanent.expires_at.is_none());
    assert!(permanent.id > record.id, "ids should be monotonic");
    Ok(())
}

async fn test_insert_reports_stored_timestamps(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let target = AccountKey::random();
    let issued_at = now_ms() + chrono::Duration::nanoseconds(987_654);
    let new = test_punishment(target, RestrictionKind::Ban, 600, issued_at);
    let record = store.insert_punishment(&new).await?;

    let history = store.list_punishments(&PunishmentFilter::history(target)).await?;
    assert_eq!(history, vec![record.clone()], "insert should return what a read sees");
    assert!(record.issued_at <= issued_at);
    assert!(issued_at - record.issued_at < chrono::Duration::milliseconds(1));
    assert_eq!(
        record.expires_at,
        Some(record.issued_at + chrono::Duration::seconds(600))
    );

    let raw = test_punishment(target, RestrictionKind::Mute, 60, Utc::now());
    let record = store.insert_punishment(&raw).await?;
    let mutes = store
        .list_punishments(&PunishmentFilter::history(target).with_kind(RestrictionKind::Mute))
        .await?;
    assert_eq!(mutes, vec![record]);
    Ok(())
}

async fn test_punishment_ordering(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let target = AccountKey::random();
    let base = now_ms();
    let oldest = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Ban, 0, base - chrono::Duration::hours(2)))
        .await?;
    let newest = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Mute, 0, base))
        .await?;
    let middle = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Ban, 0, base - chrono::Duration::hours(1)))
        .await?;
    let tied = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Mute, 0, base))
        .await?;

    let ids: Vec<i64> = store
        .list_punishments(&PunishmentFilter::history(target))
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![tied.id, newest.id, middle.id, oldest.id]);

    let bans: Vec<i64> = store
        .list_punishments(&PunishmentFilter::history(target).with_kind(RestrictionKind::Ban))
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(bans, vec![middle.id, oldest.id]);
    Ok(())
}

async fn test_enforced_filter(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let target = AccountKey::random();
    let issued = now_ms() - chrono::Duration::minutes(10);
    let expired = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Mute, 60, issued))
        .await?;
    let running = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Mute, 3600, issued))
        .await?;

    let now = now_ms();
    let enforced = store
        .list_punishments(&PunishmentFilter::enforced(target, now))
        .await?;
    assert_eq!(enforced, vec![running.clone()]);

    // Evaluated against the supplied instant, not wall-clock time.
    let back_then = issued + chrono::Duration::seconds(30);
    let enforced = store
        .list_punishments(&PunishmentFilter::enforced(target, back_then))
        .await?;
    assert_eq!(enforced.len(), 2);
    assert!(enforced.contains(&expired));
    Ok(())
}

async fn test_deactivate(store: &dyn LedgerStore) -> Result<(), StoreError> {
    let target = AccountKey::random();
    let now = now_ms();
    store
        .insert_punishment(&test_punishment(target, RestrictionKind::Ban, 0, now))
        .await?;
    store
        .insert_punishment(&test_punishment(target, RestrictionKind::Ban, 3600, now))
        .await?;
    let mute = store
        .insert_punishment(&test_punishment(target, RestrictionKind::Mute, 0, now))
        .await?;

    let lifted = store
        .deactivate_punishments(&target, RestrictionKind::Ban, now)
        .await?;
    assert_eq!(lifted, 2);

    let enforced = store
        .list_punishments(&PunishmentFilter::enforced(target, now))
        .await?;
    assert_eq!(enforced, vec![mute], "lifting bans must leave the mute alone");

    let again = store
        .deactivate_punishments(&target, RestrictionKind::Ban, now)
        .await?;
    assert_eq!(again, 0, "lifting nothing is not an error");

    let history = store.list_punishments(&PunishmentFilter::history(target)).await?;
    assert_eq!(history.len(), 3, "lifted records are kept");
    assert_eq!(history.iter().filter(|r| !r.active).count(), 2);
    Ok(())
}

/// Run the key lock conformance test suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_lock_conformance_tests(lock: &dyn KeyLock) -> Result<(), StoreError> {
    test_try_acquire_and_release(lock).await?;
    test_try_acquire_contention(lock).await?;
    test_drop_releases(lock).await?;
    test_acquire_timeout(lock).await?;
    Ok(())
}

async fn test_try_acquire_and_release(lock: &dyn KeyLock) -> Result<(), StoreError> {
    let guard = lock
        .try_acquire("conf-lock-1")
        .await?
        .ok_or_else(|| StoreError::Lock("should acquire free lock".into()))?;
    assert_eq!(guard.name(), "conf-lock-1");
    assert!(guard.is_held().await?);
    guard.release().await?;

    let again = lock.try_acquire("conf-lock-1").await?;
    assert!(again.is_some(), "lock should be free after release");
    Ok(())
}

async fn test_try_acquire_contention(lock: &dyn KeyLock) -> Result<(), StoreError> {
    let _held = lock
        .try_acquire("conf-lock-2")
        .await?
        .ok_or_else(|| StoreError::Lock("should acquire free lock".into()))?;
    assert!(
        lock.try_acquire("conf-lock-2").await?.is_none(),
        "second acquire of a held lock should fail"
    );
    assert!(
        lock.try_acquire("conf-lock-3").await?.is_some(),
        "unrelated names must not contend"
    );
    Ok(())
}

async fn test_drop_releases(lock: &dyn KeyLock) -> Result<(), StoreError> {
    {
        let _guard = lock.acquire("conf-lock-4", Duration::from_secs(1)).await?;
    }
    assert!(lock.try_acquire("conf-lock-4").await?.is_some(), "drop should release");
    Ok(())
}

async fn test_acquire_timeout(lock: &dyn KeyLock) -> Result<(), StoreError> {
    let _held = lock.acquire("conf-lock-5", Duration::from_secs(1)).await?;
    let result = lock.acquire("conf-lock-5", Duration::from_millis(50)).await;
    assert!(
        matches!(result, Err(StoreError::Timeout(_))),
        "acquire on a held lock should time out"
    );
    Ok(())
}

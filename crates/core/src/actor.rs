use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::RestrictionKind;
use crate::types::{AccountKey, VolunteerId};

/// Quota state for one volunteer.
///
/// Values handed out by a store are detached copies: mutating one does not
/// touch storage until it is passed back to an explicit save call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorQuota {
    /// Account behind this volunteer. Unique.
    pub actor_key: AccountKey,
    /// Human-assigned handle. Unique, may be reassigned.
    pub volunteer_id: VolunteerId,
    /// Name of the group whose policy governs this actor's quotas.
    pub group_name: String,
    /// Bans issued since `last_reset`.
    pub daily_ban_used: u32,
    /// Mutes issued since `last_reset`.
    pub daily_mute_used: u32,
    /// When the counters were last zeroed.
    pub last_reset: DateTime<Utc>,
}

impl ActorQuota {
    /// A fresh actor with zeroed counters.
    #[must_use]
    pub fn new(
        actor_key: AccountKey,
        volunteer_id: impl Into<VolunteerId>,
        group_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_key,
            volunteer_id: volunteer_id.into(),
            group_name: group_name.into(),
            daily_ban_used: 0,
            daily_mute_used: 0,
            last_reset: now,
        }
    }

    /// Counter for the given kind.
    #[must_use]
    pub fn used(&self, kind: RestrictionKind) -> u32 {
        match kind {
            RestrictionKind::Ban => self.daily_ban_used,
            RestrictionKind::Mute => self.daily_mute_used,
        }
    }

    /// Mutable counter for the given kind.
    pub fn used_mut(&mut self, kind: RestrictionKind) -> &mut u32 {
        match kind {
            RestrictionKind::Ban => &mut self.daily_ban_used,
            RestrictionKind::Mute => &mut self.daily_mute_used,
        }
    }

    /// Apply `delta` to the counter for `kind`, flooring at zero.
    pub fn adjust(&mut self, kind: RestrictionKind, delta: i32) {
        let counter = self.used_mut(kind);
        *counter = counter.saturating_add_signed(delta);
    }

    /// Zero every counter and stamp `last_reset`.
    pub fn reset(&mut self, at: DateTime<Utc>) {
        for kind in RestrictionKind::ALL {
            *self.used_mut(kind) = 0;
        }
        self.last_reset = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ActorQuota {
        ActorQuota::new(AccountKey::random(), "01", "default", Utc::now())
    }

    #[test]
    fn counters_are_per_kind() {
        let mut a = actor();
        a.adjust(RestrictionKind::Ban, 2);
        a.adjust(RestrictionKind::Mute, 1);
        assert_eq!(a.used(RestrictionKind::Ban), 2);
        assert_eq!(a.used(RestrictionKind::Mute), 1);
    }

    #[test]
    fn adjust_floors_at_zero() {
        let mut a = actor();
        a.adjust(RestrictionKind::Ban, -1);
        assert_eq!(a.daily_ban_used, 0);
        a.adjust(RestrictionKind::Ban, 3);
        a.adjust(RestrictionKind::Ban, -5);
        assert_eq!(a.daily_ban_used, 0);
    }

    #[test]
    fn reset_zeroes_and_stamps() {
        let mut a = actor();
        a.adjust(RestrictionKind::Ban, 4);
        a.adjust(RestrictionKind::Mute, 4);
        let at = Utc::now() + chrono::Duration::hours(1);
        a.reset(at);
        assert_eq!(a.daily_ban_used, 0);
        assert_eq!(a.daily_mute_used, 0);
        assert_eq!(a.last_reset, at);
    }
}

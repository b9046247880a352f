use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::RestrictionKind;
use crate::types::{AccountKey, VolunteerId};

/// A restriction about to be written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPunishment {
    /// Account being restricted.
    pub target_key: AccountKey,
    /// Handle of the volunteer issuing it, copied verbatim for history.
    pub issuer_volunteer_id: VolunteerId,
    /// What is being restricted.
    pub kind: RestrictionKind,
    /// Length in seconds; `0` means permanent.
    pub duration_seconds: i64,
    /// Optional free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
}

impl NewPunishment {
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.duration_seconds == 0
    }

    /// `issued_at + duration`, or `None` for a permanent restriction.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.duration_seconds > 0 {
            Some(self.issued_at + Duration::seconds(self.duration_seconds))
        } else {
            None
        }
    }
}

/// A restriction as persisted in the ledger.
///
/// Immutable after creation except for `active`, which is cleared by an
/// explicit lift. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    /// Storage-assigned, monotonic.
    pub id: i64,
    pub target_key: AccountKey,
    /// Not a foreign key: the volunteer may since have been renamed or removed.
    pub issuer_volunteer_id: VolunteerId,
    pub kind: RestrictionKind,
    pub duration_seconds: i64,
    #[serde(default)]
    pub reason: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// `None` for permanent restrictions.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl PunishmentRecord {
    /// Materialize a new record under the id assigned by storage.
    #[must_use]
    pub fn assign(id: i64, new: &NewPunishment) -> Self {
        Self {
            id,
            target_key: new.target_key,
            issuer_volunteer_id: new.issuer_volunteer_id.clone(),
            kind: new.kind,
            duration_seconds: new.duration_seconds,
            reason: new.reason.clone(),
            issued_at: new.issued_at,
            expires_at: new.expires_at(),
            active: true,
        }
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Whether the record is still enforced at `now`: not lifted and either
    /// permanent or expiring strictly after `now`.
    #[must_use]
    pub fn is_enforced_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|at| at > now)
    }

    /// Seconds until expiry, `None` when permanent, `Some(0)` once past.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|at| (at - now).num_seconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_punishment(duration_seconds: i64) -> NewPunishment {
        NewPunishment {
            target_key: AccountKey::random(),
            issuer_volunteer_id: VolunteerId::from("01"),
            kind: RestrictionKind::Ban,
            duration_seconds,
            reason: Some("griefing".into()),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn finite_duration_sets_expiry() {
        let new = new_punishment(3600);
        let record = PunishmentRecord::assign(7, &new);
        assert_eq!(record.id, 7);
        assert_eq!(record.expires_at, Some(new.issued_at + Duration::seconds(3600)));
        assert!(record.active);
        assert!(!record.is_permanent());
    }

    #[test]
    fn zero_duration_is_permanent() {
        let new = new_punishment(0);
        assert!(new.is_permanent());
        let record = PunishmentRecord::assign(1, &new);
        assert!(record.expires_at.is_none());
        assert!(record.is_enforced_at(new.issued_at + Duration::days(10_000)));
    }

    #[test]
    fn enforcement_ends_at_expiry() {
        let new = new_punishment(60);
        let record = PunishmentRecord::assign(1, &new);
        assert!(record.is_enforced_at(new.issued_at + Duration::seconds(59)));
        assert!(!record.is_enforced_at(new.issued_at + Duration::seconds(60)));
        assert_eq!(record.remaining_seconds(new.issued_at + Duration::seconds(90)), Some(0));
    }

    #[test]
    fn lifted_record_is_not_enforced() {
        let mut record = PunishmentRecord::assign(1, &new_punishment(0));
        record.active = false;
        assert!(!record.is_enforced_at(Utc::now()));
    }
}

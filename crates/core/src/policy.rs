use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kind::RestrictionKind;

/// Group assigned to a newly created volunteer when none is given.
pub const DEFAULT_GROUP: &str = "default";

/// Daily bans granted to the built-in group.
pub const DEFAULT_BAN_QUOTA: u32 = 3;

/// Daily mutes granted to the built-in group.
pub const DEFAULT_MUTE_QUOTA: u32 = 5;

/// Suggested durations (seconds) offered when a group defines none.
pub const DEFAULT_DURATIONS: [i64; 6] = [60, 300, 600, 3_600, 86_400, 604_800];

/// Per-group daily limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Bans each member may issue per reset period.
    #[serde(default)]
    pub ban_quota: u32,
    /// Mutes each member may issue per reset period.
    #[serde(default)]
    pub mute_quota: u32,
    /// Suggested ban durations in seconds.
    #[serde(default)]
    pub ban_durations: Vec<i64>,
    /// Suggested mute durations in seconds.
    #[serde(default)]
    pub mute_durations: Vec<i64>,
}

impl GroupPolicy {
    #[must_use]
    pub fn with_quotas(ban_quota: u32, mute_quota: u32) -> Self {
        Self {
            ban_quota,
            mute_quota,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn quota(&self, kind: RestrictionKind) -> u32 {
        match kind {
            RestrictionKind::Ban => self.ban_quota,
            RestrictionKind::Mute => self.mute_quota,
        }
    }

    /// Suggested durations for `kind`, falling back to [`DEFAULT_DURATIONS`].
    #[must_use]
    pub fn durations(&self, kind: RestrictionKind) -> &[i64] {
        let configured = match kind {
            RestrictionKind::Ban => &self.ban_durations,
            RestrictionKind::Mute => &self.mute_durations,
        };
        if configured.is_empty() {
            &DEFAULT_DURATIONS
        } else {
            configured
        }
    }
}

/// The group policy table, keyed by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupPolicies(BTreeMap<String, GroupPolicy>);

impl GroupPolicies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding only [`DEFAULT_GROUP`] with the default quotas.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with_group(
            DEFAULT_GROUP,
            GroupPolicy::with_quotas(DEFAULT_BAN_QUOTA, DEFAULT_MUTE_QUOTA),
        )
    }

    #[must_use]
    pub fn with_group(mut self, name: impl Into<String>, policy: GroupPolicy) -> Self {
        self.insert(name, policy);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, policy: GroupPolicy) {
        self.0.insert(name.into(), policy);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GroupPolicy> {
        self.0.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Quota granted to members of `group`. Unknown groups get nothing.
    #[must_use]
    pub fn quota(&self, group: &str, kind: RestrictionKind) -> u32 {
        self.get(group).map_or(0, |p| p.quota(kind))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, GroupPolicy)> for GroupPolicies {
    fn from_iter<I: IntoIterator<Item = (String, GroupPolicy)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_group_has_zero_quota() {
        let policies = GroupPolicies::new().with_group("default", GroupPolicy::with_quotas(3, 5));
        assert_eq!(policies.quota("default", RestrictionKind::Ban), 3);
        assert_eq!(policies.quota("default", RestrictionKind::Mute), 5);
        assert_eq!(policies.quota("senior", RestrictionKind::Ban), 0);
    }

    #[test]
    fn builtin_table_grants_default_quotas() {
        let policies = GroupPolicies::builtin();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies.quota(DEFAULT_GROUP, RestrictionKind::Ban), 3);
        assert_eq!(policies.quota(DEFAULT_GROUP, RestrictionKind::Mute), 5);
    }

    #[test]
    fn durations_fall_back_to_defaults() {
        let policy = GroupPolicy {
            ban_durations: vec![600, 1_800],
            ..GroupPolicy::default()
        };
        assert_eq!(policy.durations(RestrictionKind::Ban), &[600, 1_800]);
        assert_eq!(policy.durations(RestrictionKind::Mute), &DEFAULT_DURATIONS);
    }

    #[test]
    fn deserializes_from_json_table() {
        let policies: GroupPolicies = serde_json::from_str(
            r#"{"default": {"ban_quota": 2, "mute_quota": 4}, "senior": {"ban_quota": 10}}"#,
        )
        .unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies.quota("senior", RestrictionKind::Mute), 0);
        assert_eq!(policies.names().collect::<Vec<_>>(), vec!["default", "senior"]);
    }
}

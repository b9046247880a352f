use std::time::Duration;

use warden_core::{DEFAULT_GROUP, RestrictionKind};

use super::*;

#[test]
fn empty_document_yields_defaults() {
    let config = WardenConfig::parse("").unwrap();
    assert_eq!(config.store.backend, "memory");
    assert!(config.reset.enabled);
    assert_eq!(config.reset.timezone, "UTC");
    assert!(config.notifications.login_enabled);
    assert_eq!(config.groups.quota(DEFAULT_GROUP, RestrictionKind::Ban), 3);
    assert_eq!(config.groups.quota(DEFAULT_GROUP, RestrictionKind::Mute), 5);
}

#[test]
fn full_document() {
    let toml = r#"
        [store]
        backend = "sqlite"
        url = "sqlite://punish.db"
        pool_size = 2
        timeout_ms = 2500

        [dispatcher]
        max_concurrent = 4
        storage_timeout_ms = 750

        [reset]
        timezone = "Asia/Shanghai"

        [notifications]
        login_enabled = false

        [notifications.templates]
        ban = "Banned by #{{ volunteer_id }} for {{ duration }}"

        [groups.default]
        ban_quota = 1
        mute_quota = 2

        [groups.senior]
        ban_quota = 10
        mute_quota = 20
        ban_durations = [3600, 86400]
    "#;

    let config = WardenConfig::parse(toml).unwrap();
    assert_eq!(config.store.backend, "sqlite");
    assert_eq!(config.store.url.as_deref(), Some("sqlite://punish.db"));
    assert_eq!(config.store.pool_size, Some(2));
    assert_eq!(config.store.timeout_ms, Some(2500));

    let dispatcher = config.dispatcher.to_engine_config();
    assert_eq!(dispatcher.max_concurrent, 4);
    assert_eq!(dispatcher.storage_timeout, Duration::from_millis(750));

    assert!(config.reset.enabled);
    assert_eq!(config.reset.timezone, "Asia/Shanghai");
    assert!(!config.notifications.login_enabled);
    assert!(config.notifications.templates.contains_key("ban"));

    assert_eq!(config.groups.len(), 2);
    let senior = config.groups.get("senior").unwrap();
    assert_eq!(senior.durations(RestrictionKind::Ban), &[3600, 86400]);
    assert_eq!(config.groups.quota("default", RestrictionKind::Mute), 2);
}

#[test]
fn explicit_groups_replace_builtin_default() {
    let config = WardenConfig::parse("[groups.helpers]\nban_quota = 1\n").unwrap();
    assert!(!config.groups.contains(DEFAULT_GROUP));
    assert_eq!(config.groups.quota("helpers", RestrictionKind::Ban), 1);
}

#[test]
fn unset_dispatcher_keeps_engine_defaults() {
    let config = WardenConfig::parse("").unwrap();
    let dispatcher = config.dispatcher.to_engine_config();
    assert_eq!(dispatcher.max_concurrent, 16);
    assert_eq!(dispatcher.storage_timeout, Duration::from_secs(5));
}

#[test]
fn malformed_document_is_a_config_error() {
    let err = WardenConfig::parse("[store\nbackend = 1").unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = WardenConfig::load(Path::new("/nonexistent/warden.toml")).unwrap();
    assert_eq!(config.store.backend, "memory");
}

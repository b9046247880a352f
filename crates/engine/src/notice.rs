//! Notice text for restrictions, rendered with `MiniJinja`.
//!
//! Templates are keyed by [`NoticeKind`]; each template sees the variables
//! `volunteer_id`, `kind`, `duration`, `reason` and `expires_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_core::{PunishmentRecord, RestrictionKind, format_duration};

use crate::error::EngineError;

/// Fuel limit for `MiniJinja` template evaluation.
const FUEL_LIMIT: u64 = 10_000;

/// Shown when a record has no reason.
pub const DEFAULT_REASON: &str = "unspecified";

const EXPIRES_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which notice to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoticeKind {
    /// Sent when a restriction takes effect, and on connect while it holds.
    Restricted(RestrictionKind),
    /// Sent when a restriction is lifted.
    Lifted(RestrictionKind),
}

impl NoticeKind {
    fn name(self) -> String {
        match self {
            Self::Restricted(kind) => kind.label().to_owned(),
            Self::Lifted(kind) => format!("lifted_{}", kind.label()),
        }
    }

    fn default_template(self) -> &'static str {
        match self {
            Self::Restricted(RestrictionKind::Ban) => {
                "You have been banned.\nReason: {{ reason }}\nDuration: {{ duration }}\nIssued by: {{ volunteer_id }}"
            }
            Self::Restricted(RestrictionKind::Mute) => {
                "You have been muted.\nReason: {{ reason }}\nDuration: {{ duration }}\nExpires: {{ expires_at }}"
            }
            Self::Lifted(RestrictionKind::Ban) => "Your ban has been lifted.",
            Self::Lifted(RestrictionKind::Mute) => "Your mute has been lifted.",
        }
    }

    fn all() -> impl Iterator<Item = Self> {
        RestrictionKind::ALL
            .into_iter()
            .flat_map(|k| [Self::Restricted(k), Self::Lifted(k)])
    }
}

#[derive(Debug, Serialize)]
struct NoticeContext<'a> {
    volunteer_id: &'a str,
    kind: &'a str,
    duration: String,
    reason: &'a str,
    expires_at: String,
}

impl<'a> NoticeContext<'a> {
    fn from_record(record: &'a PunishmentRecord) -> Self {
        Self {
            volunteer_id: record.issuer_volunteer_id.as_str(),
            kind: record.kind.label(),
            duration: format_duration(record.duration_seconds),
            reason: record.reason.as_deref().unwrap_or(DEFAULT_REASON),
            expires_at: format_expiry(record.expires_at),
        }
    }
}

fn format_expiry(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_owned(), |at| at.format(EXPIRES_AT_FORMAT).to_string())
}

/// The `NoticeKind -> template` table.
#[derive(Debug, Clone)]
pub struct NoticeTemplates {
    env: minijinja::Environment<'static>,
}

impl Default for NoticeTemplates {
    fn default() -> Self {
        let mut env = minijinja::Environment::new();
        env.set_fuel(Some(FUEL_LIMIT));
        Self { env }
    }
}

impl NoticeTemplates {
    /// Built-in templates for every notice.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if a built-in template does
    /// not parse.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_overrides(&BTreeMap::new())
    }

    /// Built-in templates with some replaced by `overrides`, keyed by
    /// `ban`, `mute`, `lifted_ban` or `lifted_mute`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for an unknown key or a
    /// template that fails to parse.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, EngineError> {
        let mut templates = Self::default();
        for notice in NoticeKind::all() {
            let source = overrides
                .get(&notice.name())
                .cloned()
                .unwrap_or_else(|| notice.default_template().to_owned());
            templates.set(notice, source)?;
        }
        if let Some(unknown) = overrides
            .keys()
            .find(|key| !NoticeKind::all().any(|n| n.name() == **key))
        {
            return Err(EngineError::Configuration(format!(
                "unknown notice template '{unknown}'"
            )));
        }
        Ok(templates)
    }

    /// Replace the template for one notice.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the template fails to parse.
    pub fn set(&mut self, notice: NoticeKind, source: String) -> Result<(), EngineError> {
        let name = notice.name();
        self.env.add_template_owned(name.clone(), source).map_err(|e| {
            EngineError::Configuration(format!("syntax error in notice template '{name}': {e}"))
        })
    }

    /// Render `notice` for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if rendering fails.
    pub fn render(&self, notice: NoticeKind, record: &PunishmentRecord) -> Result<String, EngineError> {
        let name = notice.name();
        let template = self.env.get_template(&name).map_err(|e| {
            EngineError::Configuration(format!("failed to load notice template '{name}': {e}"))
        })?;
        template
            .render(NoticeContext::from_record(record))
            .map_err(|e| {
                EngineError::Configuration(format!("error rendering notice template '{name}': {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use warden_core::{AccountKey, NewPunishment, VolunteerId};

    use super::*;

    fn record(kind: RestrictionKind, duration_seconds: i64, reason: Option<&str>) -> PunishmentRecord {
        PunishmentRecord::assign(
            1,
            &NewPunishment {
                target_key: AccountKey::random(),
                issuer_volunteer_id: VolunteerId::from("07"),
                kind,
                duration_seconds,
                reason: reason.map(str::to_owned),
                issued_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            },
        )
    }

    #[test]
    fn default_ban_notice() {
        let templates = NoticeTemplates::new().unwrap();
        let text = templates
            .render(
                NoticeKind::Restricted(RestrictionKind::Ban),
                &record(RestrictionKind::Ban, 0, Some("griefing")),
            )
            .unwrap();
        assert_eq!(
            text,
            "You have been banned.\nReason: griefing\nDuration: permanent\nIssued by: 07"
        );
    }

    #[test]
    fn mute_notice_shows_expiry_and_default_reason() {
        let templates = NoticeTemplates::new().unwrap();
        let text = templates
            .render(
                NoticeKind::Restricted(RestrictionKind::Mute),
                &record(RestrictionKind::Mute, 3_600, None),
            )
            .unwrap();
        assert!(text.contains("Reason: unspecified"));
        assert!(text.contains("Duration: 1h"));
        assert!(text.contains("Expires: 2025-03-01 13:00:00"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = BTreeMap::from([(
            "lifted_mute".to_owned(),
            "{{ kind }} lifted (was {{ duration }})".to_owned(),
        )]);
        let templates = NoticeTemplates::with_overrides(&overrides).unwrap();
        let text = templates
            .render(
                NoticeKind::Lifted(RestrictionKind::Mute),
                &record(RestrictionKind::Mute, 300, None),
            )
            .unwrap();
        assert_eq!(text, "mute lifted (was 5m)");

        let untouched = templates
            .render(
                NoticeKind::Lifted(RestrictionKind::Ban),
                &record(RestrictionKind::Ban, 300, None),
            )
            .unwrap();
        assert_eq!(untouched, "Your ban has been lifted.");
    }

    #[test]
    fn unknown_override_key_is_rejected() {
        let overrides = BTreeMap::from([("kick".to_owned(), "bye".to_owned())]);
        assert!(matches!(
            NoticeTemplates::with_overrides(&overrides),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn broken_template_is_rejected() {
        let overrides = BTreeMap::from([("ban".to_owned(), "{{ reason".to_owned())]);
        assert!(matches!(
            NoticeTemplates::with_overrides(&overrides),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn runaway_template_runs_out_of_fuel() {
        let mut templates = NoticeTemplates::new().unwrap();
        templates
            .set(
                NoticeKind::Restricted(RestrictionKind::Ban),
                "{% for i in range(100000) %}{{ i }}{% endfor %}".to_owned(),
            )
            .unwrap();
        let result = templates.render(
            NoticeKind::Restricted(RestrictionKind::Ban),
            &record(RestrictionKind::Ban, 0, None),
        );
        assert!(result.is_err());
    }
}

use tracing::info;
use warden_core::{AccountKey, RestrictionKind};
use warden_engine::SessionHooks;

/// [`SessionHooks`] for a headless process: every effect becomes a log line.
///
/// A game-server integration replaces this with hooks that talk to live
/// sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl SessionHooks for LoggingHooks {
    fn disconnect(&self, target: AccountKey, message: &str) {
        info!(target = %target, message, "disconnect");
    }

    fn send_message(&self, target: AccountKey, message: &str) {
        info!(target = %target, message, "message");
    }

    fn on_restriction_lifted(&self, target: AccountKey, kind: RestrictionKind) {
        info!(target = %target, kind = %kind, "restriction lifted");
    }

    fn on_volunteer_status_changed(&self, target: AccountKey, granted: bool) {
        info!(target = %target, granted, "volunteer status changed");
    }
}

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use warden_core::GroupPolicies;
use warden_store::{KeyLock, LedgerStore};
use warden_store_memory::MemoryKeyLock;

use crate::directory::AccountDirectory;
use crate::dispatcher::{Dispatcher, DispatcherConfig, NoopHooks, SessionHooks};
use crate::error::EngineError;
use crate::ledger::PunishmentLedger;
use crate::metrics::WardenMetrics;
use crate::notice::NoticeTemplates;
use crate::quota::QuotaEnforcer;
use crate::warden::Warden;

/// Default wait for the per-target restriction lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Fluent builder for constructing a [`Warden`] instance.
///
/// Only a [`LedgerStore`] is required. The lock defaults to an in-process
/// [`MemoryKeyLock`], hooks to [`NoopHooks`], and the policy table to
/// [`GroupPolicies::builtin`].
pub struct WardenBuilder {
    store: Option<Arc<dyn LedgerStore>>,
    lock: Option<Arc<dyn KeyLock>>,
    hooks: Option<Arc<dyn SessionHooks>>,
    policies: Option<GroupPolicies>,
    dispatcher_config: DispatcherConfig,
    notices: Option<NoticeTemplates>,
    directory: Option<Arc<dyn AccountDirectory>>,
    login_notices: bool,
    lock_timeout: Duration,
}

impl WardenBuilder {
    /// Create a new builder with all optional fields set to their defaults.
    pub fn new() -> Self {
        Self {
            store: None,
            lock: None,
            hooks: None,
            policies: None,
            dispatcher_config: DispatcherConfig::default(),
            notices: None,
            directory: None,
            login_notices: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set the ledger store implementation.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the lock used to serialize restrictions per target and kind.
    #[must_use]
    pub fn lock(mut self, lock: Arc<dyn KeyLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Set the receiver of session effects.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Set the group policy table.
    #[must_use]
    pub fn policies(mut self, policies: GroupPolicies) -> Self {
        self.policies = Some(policies);
        self
    }

    #[must_use]
    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    /// Set the notice templates. Defaults to the built-in English text.
    #[must_use]
    pub fn notices(mut self, notices: NoticeTemplates) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Set the name resolver used by [`Warden::resolve_target`].
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Whether muted accounts are reminded of their mute on connect.
    #[must_use]
    pub fn login_notices(mut self, enabled: bool) -> Self {
        self.login_notices = enabled;
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Consume the builder and produce a [`Warden`].
    ///
    /// Spawns the serial context, so it must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if no store was set or the
    /// default notice templates fail to compile.
    pub fn build(self) -> Result<Warden, EngineError> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Configuration("ledger store is required".into()))?;

        let lock = self
            .lock
            .unwrap_or_else(|| Arc::new(MemoryKeyLock::new()));
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(NoopHooks));
        let notices = match self.notices {
            Some(notices) => notices,
            None => NoticeTemplates::new()?,
        };
        let policies = self.policies.unwrap_or_else(GroupPolicies::builtin);
        let policies = Arc::new(RwLock::new(policies));

        let metrics = Arc::new(WardenMetrics::default());
        let dispatcher = Arc::new(Dispatcher::start(
            self.dispatcher_config,
            hooks,
            Arc::clone(&metrics),
        ));
        let ledger = PunishmentLedger::new(Arc::clone(&store), Arc::clone(&dispatcher));
        let quota = Arc::new(QuotaEnforcer::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&policies),
            Arc::clone(&metrics),
        ));

        Ok(Warden {
            store,
            lock,
            dispatcher,
            ledger,
            quota,
            policies,
            notices,
            directory: self.directory,
            metrics,
            login_notices: self.login_notices,
            lock_timeout: self.lock_timeout,
        })
    }
}

impl Default for WardenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

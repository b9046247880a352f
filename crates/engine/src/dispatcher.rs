//! The two execution contexts the engine runs on.
//!
//! Storage calls run on the worker pool: each call is spawned as its own tokio
//! task, bounded by a semaphore and a per-call timeout. Anything with an observable effect
//! on a live session is turned into an [`Effect`] and queued to the serial
//! context, a single task that hands effects to [`SessionHooks`] one at a
//! time, in the order they were queued.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warden_core::{AccountKey, RestrictionKind};
use warden_store::StoreError;

use crate::error::EngineError;
use crate::metrics::WardenMetrics;

/// Configuration for the [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum storage calls in flight at once.
    pub max_concurrent: usize,
    /// Upper bound on a single storage call.
    pub storage_timeout: Duration,
    /// Capacity of the serial context's queue.
    pub effect_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            storage_timeout: Duration::from_secs(5),
            effect_buffer: 1024,
        }
    }
}

/// A session-visible side effect, replayed on the serial context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Close the target's session with `message`.
    Disconnect { target: AccountKey, message: String },
    /// Deliver `message` to the target if connected.
    Message { target: AccountKey, message: String },
    /// A restriction of `kind` against `target` was lifted.
    RestrictionLifted {
        target: AccountKey,
        kind: RestrictionKind,
    },
    /// `target` gained or lost volunteer status.
    VolunteerStatusChanged { target: AccountKey, granted: bool },
}

/// Receiver of [`Effect`]s on the serial context.
///
/// Methods are synchronous: they run on the serial context and must not
/// block on storage.
pub trait SessionHooks: Send + Sync {
    /// Close the target's session.
    fn disconnect(&self, target: AccountKey, message: &str);

    /// Deliver a message to the target.
    fn send_message(&self, target: AccountKey, message: &str);

    /// Called after a restriction was lifted.
    fn on_restriction_lifted(&self, target: AccountKey, kind: RestrictionKind) {
        let _ = (target, kind);
    }

    /// Called after volunteer status was granted or revoked.
    fn on_volunteer_status_changed(&self, target: AccountKey, granted: bool) {
        let _ = (target, granted);
    }
}

/// Hooks that drop every effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {
    fn disconnect(&self, _target: AccountKey, _message: &str) {}

    fn send_message(&self, _target: AccountKey, _message: &str) {}
}

enum Command {
    Apply(Effect),
    Flush(oneshot::Sender<()>),
}

/// Worker-pool runner for storage calls plus the serial effect queue.
pub struct Dispatcher {
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    metrics: Arc<WardenMetrics>,
    effects: mpsc::Sender<Command>,
    serial: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its serial context.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        hooks: Arc<dyn SessionHooks>,
        metrics: Arc<WardenMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.effect_buffer.max(1));
        let serial = tokio::spawn(run_serial(rx, hooks));
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            metrics,
            effects: tx,
            serial: Mutex::new(Some(serial)),
        }
    }

    /// Return a reference to the dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run a storage call on the worker pool.
    ///
    /// Waits for a concurrency permit, spawns `call` onto its own task and
    /// bounds it by [`DispatcherConfig::storage_timeout`]. A call that times
    /// out is aborted. Failures are annotated with `operation`.
    pub async fn storage<T, F>(&self, operation: &'static str, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return Err(EngineError::Configuration("dispatcher is shut down".into()));
        };

        let task = tokio::spawn(async move {
            let _permit = permit;
            call.await
        });
        let abort = task.abort_handle();

        let outcome = match tokio::time::timeout(self.config.storage_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Backend(format!("storage task failed: {join}"))),
            Err(_elapsed) => {
                abort.abort();
                Err(StoreError::Timeout(self.config.storage_timeout))
            }
        };

        outcome.map_err(|source| {
            self.metrics.increment_storage_errors();
            warn!(operation, error = %source, "storage call failed");
            EngineError::storage(operation, source)
        })
    }

    /// Queue an effect for the serial context.
    ///
    /// Effects queued after shutdown are dropped with a warning.
    pub async fn dispatch(&self, effect: Effect) {
        debug!(?effect, "queueing effect");
        if self.effects.send(Command::Apply(effect)).await.is_err() {
            warn!("serial context closed, effect dropped");
        }
    }

    /// Wait until every effect queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.effects.send(Command::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Drain the queue and stop the serial context.
    pub async fn shutdown(&self) {
        self.flush().await;
        self.semaphore.close();
        let handle = self.serial.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("serial context stopped");
        }
    }
}

async fn run_serial(mut rx: mpsc::Receiver<Command>, hooks: Arc<dyn SessionHooks>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Apply(effect) => apply(hooks.as_ref(), &effect),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn apply(hooks: &dyn SessionHooks, effect: &Effect) {
    match effect {
        Effect::Disconnect { target, message } => hooks.disconnect(*target, message),
        Effect::Message { target, message } => hooks.send_message(*target, message),
        Effect::RestrictionLifted { target, kind } => hooks.on_restriction_lifted(*target, *kind),
        Effect::VolunteerStatusChanged { target, granted } => {
            hooks.on_volunteer_status_changed(*target, *granted);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Recording {
        fn record(&self, entry: String) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().push(entry);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl SessionHooks for Recording {
        fn disconnect(&self, target: AccountKey, message: &str) {
            self.record(format!("disconnect {target} {message}"));
        }

        fn send_message(&self, target: AccountKey, message: &str) {
            self.record(format!("message {target} {message}"));
        }

        fn on_restriction_lifted(&self, target: AccountKey, kind: RestrictionKind) {
            self.record(format!("lifted {target} {kind}"));
        }
    }

    fn dispatcher(hooks: Arc<dyn SessionHooks>, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::start(config, hooks, Arc::new(WardenMetrics::default()))
    }

    #[tokio::test]
    async fn effects_apply_in_queue_order() {
        let hooks = Arc::new(Recording::default());
        let d = dispatcher(hooks.clone(), DispatcherConfig::default());
        let target = AccountKey::random();

        d.dispatch(Effect::Message {
            target,
            message: "first".into(),
        })
        .await;
        d.dispatch(Effect::RestrictionLifted {
            target,
            kind: RestrictionKind::Mute,
        })
        .await;
        d.dispatch(Effect::Disconnect {
            target,
            message: "bye".into(),
        })
        .await;
        d.flush().await;

        let seen = hooks.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                format!("message {target} first"),
                format!("lifted {target} mute"),
                format!("disconnect {target} bye"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn serial_context_runs_one_effect_at_a_time() {
        let hooks = Arc::new(Recording::default());
        let d = Arc::new(dispatcher(hooks.clone(), DispatcherConfig::default()));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let d = Arc::clone(&d);
            tasks.push(tokio::spawn(async move {
                d.dispatch(Effect::Message {
                    target: AccountKey::random(),
                    message: i.to_string(),
                })
                .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        d.flush().await;

        assert_eq!(hooks.seen.lock().len(), 32);
        assert_eq!(hooks.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_timeout_surfaces_as_error() {
        let metrics = Arc::new(WardenMetrics::default());
        let d = Dispatcher::start(
            DispatcherConfig {
                storage_timeout: Duration::from_millis(100),
                ..DispatcherConfig::default()
            },
            Arc::new(NoopHooks),
            Arc::clone(&metrics),
        );

        let result: Result<(), EngineError> = d
            .storage("test.hang", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Storage {
                operation: "test.hang",
                source: StoreError::Timeout(_)
            })
        ));
        assert_eq!(metrics.snapshot().storage_errors, 1);
    }

    #[tokio::test]
    async fn storage_errors_pass_through_annotated() {
        let d = dispatcher(Arc::new(NoopHooks), DispatcherConfig::default());
        let result: Result<u32, EngineError> = d
            .storage("test.fail", async {
                Err(StoreError::Constraint("duplicate".into()))
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("test.fail"));

        let ok = d.storage("test.ok", async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    tokio::task_local! {
        static CALLER: u32;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn storage_calls_run_on_their_own_task() {
        let d = dispatcher(Arc::new(NoopHooks), DispatcherConfig::default());
        let saw_caller_scope = CALLER
            .scope(1, async {
                d.storage("test.spawned", async {
                    Ok::<_, StoreError>(CALLER.try_with(|_| ()).is_ok())
                })
                .await
            })
            .await
            .unwrap();
        assert!(!saw_caller_scope);
    }

    fn explode() -> Result<(), StoreError> {
        panic!("backend blew up")
    }

    #[tokio::test]
    async fn panicking_storage_call_becomes_backend_error() {
        let d = dispatcher(Arc::new(NoopHooks), DispatcherConfig::default());
        let result: Result<(), EngineError> = d
            .storage("test.panic", async { explode() })
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Storage {
                operation: "test.panic",
                source: StoreError::Backend(_)
            })
        ));

        let ok = d.storage("test.after_panic", async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_dropped() {
        let hooks = Arc::new(Recording::default());
        let d = dispatcher(hooks.clone(), DispatcherConfig::default());
        d.shutdown().await;
        d.dispatch(Effect::Message {
            target: AccountKey::random(),
            message: "late".into(),
        })
        .await;
        assert!(hooks.seen.lock().is_empty());
        assert!(d.storage("after", async { Ok(()) }).await.is_err());
    }
}

//! Daily quota reset.
//!
//! The first firing lands on the next local midnight in the configured
//! timezone; later firings follow at a fixed 24-hour period. Missed firings
//! are not replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::quota::{QuotaEnforcer, ResetOutcome};

/// Local midnight, every day.
const MIDNIGHT: &str = "0 0 * * *";

/// Time between firings after the first.
pub const RESET_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// When resets happen.
pub struct ResetSchedule {
    tz: Tz,
    cron: croner::Cron,
}

impl std::fmt::Debug for ResetSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetSchedule")
            .field("tz", &self.tz)
            .field("cron", &MIDNIGHT)
            .finish()
    }
}

impl ResetSchedule {
    /// Midnight in `timezone`, an IANA name.
    ///
    /// An unparseable name falls back to UTC with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the midnight expression
    /// cannot be parsed.
    pub fn daily_midnight(timezone: &str) -> Result<Self, EngineError> {
        let tz = timezone.parse::<Tz>().unwrap_or_else(|_| {
            warn!(timezone, "unknown reset timezone, falling back to UTC");
            Tz::UTC
        });
        let cron = croner::Cron::new(MIDNIGHT)
            .parse()
            .map_err(|e| EngineError::Configuration(format!("invalid reset schedule: {e}")))?;
        Ok(Self { tz, cron })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The first firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_tz = after.with_timezone(&self.tz);
        self.cron
            .find_next_occurrence(&after_tz, false)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// How long from `now` until the next firing.
    fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        self.next_after(now)
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(RESET_PERIOD)
    }
}

/// Background task that zeroes quota counters on schedule.
///
/// `Idle -> Resetting -> Idle`: each firing awaits its reset before the
/// loop looks at the timer again, and [`QuotaEnforcer::reset_all`] refuses
/// to overlap with a manual reset.
pub struct ResetScheduler {
    quota: Arc<QuotaEnforcer>,
    schedule: ResetSchedule,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ResetScheduler {
    /// Spawn the scheduler and return the handle that stops it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(quota: Arc<QuotaEnforcer>, schedule: ResetSchedule) -> ResetSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let mut scheduler = Self {
            quota,
            schedule,
            shutdown_rx,
        };
        let join = tokio::spawn(async move { scheduler.run().await });
        ResetSchedulerHandle { shutdown_tx, join }
    }

    async fn run(&mut self) {
        let delay = self.schedule.delay_from(Utc::now());
        info!(
            timezone = %self.schedule.tz,
            first_in_secs = delay.as_secs(),
            "reset scheduler starting"
        );

        let mut ticks = interval_at(Instant::now() + delay, RESET_PERIOD);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("reset scheduler received shutdown signal");
                    break;
                }
                _ = ticks.tick() => {
                    self.fire().await;
                }
            }
        }

        info!("reset scheduler stopped");
    }

    async fn fire(&self) {
        match self.quota.reset_all(Utc::now()).await {
            Ok(ResetOutcome::Completed { .. }) => {}
            Ok(ResetOutcome::Skipped) => warn!("scheduled reset skipped, previous reset still running"),
            Err(e) => error!(error = %e, "scheduled quota reset failed"),
        }
    }
}

/// Owner of a running [`ResetScheduler`].
pub struct ResetSchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ResetSchedulerHandle {
    /// Signal the scheduler and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "reset scheduler task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

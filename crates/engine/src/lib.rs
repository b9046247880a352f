pub mod builder;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notice;
pub mod quota;
pub mod scheduler;
pub mod warden;

pub use builder::WardenBuilder;
pub use directory::{AccountDirectory, StaticDirectory};
pub use dispatcher::{Dispatcher, DispatcherConfig, Effect, NoopHooks, SessionHooks};
pub use error::EngineError;
pub use ledger::PunishmentLedger;
pub use metrics::{MetricsSnapshot, WardenMetrics};
pub use notice::{DEFAULT_REASON, NoticeKind, NoticeTemplates};
pub use quota::{ConsumeResult, QuotaEnforcer, QuotaSnapshot, ResetOutcome, Usage};
pub use scheduler::{RESET_PERIOD, ResetSchedule, ResetScheduler, ResetSchedulerHandle};
pub use warden::{ActiveRestriction, ConnectDecision, IssueReceipt, IssueRequest, Warden};

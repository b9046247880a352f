pub mod error;
pub mod lock;
pub mod store;
pub mod testing;

pub use error::StoreError;
pub use lock::{KeyGuard, KeyLock};
pub use store::{ConsumeAttempt, LedgerStore, PunishmentFilter};

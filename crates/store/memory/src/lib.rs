mod lock;
mod store;

pub use lock::{MemoryKeyGuard, MemoryKeyLock};
pub use store::MemoryLedgerStore;

//! The History Store: persistent, append-only, crash-safe storage of all
//! runs, facts, annotations, actions and remediation snapshots. Reports are
//! projections; this store is the truth.

pub mod lock;
pub mod schema;
pub mod store;

pub use lock::HistoryLock;
pub use store::HistoryStore;

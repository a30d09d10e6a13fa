//! Distributed single-flight execution
//!
//! A named lease is taken from a shared backend before a guarded computation
//! runs, so at most one process in the fleet computes a given report at a time.

pub mod guard;
pub mod memory;
pub mod postgres;
pub mod registry;
pub mod sqlite;
pub mod trait_def;

pub use guard::{ExecutionGuard, LeaseGuard};
pub use memory::MemoryLockBackend;
pub use postgres::PostgresLockBackend;
pub use registry::{LockLease, LockRegistry, LockSettings};
pub use sqlite::SqliteLockBackend;
pub use trait_def::{LockBackend, LockError, LockResult};

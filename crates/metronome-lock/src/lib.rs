//! Lease-based mutual exclusion for task runs.
//!
//! When several scheduler processes evaluate the same task list, each due
//! task should still execute once. The [`TaskMutex`] settles the race: every
//! contender tries one atomic check-and-set against a shared [`LockStore`],
//! the single winner runs, and everyone else skips. Leases make crashes
//! survivable; a holder that dies without releasing only blocks rivals until
//! its time-to-live runs out.
//!
//! [`MemoryLockStore`] is the in-process reference backend. Deployments that
//! actually span processes supply a store whose check-and-set is atomic on
//! shared infrastructure, in the mould of Redis `SET NX PX`.

pub mod error;
pub mod mutex;
pub mod store;

pub use error::{LockError, Result};
pub use mutex::{mutex_key, TaskMutex};
pub use store::{LockStore, MemoryLockStore};

//! Persisted task buffet.
//!
//! Provides:
//! - The in-memory buffet unit (status array + parameter grid) with claim,
//!   complete, reset and merge-on-resume
//! - A self-describing on-disk codec (optionally gzip compressed)
//! - A cross-process exclusive file lock with a scoped guard
//! - A store handle whose sessions hold the lock and persist every mutation
//!   as one atomic replace

pub mod buffet;
pub mod codec;
pub mod lock;
pub mod store;

pub use buffet::{merge, Buffet, BuffetSummary, ClaimedTask, MergeOutcome};
pub use lock::{BuffetLock, LockGuard};
pub use store::{BuffetOptions, BuffetSession, BuffetStore};

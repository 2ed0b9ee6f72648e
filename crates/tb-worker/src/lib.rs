//! # tb-worker
//!
//! Runs tasks from a shared buffet.
//!
//! A [`Worker`] repeatedly claims the next available task, runs it (on its
//! own thread or in a supervised child process that is killed when the time
//! budget runs out), and records the outcome. [`run_workers`] forks several
//! workers onto the same buffet. Unix only.

mod config;
mod launcher;
pub mod supervisor;
mod worker;

pub use config::{Execution, FailurePolicy, WorkerConfig};
pub use launcher::{run_workers, EXIT_DONE, EXIT_OUT_OF_TIME};
pub use supervisor::{ChildExit, ChildHandle};
pub use worker::{RunOutcome, Worker, WorkerReport};

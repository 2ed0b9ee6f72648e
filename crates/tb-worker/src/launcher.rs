//! Run several workers on one buffet, one forked process each.

use tracing::{error, info, warn};

use tb_types::{BuffetError, BuffetResult, TaskParams, TaskStatus};

use crate::config::WorkerConfig;
use crate::supervisor::{ChildExit, ChildHandle, EXIT_FAILURE};
use crate::worker::{RunOutcome, Worker};

pub const EXIT_DONE: i32 = 0;
pub const EXIT_OUT_OF_TIME: i32 = 3;

fn exit_code(outcome: Option<RunOutcome>) -> i32 {
    match outcome {
        Some(RunOutcome::OutOfTime) => EXIT_OUT_OF_TIME,
        Some(RunOutcome::Done) | None => EXIT_DONE,
    }
}

/// Fork `workers` processes that each run a [`Worker`] with `config` and
/// `task`, then wait for all of them.
///
/// Returns `OutOfTime` if any worker ran out of its budget. If any worker
/// failed, every other worker is still waited for before the failures are
/// reported as one [`BuffetError::Launcher`].
///
/// # Safety
///
/// Every worker is a forked copy of the calling process. No other thread of
/// this process may be running while this is called; see
/// [`ChildHandle::spawn`].
pub unsafe fn run_workers<F>(
    workers: usize,
    config: &WorkerConfig,
    task: F,
) -> BuffetResult<RunOutcome>
where
    F: Fn(&TaskParams) -> anyhow::Result<TaskStatus>,
{
    if workers == 0 {
        return Err(BuffetError::configuration("at least one worker is required"));
    }
    let worker = Worker::new(config.clone(), task)?;

    let mut children = Vec::with_capacity(workers);
    for number in 0..workers {
        // SAFETY: the caller guarantees a single-threaded process.
        let child = unsafe {
            ChildHandle::spawn(|_| match worker.run() {
                Ok(report) => exit_code(report.outcome),
                Err(err) => {
                    error!("Worker {} stopped on error: {}", number, err);
                    EXIT_FAILURE
                }
            })
        }?;
        info!("Started worker {} as process {}", number, child.pid());
        children.push(child);
    }

    let mut out_of_time = false;
    let mut failures = Vec::new();
    for (number, child) in children.iter_mut().enumerate() {
        match child.join_timeout(None)? {
            ChildExit::Exited(EXIT_DONE) => {}
            ChildExit::Exited(EXIT_OUT_OF_TIME) => out_of_time = true,
            exit => {
                warn!("Worker {} (process {}) ended with {:?}", number, child.pid(), exit);
                failures.push(format!("worker {number} ended with {exit:?}"));
            }
        }
    }

    if !failures.is_empty() {
        return Err(BuffetError::Launcher {
            message: failures.join(", "),
        });
    }
    let outcome = if out_of_time {
        RunOutcome::OutOfTime
    } else {
        RunOutcome::Done
    };
    info!("All {} workers finished: {:?}", workers, outcome);
    Ok(outcome)
}

//! The claim / execute / complete loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use tb_store::{BuffetStore, ClaimedTask};
use tb_types::{task_error, BuffetError, BuffetResult, TaskParams, TaskStatus, TIME_LEFT_PARAM};

use crate::config::{Execution, FailurePolicy, WorkerConfig};
use crate::supervisor::{ChildExit, ChildHandle, EXIT_FAILURE};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Why a worker stopped claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// No task was left to claim.
    Done,
    /// The time budget ran out.
    OutOfTime,
}

/// Summary of one `Worker::run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: Uuid,
    pub outcome: Option<RunOutcome>,
    pub tasks_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks handed back as available (timed out or self-requeued).
    pub requeued: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkerReport {
    pub fn new(worker_id: Uuid) -> Self {
        Self {
            worker_id,
            outcome: None,
            tasks_run: 0,
            succeeded: 0,
            failed: 0,
            requeued: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, status: TaskStatus) {
        self.tasks_run += 1;
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Available => self.requeued += 1,
            TaskStatus::Running => {}
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_out_of_time(&self) -> bool {
        self.outcome == Some(RunOutcome::OutOfTime)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    Unlimited,
    Left(Duration),
    Spent,
}

/// Pulls tasks from one buffet and runs them with `task` until none is
/// left or the time budget is spent.
///
/// Any number of workers, in any number of processes, may share a buffet
/// as long as they bring compatible grid requests.
pub struct Worker<F> {
    config: WorkerConfig,
    task: F,
}

impl<F> Worker<F>
where
    F: Fn(&TaskParams) -> anyhow::Result<TaskStatus>,
{
    pub fn new(config: WorkerConfig, task: F) -> BuffetResult<Self> {
        config.validate()?;
        Ok(Self { config, task })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and run tasks until none is left or the budget is spent.
    ///
    /// # Fork safety
    ///
    /// With [`Execution::Subprocess`] every task runs in a forked child.
    /// Call this only from a process with no other running threads; see
    /// [`ChildHandle::spawn`].
    pub fn run(&self) -> BuffetResult<WorkerReport> {
        let started = Instant::now();
        let mut report = WorkerReport::new(Uuid::new_v4());
        let store =
            BuffetStore::new(&self.config.buffet_path).with_options(self.config.store_options());
        info!(
            "Worker {} starting on buffet {}",
            report.worker_id,
            store.path().display()
        );

        loop {
            if self.budget(started) == Budget::Spent {
                info!("Out of time, worker {} stops claiming tasks", report.worker_id);
                report.finish(RunOutcome::OutOfTime);
                return Ok(report);
            }

            let claimed = {
                let mut session = store.open(Some(&self.config.request))?;
                session.claim_next()?
            };
            let Some(claimed) = claimed else {
                info!(
                    "No task left, worker {} ran {} tasks",
                    report.worker_id, report.tasks_run
                );
                report.finish(RunOutcome::Done);
                return Ok(report);
            };

            // Waiting for the lock may have used up the rest of the budget.
            let time_left = match self.budget(started) {
                Budget::Unlimited => None,
                Budget::Left(left) => Some(left),
                Budget::Spent => {
                    info!(
                        "Out of time after claiming task {}, putting it back as available",
                        claimed.index
                    );
                    let mut session = store.open(None)?;
                    session.complete_claimed(&claimed, TaskStatus::Available)?;
                    report.finish(RunOutcome::OutOfTime);
                    return Ok(report);
                }
            };

            info!(
                "Running task {} with parameters: {}",
                claimed.index, claimed.params
            );
            let outcome = match self.execute(&claimed, time_left) {
                Ok(status) => status,
                Err(err) if err.is_task_failure() => match self.config.failure_policy {
                    FailurePolicy::FailFast => {
                        error!("Caught error in task {}: {}", claimed.index, err);
                        warn!(
                            "Task {} stays running; reset running tasks to run it again",
                            claimed.index
                        );
                        return Err(err);
                    }
                    FailurePolicy::FailSoft => {
                        error!("Task {} failed, marking it as failed: {}", claimed.index, err);
                        TaskStatus::Failed
                    }
                },
                Err(err) => return Err(err),
            };

            report.record(outcome);
            let mut session = store.open(None)?;
            session.complete_claimed(&claimed, outcome)?;
            info!("Task {} finished as {}", claimed.index, outcome);
        }
    }

    fn budget(&self, started: Instant) -> Budget {
        let Some(budget) = self.config.time_budget else {
            return Budget::Unlimited;
        };
        match budget.checked_sub(started.elapsed()) {
            Some(left) if !left.is_zero() => Budget::Left(left),
            _ => Budget::Spent,
        }
    }

    fn execute(
        &self,
        claimed: &ClaimedTask,
        time_left: Option<Duration>,
    ) -> BuffetResult<TaskStatus> {
        let mut params = claimed.params.clone();
        if let Some(left) = time_left.filter(|_| self.config.inject_time_left) {
            params.insert(TIME_LEFT_PARAM, left.as_secs_f64());
        }

        let status = match self.config.execution {
            Execution::InProcess => self.run_in_process(&params)?,
            Execution::Subprocess => self.run_supervised(&params, time_left)?,
        };

        if !status.is_outcome() {
            return Err(BuffetError::invalid_status(status));
        }
        Ok(status)
    }

    fn run_in_process(&self, params: &TaskParams) -> BuffetResult<TaskStatus> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.task)(params))) {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) => Err(task_error!("{err:#}")),
            Err(payload) => Err(task_error!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn run_supervised(
        &self,
        params: &TaskParams,
        time_left: Option<Duration>,
    ) -> BuffetResult<TaskStatus> {
        let task = &self.task;
        // SAFETY: subprocess execution is only valid from a single-threaded
        // process, as documented on `run` and `Execution::Subprocess`.
        let mut child = unsafe {
            ChildHandle::spawn(|pipe| match task(params) {
                Ok(status) => match pipe.write_all(&[status.code()]) {
                    Ok(()) => 0,
                    Err(_) => EXIT_FAILURE,
                },
                Err(err) => {
                    error!("Task failed in child process: {:#}", err);
                    EXIT_FAILURE
                }
            })
        }?;

        match child.join_timeout(time_left)? {
            ChildExit::TimedOut => {
                child.kill_tree()?;
                warn!(
                    "Out of time, task process {} interrupted; putting the task back as available",
                    child.pid()
                );
                Ok(TaskStatus::Available)
            }
            ChildExit::Exited(0) => {
                let code = child.read_status()?.ok_or_else(|| BuffetError::Status {
                    value: "no status reported by the task process".to_string(),
                })?;
                TaskStatus::from_code(code).ok_or_else(|| BuffetError::Status {
                    value: format!("unknown status code {code}"),
                })
            }
            ChildExit::Exited(code) => {
                warn!(
                    "Task process {} exited with code {}, marking the task as failed",
                    child.pid(),
                    code
                );
                Ok(TaskStatus::Failed)
            }
            ChildExit::Signaled(signal) => {
                warn!(
                    "Task process {} was killed by {}, marking the task as failed",
                    child.pid(),
                    signal
                );
                Ok(TaskStatus::Failed)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

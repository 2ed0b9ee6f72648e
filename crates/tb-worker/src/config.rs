//! Worker configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tb_grid::GridRequest;
use tb_store::BuffetOptions;
use tb_types::{BuffetError, BuffetResult, TIME_LEFT_PARAM};

/// What a worker does when a task errors or reports an invalid outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the worker and propagate the error; the task stays running.
    #[default]
    FailFast,
    /// Mark the task failed and keep going.
    FailSoft,
}

/// Where a claimed task runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    /// Call the task function on the worker's own thread.
    #[default]
    InProcess,
    /// Fork a supervised child per task. A child still running when the
    /// time budget runs out is killed with its descendants and the task
    /// goes back to available.
    ///
    /// Forking is only sound from a single-threaded process, so a worker
    /// using this must not run alongside other threads.
    Subprocess,
}

impl Execution {
    pub fn is_supervised(&self) -> bool {
        matches!(self, Execution::Subprocess)
    }
}

/// Everything a worker needs to pull tasks from a buffet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub buffet_path: PathBuf,

    /// The grid this worker brings; merged into the buffet on every open.
    pub request: GridRequest,

    pub failure_policy: FailurePolicy,

    /// Stop claiming once this much wall time has passed since `run` began.
    pub time_budget: Option<Duration>,

    pub execution: Execution,

    pub allow_merge: bool,

    /// Gzip the buffet when writing it.
    pub compress: bool,

    /// Pass the remaining budget to the task as a `time_left` parameter
    /// (seconds, as a float).
    pub inject_time_left: bool,
}

impl WorkerConfig {
    pub fn new<P: AsRef<Path>>(buffet_path: P, request: GridRequest) -> Self {
        Self {
            buffet_path: buffet_path.as_ref().to_path_buf(),
            request,
            failure_policy: FailurePolicy::default(),
            time_budget: None,
            execution: Execution::default(),
            allow_merge: true,
            compress: true,
            inject_time_left: true,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_allow_merge(mut self, allow_merge: bool) -> Self {
        self.allow_merge = allow_merge;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_inject_time_left(mut self, inject: bool) -> Self {
        self.inject_time_left = inject;
        self
    }

    /// Whether tasks will receive a `time_left` parameter.
    pub fn injects_time_left(&self) -> bool {
        self.inject_time_left && self.time_budget.is_some()
    }

    pub fn store_options(&self) -> BuffetOptions {
        BuffetOptions::default()
            .with_compress(self.compress)
            .with_allow_merge(self.allow_merge)
    }

    pub fn validate(&self) -> BuffetResult<()> {
        if self.injects_time_left() && self.request.has_param(TIME_LEFT_PARAM) {
            return Err(BuffetError::configuration(format!(
                "parameter name '{TIME_LEFT_PARAM}' is reserved while a time budget is set"
            )));
        }
        Ok(())
    }
}

//! Two workers sweeping a 5x5 Cartesian grid.
//!
//! Run it twice: the second run finds every task done and exits at once.
//! Reset failed tasks with `task-buffet sweep_buffet -f` to run them again.

use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tb_grid::GridRequest;
use tb_types::{TaskParams, TaskStatus};
use tb_worker::{run_workers, FailurePolicy, WorkerConfig};

fn sweep(params: &TaskParams) -> anyhow::Result<TaskStatus> {
    let a = params.get_i64("a").unwrap_or_default();
    let b = params.get_i64("b").unwrap_or_default();
    std::thread::sleep(Duration::from_millis(100));
    if (a + b) % 7 == 0 {
        anyhow::bail!("{a} + {b} is a multiple of seven");
    }
    println!("{a} + {b} = {}", a + b);
    Ok(TaskStatus::Success)
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let request = GridRequest::cartesian().param("a", 0..5).param("b", 5..10);
    let config =
        WorkerConfig::new("sweep_buffet", request).with_failure_policy(FailurePolicy::FailSoft);
    // SAFETY: `main` never starts another thread.
    let outcome = unsafe { run_workers(2, &config, sweep) }?;
    println!("Sweep finished: {outcome:?}");
    Ok(())
}

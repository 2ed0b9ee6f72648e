//! # tb-cli
//!
//! `task-buffet`: inspect a buffet and put failed or stale running tasks
//! back on the table. Everything happens under the buffet's lock.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use tb_store::{codec, BuffetOptions, BuffetStore};
use tb_types::TaskStatus;

/// Inspect and repair a task buffet
#[derive(Debug, Parser)]
#[command(name = "task-buffet", version)]
#[command(about = "Inspect and repair a task buffet", long_about = None)]
pub struct Cli {
    /// File containing the buffet; it is locked while this program runs
    pub buffet: PathBuf,

    /// Reset failed tasks to available
    #[arg(short = 'f', long = "reset-failed")]
    pub reset_failed: bool,

    /// Reset running tasks to available (after workers died mid-task)
    #[arg(short = 'r', long = "reset-running")]
    pub reset_running: bool,

    /// Print the parameters of one task
    #[arg(long, value_name = "INDEX")]
    pub show: Option<usize>,

    /// Print task counts per status
    #[arg(long)]
    pub summary: bool,

    /// Skip copying the buffet to `<BUFFET>.bkp` before changing it
    #[arg(long)]
    pub no_backup: bool,
}

impl Cli {
    pub fn has_action(&self) -> bool {
        self.mutates() || self.show.is_some() || self.summary
    }

    pub fn mutates(&self) -> bool {
        self.reset_failed || self.reset_running
    }
}

pub fn backup_path(buffet: &Path) -> PathBuf {
    let mut path = buffet.as_os_str().to_owned();
    path.push(".bkp");
    PathBuf::from(path)
}

/// Keep whatever encoding the file already has when rewriting it.
fn is_compressed_file(path: &Path) -> Result<bool> {
    let mut head = Vec::with_capacity(codec::GZIP_MAGIC.len());
    File::open(path)?
        .take(codec::GZIP_MAGIC.len() as u64)
        .read_to_end(&mut head)?;
    Ok(codec::is_compressed(&head))
}

pub fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<()> {
    if !cli.buffet.exists() {
        bail!("Given buffet {} does not exist.", cli.buffet.display());
    }
    if !cli.has_action() {
        bail!("No action specified, nothing to do.");
    }

    let options = BuffetOptions::default().with_compress(is_compressed_file(&cli.buffet)?);
    let store = BuffetStore::new(&cli.buffet).with_options(options);
    let mut session = store
        .open(None)
        .with_context(|| format!("failed to open buffet {}", cli.buffet.display()))?;

    if cli.mutates() && !cli.no_backup {
        let backup = backup_path(&cli.buffet);
        let bytes = session.backup_to(&backup)?;
        info!("Saved backup {} ({} bytes)", backup.display(), bytes);
    }

    if cli.reset_failed {
        let reset = session.reset(TaskStatus::Failed, TaskStatus::Available)?;
        writeln!(out, "Resetting failed tasks to available: {reset:?}")?;
    }
    if cli.reset_running {
        let reset = session.reset(TaskStatus::Running, TaskStatus::Available)?;
        writeln!(out, "Resetting running tasks to available: {reset:?}")?;
    }

    if let Some(index) = cli.show {
        let params = session.task(index)?;
        let status = session.buffet().statuses()[index];
        writeln!(out, "Task {index} [{status}]: {params}")?;
    }
    if cli.summary {
        writeln!(out, "{}", session.summary())?;
    }

    session.close()?;
    Ok(())
}

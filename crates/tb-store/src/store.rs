//! Lock-holding access to a persisted buffet.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use tb_grid::GridRequest;
use tb_types::{BuffetError, BuffetResult, TaskParams, TaskStatus};

use crate::buffet::{merge, Buffet, BuffetSummary, ClaimedTask, MergeOutcome};
use crate::codec;
use crate::lock::{BuffetLock, LockGuard};

/// How a store reads and writes its buffet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffetOptions {
    /// Gzip the persisted stream.
    pub compress: bool,
    /// Reconcile a differing requested grid instead of failing.
    pub allow_merge: bool,
}

impl Default for BuffetOptions {
    fn default() -> Self {
        Self {
            compress: true,
            allow_merge: true,
        }
    }
}

impl BuffetOptions {
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_allow_merge(mut self, allow_merge: bool) -> Self {
        self.allow_merge = allow_merge;
        self
    }
}

/// A buffet on disk together with its lock.
#[derive(Debug)]
pub struct BuffetStore {
    path: PathBuf,
    lock: BuffetLock,
    options: BuffetOptions,
}

impl BuffetStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            lock: BuffetLock::for_buffet(&path),
            path,
            options: BuffetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuffetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &BuffetOptions {
        &self.options
    }

    pub fn lock(&self) -> &BuffetLock {
        &self.lock
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Take the lock and load the buffet, creating it from `request` when
    /// absent and merging `request` into it when present.
    ///
    /// The lock is held until the returned session is dropped.
    pub fn open(&self, request: Option<&GridRequest>) -> BuffetResult<BuffetSession<'_>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let guard = self.lock.acquire()?;
        let buffet = self.load_or_create(request)?;
        Ok(BuffetSession {
            store: self,
            buffet,
            guard,
        })
    }

    fn load_or_create(&self, request: Option<&GridRequest>) -> BuffetResult<Buffet> {
        if !self.path.exists() {
            let request = request.ok_or_else(|| BuffetError::UninitializedGrid {
                message: format!(
                    "buffet {} does not exist and no parameters were given to create it",
                    self.path.display()
                ),
            })?;
            let buffet = Buffet::new(request.build()?);
            self.persist(&buffet)?;
            info!(
                "Created buffet {} with {} tasks",
                self.path.display(),
                buffet.len()
            );
            return Ok(buffet);
        }

        let bytes = std::fs::read(&self.path)?;
        let saved = codec::decode(&bytes)?;
        let Some(request) = request else {
            return Ok(saved);
        };

        match merge(&saved, &request.build()?, self.options.allow_merge)? {
            MergeOutcome::Unchanged => Ok(saved),
            MergeOutcome::Merged(merged) => {
                self.persist(&merged)?;
                info!(
                    "Persisted merged buffet {} with {} tasks",
                    self.path.display(),
                    merged.len()
                );
                Ok(merged)
            }
        }
    }

    /// Replace the buffet file atomically: readers see the old generation
    /// or the new one, never a partial write.
    fn persist(&self, buffet: &Buffet) -> BuffetResult<()> {
        let bytes = codec::encode(buffet, self.options.compress)?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| BuffetError::Io(err.error))?;
        Ok(())
    }
}

/// An open buffet with the store's lock held; every mutation is persisted
/// before the call returns.
#[derive(Debug)]
pub struct BuffetSession<'a> {
    store: &'a BuffetStore,
    buffet: Buffet,
    guard: LockGuard<'a>,
}

impl BuffetSession<'_> {
    pub fn buffet(&self) -> &Buffet {
        &self.buffet
    }

    pub fn claim_next(&mut self) -> BuffetResult<Option<ClaimedTask>> {
        let claimed = self.buffet.claim_next()?;
        if claimed.is_some() {
            self.store.persist(&self.buffet)?;
        }
        Ok(claimed)
    }

    pub fn complete(&mut self, index: usize, status: TaskStatus) -> BuffetResult<()> {
        self.buffet.complete(index, status)?;
        self.store.persist(&self.buffet)
    }

    pub fn complete_claimed(
        &mut self,
        claimed: &ClaimedTask,
        status: TaskStatus,
    ) -> BuffetResult<usize> {
        let index = self.buffet.complete_claimed(claimed, status)?;
        self.store.persist(&self.buffet)?;
        Ok(index)
    }

    pub fn reset(&mut self, from: TaskStatus, to: TaskStatus) -> BuffetResult<Vec<usize>> {
        let changed = self.buffet.reset(from, to)?;
        if !changed.is_empty() {
            self.store.persist(&self.buffet)?;
        }
        Ok(changed)
    }

    pub fn task(&self, index: usize) -> BuffetResult<TaskParams> {
        self.buffet.task(index)
    }

    pub fn summary(&self) -> BuffetSummary {
        self.buffet.summary()
    }

    /// Copy the persisted file to `destination` while the lock is held.
    pub fn backup_to<P: AsRef<Path>>(&self, destination: P) -> BuffetResult<u64> {
        Ok(std::fs::copy(&self.store.path, destination)?)
    }

    /// Release the lock, surfacing unlock failures.
    pub fn close(self) -> BuffetResult<()> {
        self.guard.release()
    }
}

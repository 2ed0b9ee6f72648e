//! Cross-process exclusive lock guarding a buffet.
//!
//! The lock is an advisory `flock` on a sidecar `<buffet>.lock` file, so
//! every process (and every independent `BuffetLock` within one process)
//! excludes every other. Within one `BuffetLock` the lock belongs to the
//! acquiring thread: that thread may nest acquisitions, other threads wait
//! until the last of its guards is released.

use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

use tb_types::{BuffetError, BuffetResult};

#[derive(Debug, Default)]
struct LockState {
    file: Option<File>,
    owner: Option<ThreadId>,
    holds: usize,
}

#[derive(Debug)]
pub struct BuffetLock {
    path: PathBuf,
    state: Mutex<LockState>,
    released: Condvar,
}

impl BuffetLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// Lock guarding the buffet stored at `buffet_path`.
    pub fn for_buffet<P: AsRef<Path>>(buffet_path: P) -> Self {
        let mut lock_path = buffet_path.as_ref().as_os_str().to_owned();
        lock_path.push(".lock");
        Self::new(PathBuf::from(lock_path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held; the returned guard releases it.
    pub fn acquire(&self) -> BuffetResult<LockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.holds > 0 && state.owner != Some(me) {
            self.released.wait(&mut state);
        }

        if state.holds == 0 {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|err| self.error("failed to open lock file", err))?;
            FileExt::lock_exclusive(&file).map_err(|err| self.error("failed to lock", err))?;
            debug!("Acquired buffet lock {}", self.path.display());
            state.file = Some(file);
            state.owner = Some(me);
        }
        state.holds += 1;
        Ok(LockGuard {
            lock: self,
            released: false,
        })
    }

    /// Whether the calling thread currently holds the lock.
    pub fn is_owned_by_self(&self) -> bool {
        let state = self.state.lock();
        state.holds > 0 && state.owner == Some(thread::current().id())
    }

    fn release_one(&self) -> BuffetResult<()> {
        let mut state = self.state.lock();
        if state.holds == 0 {
            return Ok(());
        }
        state.holds -= 1;
        if state.holds > 0 {
            return Ok(());
        }
        state.owner = None;
        let file = state.file.take();
        self.released.notify_one();
        if let Some(file) = file {
            FileExt::unlock(&file).map_err(|err| self.error("failed to unlock", err))?;
            debug!("Released buffet lock {}", self.path.display());
        }
        Ok(())
    }

    fn error(&self, what: &str, err: std::io::Error) -> BuffetError {
        BuffetError::Lock {
            path: self.path.display().to_string(),
            message: format!("{what}: {err}"),
        }
    }
}

/// Holds one acquisition of a [`BuffetLock`]; released on drop, including
/// during unwinding.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a BuffetLock,
    released: bool,
}

impl LockGuard<'_> {
    /// Release now and report unlock failures instead of logging them.
    pub fn release(mut self) -> BuffetResult<()> {
        self.released = true;
        self.lock.release_one()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.lock.release_one() {
                // Closing the file descriptor drops the flock anyway.
                warn!("{}", err);
            }
        }
    }
}

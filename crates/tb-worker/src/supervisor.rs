//! Forked children with a status pipe, timeouts and process-tree cleanup.
//!
//! A [`ChildHandle`] owns one forked process. The child runs a closure,
//! may write a status byte to the pipe it is handed, and exits with the
//! closure's return value. The parent polls for exit with an optional
//! deadline and can kill the child together with every process it spawned.
//!
//! Descendants are found by walking the OS process table; the table is read
//! from `/proc` on Linux and from `ps` on other Unix systems.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use tb_types::BuffetResult;

/// Exit code of a child whose closure panicked or failed.
pub const EXIT_FAILURE: i32 = 1;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long descendants get to exit after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(1);

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(Signal),
    /// Still running when the deadline passed; the child is not reaped.
    TimedOut,
}

#[derive(Debug)]
pub struct ChildHandle {
    pid: Pid,
    status_pipe: Option<File>,
    reaped: bool,
}

impl ChildHandle {
    /// Fork and run `child_main` in the child.
    ///
    /// The closure receives the write end of the status pipe; its return
    /// value becomes the child's exit code. A panic exits with
    /// [`EXIT_FAILURE`]. The child never returns into the caller and skips
    /// destructors and atexit handlers on the way out.
    ///
    /// # Safety
    ///
    /// Only the calling thread survives in the child. Any lock another
    /// thread holds at the moment of the fork stays locked forever there,
    /// including the allocator's and stdio's. The caller must ensure no
    /// other thread of this process is running, or that `child_main`
    /// restricts itself to async-signal-safe operations.
    pub unsafe fn spawn<F>(child_main: F) -> BuffetResult<Self>
    where
        F: FnOnce(&mut File) -> i32,
    {
        let (read_end, write_end) = pipe().map_err(io::Error::from)?;
        set_cloexec(&read_end)?;
        set_cloexec(&write_end)?;

        // SAFETY: the caller upholds the single-thread contract above, and the
        // child `_exit`s instead of returning into the caller.
        match unsafe { fork() }.map_err(io::Error::from)? {
            ForkResult::Child => {
                drop(read_end);
                let mut writer = File::from(write_end);
                let code = panic::catch_unwind(AssertUnwindSafe(|| child_main(&mut writer)))
                    .unwrap_or(EXIT_FAILURE);
                let _ = writer.flush();
                drop(writer);
                // SAFETY: `_exit` terminates the child immediately without running atexit handlers.
                unsafe { nix::libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                drop(write_end);
                debug!("Forked child {}", child);
                Ok(Self {
                    pid: child,
                    status_pipe: Some(File::from(read_end)),
                    reaped: false,
                })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the child to exit, giving up after `timeout` if one is set.
    pub fn join_timeout(&mut self, timeout: Option<Duration>) -> BuffetResult<ChildExit> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(exit) = self.try_wait()? {
                return Ok(exit);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(ChildExit::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn try_wait(&mut self) -> BuffetResult<Option<ChildExit>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                self.reaped = true;
                Ok(Some(ChildExit::Exited(code)))
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                self.reaped = true;
                Ok(Some(ChildExit::Signaled(signal)))
            }
            Ok(_) | Err(Errno::EINTR) => Ok(None),
            Err(errno) => Err(io::Error::from(errno).into()),
        }
    }

    /// Read the status byte the child wrote, if any.
    ///
    /// Only meaningful once the child has exited. The pipe is close-on-exec,
    /// so programs the task ran cannot keep it open.
    pub fn read_status(&mut self) -> BuffetResult<Option<u8>> {
        let Some(mut pipe) = self.status_pipe.take() else {
            return Ok(None);
        };
        let mut byte = [0u8; 1];
        loop {
            match pipe.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Kill the child and every process descended from it, then reap the
    /// child.
    ///
    /// Descendants get SIGTERM and up to one second to exit before SIGKILL;
    /// the child itself is killed outright.
    pub fn kill_tree(&mut self) -> BuffetResult<()> {
        if self.reaped {
            return Ok(());
        }
        let tree = descendants(self.pid()).unwrap_or_else(|err| {
            warn!("Unable to list descendants of {}: {}", self.pid, err);
            Vec::new()
        });
        debug!("Terminating child {} and descendants {:?}", self.pid, tree);
        for &pid in &tree {
            send_signal(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + TERM_GRACE;
        let mut survivors = tree;
        loop {
            survivors.retain(|&pid| is_alive(pid));
            if survivors.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        for &pid in &survivors {
            warn!("Process {} ignored SIGTERM, killing it", pid);
            send_signal(pid, Signal::SIGKILL);
        }

        send_signal(self.pid(), Signal::SIGKILL);
        self.reap()
    }

    fn reap(&mut self) -> BuffetResult<()> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                    self.reaped = true;
                    return Ok(());
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(errno) => return Err(io::Error::from(errno).into()),
            }
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if !self.reaped {
            warn!("Dropping unreaped child {}, killing it", self.pid);
            if let Err(err) = self.kill_tree() {
                warn!("Failed to clean up child {}: {}", self.pid, err);
            }
        }
    }
}

fn set_cloexec(fd: &OwnedFd) -> BuffetResult<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
    Ok(())
}

fn send_signal(pid: u32, signal: Signal) {
    // ESRCH just means it is already gone.
    let _ = kill(Pid::from_raw(pid as i32), signal);
}

/// Whether `pid` is running. Zombies count as dead.
pub fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok() && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesised command name, which may
    // itself contain spaces or parentheses.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(pid: u32) -> bool {
    std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim_start().starts_with('Z'))
        .unwrap_or(false)
}

/// Every `(pid, ppid)` pair currently in the process table.
#[cfg(target_os = "linux")]
pub fn process_table() -> BuffetResult<Vec<(u32, u32)>> {
    let mut table = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        // Processes can exit between listing and reading.
        let Ok(status) = std::fs::read_to_string(entry.path().join("status")) else {
            continue;
        };
        let ppid = status
            .lines()
            .find_map(|line| line.strip_prefix("PPid:"))
            .and_then(|value| value.trim().parse::<u32>().ok());
        if let Some(ppid) = ppid {
            table.push((pid, ppid));
        }
    }
    Ok(table)
}

/// Every `(pid, ppid)` pair currently in the process table.
#[cfg(not(target_os = "linux"))]
pub fn process_table() -> BuffetResult<Vec<(u32, u32)>> {
    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "pid=", "-o", "ppid="])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!("ps exited with {}", output.status)).into());
    }
    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg_attr(target_os = "linux", allow(dead_code))]
fn parse_ps_output(text: &str) -> Vec<(u32, u32)> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// All live descendants of `root`, parents before children.
pub fn descendants(root: u32) -> BuffetResult<Vec<u32>> {
    Ok(descendants_in(&process_table()?, root))
}

/// Breadth-first walk of a `(pid, ppid)` table from `root`; `root` itself
/// is not included.
pub fn descendants_in(table: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for &(pid, ppid) in table {
        children.entry(ppid).or_default().push(pid);
    }

    let mut seen = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut found = Vec::new();
    while let Some(parent) = queue.pop_front() {
        for &child in children.get(&parent).into_iter().flatten() {
            if seen.insert(child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    found
}

//! Bounds the number of backup processes running at the same time.
//!
//! Each backup runs in a forked child so a slow disk never stalls the job worker that asked
//! for it. The limiter remembers the pid of every child it started. When the limit is reached
//! the caller first collects children that already exited and, if none did, blocks on the
//! oldest one; there is no separate reaper thread.
use crate::{KvsError, Result};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::collections::VecDeque;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};

/// Guards the set of in-flight backup children against a configured maximum
#[derive(Debug)]
pub struct BackupLimiter {
    max: usize,
    // pids of the children that have not been reaped yet, oldest first
    children: Mutex<VecDeque<Pid>>,
}

impl BackupLimiter {
    /// creates a limiter allowing at most `max` concurrent backups (at least one)
    pub fn new(max: usize) -> Self {
        BackupLimiter {
            max: max.max(1),
            children: Mutex::new(VecDeque::new()),
        }
    }

    /// the configured maximum
    pub fn max(&self) -> usize {
        self.max
    }

    /// number of backup children started and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Writes `contents` to `path` from a forked child process.
    ///
    /// Blocks only while `max` backups are already running. The parent does not wait for the
    /// child it starts, the child is reaped later by another call or by [`wait_all`].
    ///
    /// # Errors
    /// returns an error if `path` cannot be passed to the OS or if the fork fails
    ///
    /// [`wait_all`]: BackupLimiter::wait_all
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    pub fn backup(&self, path: &Path, contents: &[u8]) -> Result<()> {
        // everything the child needs is allocated before forking
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| KvsError::StringErr(format!("{:?} contains a NUL byte", path)))?;

        let mut children = self.lock();
        reap_finished(&mut children);
        while children.len() >= self.max {
            if let Some(oldest) = children.pop_front() {
                debug!(
                    pid = oldest.as_raw(),
                    "backup limit reached, waiting for a backup to finish"
                );
                if let Err(e) = waitpid(oldest, None) {
                    warn!("failed waiting for backup process {}: {}", oldest, e);
                }
            }
        }

        // SAFETY: the child only makes async-signal-safe calls before `_exit`
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                debug!(pid = child.as_raw(), "backup process started");
                children.push_back(child);
                Ok(())
            }
            ForkResult::Child => {
                write_snapshot(&c_path, contents);
                unsafe { libc::_exit(0) }
            }
        }
    }

    /// waits for every backup child still running, used at shutdown
    pub fn wait_all(&self) {
        let mut children = self.lock();
        while let Some(pid) = children.pop_front() {
            if let Err(e) = waitpid(pid, None) {
                warn!("failed waiting for backup process {}: {}", pid, e);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Pid>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// drops every child that already exited from `children` without blocking
fn reap_finished(children: &mut VecDeque<Pid>) {
    children.retain(|&pid| match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => true,
        Ok(status) => {
            debug!(?status, "backup process finished");
            false
        }
        Err(e) => {
            warn!("could not check backup process {}: {}", pid, e);
            false
        }
    });
}

/// Runs in the forked child: raw syscalls only, no allocation and no logging.
fn write_snapshot(path: &CString, contents: &[u8]) {
    const OPEN_FAILED: &[u8] = b"backup: could not open the backup file\n";
    const WRITE_FAILED: &[u8] = b"backup: could not write the backup file\n";

    unsafe {
        let fd = libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_TRUNC | libc::O_WRONLY,
            0o600 as libc::c_uint,
        );
        if fd < 0 {
            libc::write(
                libc::STDERR_FILENO,
                OPEN_FAILED.as_ptr() as *const libc::c_void,
                OPEN_FAILED.len(),
            );
            return;
        }

        let mut written = 0;
        while written < contents.len() {
            let rest = &contents[written..];
            let n = libc::write(fd, rest.as_ptr() as *const libc::c_void, rest.len());
            if n <= 0 {
                libc::write(
                    libc::STDERR_FILENO,
                    WRITE_FAILED.as_ptr() as *const libc::c_void,
                    WRITE_FAILED.len(),
                );
                break;
            }
            written += n as usize;
        }
        libc::close(fd);
    }
}

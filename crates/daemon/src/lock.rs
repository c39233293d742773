//! Single-instance lock.
//!
//! A lock file in the state directory records the owning PID. A lock whose
//! PID no longer belongs to a live process is stale and gets replaced.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "ripline.lock";

/// Error type for lock acquisition
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (pid {0})")]
    Held(u32),

    #[error("lock file error: {0}")]
    Io(#[from] io::Error),
}

/// Held for the life of the process; the file is removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock in `state_dir`, clearing a stale one if needed.
    pub fn acquire(state_dir: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE_NAME);

        // Second attempt only after removing a stale file
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    debug!(path = %path.display(), "Instance lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(pid) = live_holder(&path) {
                        return Err(LockError::Held(pid));
                    }
                    warn!(path = %path.display(), "Removing stale lock file");
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        match live_holder(&path) {
            Some(pid) => Err(LockError::Held(pid)),
            None => Err(LockError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("could not replace stale lock {}", path.display()),
            ))),
        }
    }

    /// PID of the live process holding the lock in `state_dir`, if any.
    pub fn holder(state_dir: &Path) -> Option<u32> {
        live_holder(&state_dir.join(LOCK_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn live_holder(path: &Path) -> Option<u32> {
    read_pid(path).filter(|&pid| is_process_alive(pid))
}

/// Whether `pid` names a running process.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A PID that cannot be running: above the kernel's pid_max ceiling.
    const DEAD_PID: u32 = 4_194_305;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(DEAD_PID));
    }

    #[test]
    fn test_acquire_writes_pid_and_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        let path = lock.path().to_path_buf();

        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(InstanceLock::holder(dir.path()), Some(std::process::id()));

        drop(lock);
        assert!(!path.exists());
        assert_eq!(InstanceLock::holder(dir.path()), None);
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = TempDir::new().unwrap();
        let _lock = InstanceLock::acquire(dir.path()).unwrap();

        match InstanceLock::acquire(dir.path()) {
            Err(LockError::Held(pid)) => assert_eq!(pid, std::process::id()),
            other => panic!("expected Held, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), format!("{}\n", DEAD_PID)).unwrap();

        let lock = InstanceLock::acquire(dir.path()).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "not a pid").unwrap();
        assert!(InstanceLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_creates_state_dir() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("nested/state");
        let _lock = InstanceLock::acquire(&state).unwrap();
        assert!(state.join(LOCK_FILE_NAME).exists());
    }
}

// Process management for the daemon: PID file, lock file, liveness checks

use crate::error::{CivicError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Manages PID and lock files for the daemon process
#[derive(Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ProcessManager {
    /// Lock file sits next to the PID file
    pub fn new(pid_file: PathBuf) -> Self {
        let lock_file = pid_file.with_extension("lock");
        Self {
            pid_file,
            lock_file,
        }
    }

    /// Signal-0 probe against the recorded PID
    pub fn is_running(&self) -> bool {
        match self.read_pid() {
            Ok(pid) => kill(Pid::from_raw(pid), None).is_ok(),
            Err(_) => false,
        }
    }

    /// Take the lock and record our PID.
    ///
    /// Files left behind by a daemon that died without cleaning up are
    /// removed first.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            let pid = self.read_pid()?;
            return Err(CivicError::DaemonAlreadyRunning { pid });
        }

        if self.pid_file.exists() || self.lock_file.exists() {
            tracing::warn!("Removing stale PID/lock files at {:?}", self.pid_file);
            self.release()?;
        }

        self.acquire_lock()?;
        self.write_pid(std::process::id())?;

        Ok(())
    }

    /// Remove PID and lock files
    pub fn release(&self) -> Result<()> {
        remove_if_exists(&self.pid_file, "PID file")?;
        remove_if_exists(&self.lock_file, "lock file")?;
        Ok(())
    }

    /// Read PID from file
    pub fn read_pid(&self) -> Result<i32> {
        if !self.pid_file.exists() {
            return Err(CivicError::DaemonNotRunning);
        }

        let contents = std::fs::read_to_string(&self.pid_file).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to read PID file: {:?}", self.pid_file),
        })?;

        contents
            .trim()
            .parse()
            .map_err(|_| CivicError::Daemon(format!("Invalid PID in {:?}", self.pid_file)))
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        ensure_parent(&self.pid_file)?;

        std::fs::write(&self.pid_file, pid.to_string()).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to write PID file: {:?}", self.pid_file),
        })
    }

    fn acquire_lock(&self) -> Result<()> {
        ensure_parent(&self.lock_file)?;

        let mut lock = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_file)
            .map_err(|_| {
                CivicError::Daemon(
                    "Failed to acquire lock - daemon may already be running".to_string(),
                )
            })?;

        writeln!(lock, "{}", std::process::id()).map_err(|e| CivicError::Io {
            source: e,
            context: "Failed to write lock file".to_string(),
        })?;

        Ok(())
    }

    /// Send a signal to the daemon process
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.read_pid()?;
        kill(Pid::from_raw(pid), sig)
            .map_err(|e| CivicError::Daemon(format!("Failed to signal process {}: {}", pid, e)))
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to create directory: {:?}", parent),
        })?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to remove {}: {:?}", what, path),
        })?;
    }
    Ok(())
}

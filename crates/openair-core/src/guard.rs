//! Single-instance guard for the acquisition process.
//!
//! A marker file in a well-known temporary location records the PID of the
//! process that owns the lock. A new process probes whether that PID is
//! still alive: if it is, acquisition fails; if not, the marker is stale and
//! is replaced.
//!
//! This is an advisory lock. Between the liveness probe and the marker
//! write there is a window in which two starting processes can both see "not
//! running". The marker is created with `create_new`, so at most one of them
//! writes it; the other reports the lock as held.
//!
//! # Example
//!
//! ```no_run
//! use openair_core::SingleInstanceGuard;
//!
//! let mut guard = SingleInstanceGuard::new(SingleInstanceGuard::default_path());
//! if !guard.try_acquire() {
//!     println!("OpenAir is already running");
//!     std::process::exit(0);
//! }
//! // ... run ...
//! guard.release();
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tracing::{debug, info, warn};

use crate::error::GuardError;

/// File name of the lock marker inside the temp directory.
pub const LOCK_FILE_NAME: &str = "openair.lock";

/// Checks whether a process with the given PID is running.
pub type LivenessProbe = fn(u32) -> bool;

/// Ensures only one acquisition process runs per machine.
///
/// The marker is removed by [`release`](Self::release), which also runs on
/// drop, so normal returns, panics that unwind, and signal-driven shutdowns
/// that return from `main` all clean up.
#[derive(Debug)]
pub struct SingleInstanceGuard {
    path: PathBuf,
    pid: u32,
    probe: LivenessProbe,
    acquired: bool,
}

impl SingleInstanceGuard {
    /// Create a guard for the marker at `path`. Nothing is touched yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id(),
            probe: process_alive,
            acquired: false,
        }
    }

    /// Replace the liveness probe.
    pub fn with_probe(mut self, probe: LivenessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// `<temp dir>/openair.lock`.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(LOCK_FILE_NAME)
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this guard currently holds the lock.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Try to take the lock.
    ///
    /// Returns `true` if the lock was obtained and `false` if another live
    /// process holds it. If the marker cannot be read or written the failure
    /// is logged and startup is allowed to proceed (`true`) without the guard
    /// owning a marker.
    pub fn try_acquire(&mut self) -> bool {
        match self.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Single instance check failed, starting anyway: {}", e);
                true
            }
        }
    }

    /// Like [`try_acquire`](Self::try_acquire), but surfaces I/O errors.
    pub fn acquire(&mut self) -> Result<bool, GuardError> {
        if self.acquired {
            return Ok(true);
        }

        if let Some(owner) = self.read_owner()? {
            if owner != self.pid && (self.probe)(owner) {
                debug!("Lock {} held by live process {}", self.path.display(), owner);
                return Ok(false);
            }
            info!(
                "Found stale lock file {} (pid {}), cleaning up",
                self.path.display(),
                owner
            );
            self.remove_marker()?;
        } else if self.path.exists() {
            info!("Found unreadable lock file {}, cleaning up", self.path.display());
            self.remove_marker()?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Another process won the race between probe and write.
                debug!("Lock {} created concurrently", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        write!(file, "{}", self.pid).map_err(|e| self.io_error(e))?;
        self.acquired = true;
        info!("Acquired instance lock {} (pid {})", self.path.display(), self.pid);
        Ok(true)
    }

    /// Give up the lock.
    ///
    /// Idempotent, and a no-op on a guard that never acquired. The marker is
    /// only deleted while it still names this process.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;

        match self.read_owner() {
            Ok(Some(owner)) if owner == self.pid => {
                if let Err(e) = self.remove_marker() {
                    warn!("Error cleaning up single instance: {}", e);
                } else {
                    debug!("Released instance lock {}", self.path.display());
                }
            }
            Ok(_) => debug!("Lock {} no longer ours, leaving it", self.path.display()),
            Err(e) => warn!("Error cleaning up single instance: {}", e),
        }
    }

    /// PID recorded in the marker, `None` if absent or unparseable.
    fn read_owner(&self) -> Result<Option<u32>, GuardError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn remove_marker(&self) -> Result<(), GuardError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> GuardError {
        GuardError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Probe the process table for `pid`.
pub fn process_alive(pid: u32) -> bool {
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system.process(Pid::from_u32(pid)).is_some()
}

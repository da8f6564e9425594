//! Advisory per-device file lock.
//!
//! Guards against the Scheduler and a manually-invoked `pt4fu-update`
//! racing to update the same device, and against two `pt4fu-update`
//! invocations overlapping. Implemented as a `flock(2)` advisory lock on a
//! well-known per-device file: open the file, make one `unsafe` syscall,
//! check its return value.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::device_id::DeviceName;

/// Directory the per-device lock files live in.
pub const LOCK_DIR: &str = "/run/lock/pt4-firmware-updater";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock is already held")]
    AlreadyHeld,

    #[error("flock syscall failed: {0}")]
    Syscall(std::io::Error),
}

/// A held advisory lock for one device. Released automatically when
/// dropped (including on process crash, since `flock`s are released by the
/// kernel when the owning file descriptor is closed).
pub struct DeviceLock {
    _file: File,
    device_name: DeviceName,
}

impl DeviceLock {
    pub fn device_name(&self) -> DeviceName {
        self.device_name
    }
}

/// Named mutex factory keyed by [`DeviceName`], backed by files under
/// [`LOCK_DIR`].
pub struct Locker {
    lock_dir: PathBuf,
}

impl Locker {
    pub fn new() -> Self {
        Self {
            lock_dir: PathBuf::from(LOCK_DIR),
        }
    }

    #[cfg(test)]
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    fn lock_path(&self, device_name: DeviceName) -> PathBuf {
        self.lock_dir.join(format!("{device_name}.lock"))
    }

    fn open(&self, device_name: DeviceName) -> Result<File, LockError> {
        let path = self.lock_path(device_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Open {
                path: path.clone(),
                source: e,
            })?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::Open { path, source: e })
    }

    /// Non-blocking probe: is this device's lock currently held by anyone
    /// (including ourselves, in a different `DeviceLock`)?
    pub fn is_locked(&self, device_name: DeviceName) -> Result<bool, LockError> {
        let file = self.open(device_name)?;
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
            Ok(false)
        } else {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => Ok(true),
                _ => Err(LockError::Syscall(err)),
            }
        }
    }

    /// Acquire the lock, blocking until it is free.
    pub fn acquire(&self, device_name: DeviceName) -> Result<DeviceLock, LockError> {
        let file = self.open(device_name)?;
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result != 0 {
            return Err(LockError::Syscall(std::io::Error::last_os_error()));
        }
        Ok(DeviceLock {
            _file: file,
            device_name,
        })
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_acquire(&self, device_name: DeviceName) -> Result<DeviceLock, LockError> {
        let file = self.open(device_name)?;
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => Err(LockError::AlreadyHeld),
                _ => Err(LockError::Syscall(err)),
            };
        }
        Ok(DeviceLock {
            _file: file,
            device_name,
        })
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

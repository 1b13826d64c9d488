//! Advisory locking for exclusive device access

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::TransportError;

/// Take a non-blocking exclusive advisory lock on `file`
///
/// `device_path` is only used for error context.
pub(crate) fn try_lock_exclusive(file: &File, device_path: &str) -> Result<(), TransportError> {
    match file.try_lock() {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(TransportError::Locked {
            path: device_path.to_string(),
        }),
        Err(TryLockError::Error(e)) => Err(TransportError::OpenFailed {
            path: device_path.to_string(),
            source: e,
        }),
    }
}

/// Lock file standing in for a device that cannot be locked directly
///
/// Keyed by the device path, so every process opening the same device
/// contends on the same file.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) struct CompanionLock {
    file: File,
    path: PathBuf,
}

#[cfg_attr(target_os = "linux", allow(dead_code))]
impl CompanionLock {
    /// Acquire the lock for `device_path` inside `dir`
    pub(crate) fn acquire_in(dir: &Path, device_path: &str) -> Result<Self, TransportError> {
        let path = dir.join(lock_file_name(device_path));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| TransportError::OpenFailed {
                path: device_path.to_string(),
                source: e,
            })?;

        try_lock_exclusive(&file, device_path)?;
        debug!("Acquired lock file {}", path.display());
        Ok(Self { file, path })
    }

    /// Acquire the lock for `device_path` in the system temp directory
    pub(crate) fn acquire(device_path: &str) -> Result<Self, TransportError> {
        Self::acquire_in(&std::env::temp_dir(), device_path)
    }

    /// Release the lock and remove the lock file
    pub(crate) fn release(self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
        drop(self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Lock file name for a device path, e.g. `\\?\hid#vid_1d50...` becomes
/// `octokeyz-__hid_vid_1d50....lock`
fn lock_file_name(device_path: &str) -> String {
    let sanitized: String = device_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("octokeyz-{sanitized}.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_name() {
        assert_eq!(lock_file_name("/dev/hidraw3"), "octokeyz-_dev_hidraw3.lock");
        assert_eq!(
            lock_file_name(r"\\?\hid#vid_1d50&pid_6184"),
            "octokeyz-____hid_vid_1d50_pid_6184.lock"
        );
    }

    #[test]
    fn test_companion_lock_contention() {
        let dir = tempfile::tempdir().unwrap();

        let first = CompanionLock::acquire_in(dir.path(), "/dev/hidraw7").unwrap();
        let second = CompanionLock::acquire_in(dir.path(), "/dev/hidraw7");
        assert!(matches!(second, Err(TransportError::Locked { ref path }) if path == "/dev/hidraw7"));

        // A different device is not affected
        let other = CompanionLock::acquire_in(dir.path(), "/dev/hidraw8").unwrap();

        first.release();
        let again = CompanionLock::acquire_in(dir.path(), "/dev/hidraw7").unwrap();
        again.release();
        other.release();
    }

    #[test]
    fn test_try_lock_exclusive_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node");
        std::fs::write(&path, b"").unwrap();

        let a = File::open(&path).unwrap();
        let b = File::open(&path).unwrap();
        try_lock_exclusive(&a, "node").unwrap();
        assert!(matches!(
            try_lock_exclusive(&b, "node"),
            Err(TransportError::Locked { .. })
        ));
        a.unlock().unwrap();
        try_lock_exclusive(&b, "node").unwrap();
    }
}

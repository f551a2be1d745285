//! Plan lock - single-run-per-plan exclusion
//!
//! The lock is a zero-length `.lock` marker inside the plan directory,
//! present iff a run is in progress. The marker is created with
//! create-new semantics so the existence check and the creation are one
//! atomic step. The live guard also holds an advisory `fs2` lock on the
//! marker, which lets `lock_status` tell a running plan apart from a marker
//! left behind by a killed process. Stale markers are only ever removed by
//! `force_clear`, which the CLI exposes as `tp unlock`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Marker file name inside the plan directory
pub const LOCK_FILE: &str = ".lock";

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Plan is running elsewhere (lock held: {0})")]
    Held(PathBuf),

    #[error("Plan has a stale lock at {0}; no run holds it. If no other run is active, clear it with `tp unlock`")]
    Stale(PathBuf),

    #[error("Lock I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Observed state of a plan's lock marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No marker
    Free,
    /// Marker present and a live guard holds it
    Held,
    /// Marker present but nobody holds it
    Stale,
}

/// Path of the lock marker for a plan directory
pub fn lock_path(plan_dir: &Path) -> PathBuf {
    plan_dir.join(LOCK_FILE)
}

/// Guard for an acquired plan lock
///
/// Dropping the guard releases the lock, so early returns, cancellation and
/// unwinding panics can never leave the marker behind.
#[derive(Debug)]
pub struct PlanLock {
    path: PathBuf,
    file: Option<File>,
}

impl PlanLock {
    /// Acquire the lock for a plan directory
    ///
    /// Fails with `LockError::Held` if another run holds it and
    /// `LockError::Stale` if an orphaned marker is in the way.
    pub fn acquire(plan_dir: &Path) -> Result<Self, LockError> {
        let path = lock_path(plan_dir);
        debug!(?path, "PlanLock::acquire: called");

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                if let Err(e) = file.try_lock_exclusive() {
                    // The marker alone still excludes other runs.
                    warn!(?path, error = %e, "PlanLock::acquire: advisory lock unavailable");
                }
                info!(?path, "Plan lock acquired");
                Ok(Self { path, file: Some(file) })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(?path, "PlanLock::acquire: marker already exists");
                match lock_status(plan_dir)? {
                    LockStatus::Stale => Err(LockError::Stale(path)),
                    // Free here means the holder released between our two checks;
                    // report contention rather than retrying.
                    LockStatus::Held | LockStatus::Free => Err(LockError::Held(path)),
                }
            }
            Err(e) => Err(LockError::io(&path, e)),
        }
    }

    /// Path of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting any error removing the marker
    pub fn release(mut self) -> Result<(), LockError> {
        debug!(path = ?self.path, "PlanLock::release: called");
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let _ = FileExt::unlock(&file);
        drop(file);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = ?self.path, "Plan lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = ?self.path, "Plan lock marker already gone on release");
                Ok(())
            }
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }
}

impl Drop for PlanLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "PlanLock::drop: failed to release lock");
        }
    }
}

/// Inspect the lock state of a plan directory without acquiring it
pub fn lock_status(plan_dir: &Path) -> Result<LockStatus, LockError> {
    let path = lock_path(plan_dir);
    debug!(?path, "lock_status: called");

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockStatus::Free),
        Err(e) => return Err(LockError::io(&path, e)),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            debug!(?path, "lock_status: marker present but unheld");
            Ok(LockStatus::Stale)
        }
        Err(_) => Ok(LockStatus::Held),
    }
}

/// Remove a plan's lock marker regardless of who holds it
///
/// Manual override for stale locks. Never call this automatically.
/// Returns whether a marker was removed.
pub fn force_clear(plan_dir: &Path) -> Result<bool, LockError> {
    let path = lock_path(plan_dir);
    debug!(?path, "force_clear: called");
    match fs::remove_file(&path) {
        Ok(()) => {
            warn!(?path, "Plan lock force-cleared");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LockError::io(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_release_round_trip() {
        let temp = tempdir().unwrap();
        let lock = PlanLock::acquire(temp.path()).unwrap();
        assert!(lock_path(temp.path()).exists());
        assert_eq!(fs::metadata(lock.path()).unwrap().len(), 0);

        lock.release().unwrap();
        assert!(!lock_path(temp.path()).exists());

        let again = PlanLock::acquire(temp.path()).unwrap();
        drop(again);
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = tempdir().unwrap();
        let _lock = PlanLock::acquire(temp.path()).unwrap();

        let err = PlanLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, LockError::Held(_)), "got {:?}", err);
        assert!(err.to_string().contains("running elsewhere"));
        assert_eq!(lock_status(temp.path()).unwrap(), LockStatus::Held);
    }

    #[test]
    fn test_drop_releases() {
        let temp = tempdir().unwrap();
        {
            let _lock = PlanLock::acquire(temp.path()).unwrap();
        }
        assert_eq!(lock_status(temp.path()).unwrap(), LockStatus::Free);
        assert!(PlanLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn test_panic_releases() {
        let temp = tempdir().unwrap();
        let dir = temp.path().to_path_buf();

        let result = std::thread::spawn(move || {
            let _lock = PlanLock::acquire(&dir).unwrap();
            panic!("runner blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!lock_path(temp.path()).exists());
    }

    #[test]
    fn test_stale_marker_is_not_cleared_automatically() {
        let temp = tempdir().unwrap();
        fs::write(lock_path(temp.path()), b"").unwrap();

        assert_eq!(lock_status(temp.path()).unwrap(), LockStatus::Stale);
        let err = PlanLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, LockError::Stale(_)), "got {:?}", err);
        assert!(lock_path(temp.path()).exists());

        assert!(force_clear(temp.path()).unwrap());
        assert!(PlanLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn test_force_clear_missing_marker() {
        let temp = tempdir().unwrap();
        assert!(!force_clear(temp.path()).unwrap());
    }
}

//! Cross-process serialization of library init/finalize.
//!
//! Independent processes driving the same hardware counters and
//! registers must not interleave their lifecycle transitions. A
//! well-known lock file under `/var/lock` carries an exclusive flock;
//! the guard releases it on drop, on every exit path.

use std::path::Path;

use crate::error::{QosError, Result};

/// Well-known cross-process lock resource.
pub(crate) const LOCKFILE: &str = "/var/lock/rdtctl";

/// Scoped exclusive lock over the lock file. Acquisition blocks until
/// granted; dropping the guard releases the lock.
pub(crate) struct ProcessLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<std::fs::File>,
}

impl ProcessLock {
    #[cfg(unix)]
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)
            .map_err(|e| {
                log::error!("unable to open lock file {}: {e}", path.display());
                QosError::Io(e)
            })?;
        match nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive) {
            Ok(flock) => Ok(Self { _flock: flock }),
            Err((_, errno)) => {
                log::error!("unable to acquire process lock {}: {errno}", path.display());
                Err(QosError::Failure(format!(
                    "unable to acquire process lock {}: {errno}",
                    path.display()
                )))
            }
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        // No flock on this platform; creating the file still validates
        // the lock path.
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let guard = ProcessLock::acquire(&path).unwrap();
        drop(guard);
        // Released on drop; a second acquisition succeeds.
        let _guard = ProcessLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_acquire_bad_path() {
        let err = ProcessLock::acquire(Path::new("/nonexistent-dir/rdtctl.lock"))
            .map(|_| ())
            .unwrap_err();
        assert!(!err.is_param());
    }
}

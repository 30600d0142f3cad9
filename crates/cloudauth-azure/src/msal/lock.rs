//! Cross-process advisory locking through sibling `.lock` files

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::SyncError;
use crate::fs_util::create_private_dir;

/// How long to wait for another process to release the lock
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// `<target>.lock`
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive lock held until [`LockGuard::release`] or drop
///
/// The OS drops advisory locks when the owning process exits, so a lock
/// file left behind by a crash never blocks later writers.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Lock the sibling `.lock` file of `target`, waiting up to [`LOCK_TIMEOUT`]
    pub fn acquire(target: &Path) -> Result<Self, SyncError> {
        Self::acquire_with_timeout(target, LOCK_TIMEOUT)
    }

    pub fn acquire_with_timeout(target: &Path, timeout: Duration) -> Result<Self, SyncError> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SyncError::Lock {
                path: path.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if Instant::now() < deadline => {
                    debug!("Waiting for lock {}: {}", path.display(), e);
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(source) => return Err(SyncError::Lock { path, source }),
            }
        }

        debug!("Acquired lock {}", path.display());
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock; calling this more than once is a no-op
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                debug!("Failed to unlock {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

//! Per-pod advisory lock.
//!
//! Every state-mutating pod operation holds an exclusive `flock(2)` on the
//! pod's lock file. The lock belongs to the open file description, so a
//! second acquisition from the same process through a new descriptor
//! blocks like any other contender.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use vpod_core::error::{PodError, Result};

use super::{PodResource, ResourceStorage};

/// Exclusive lock on a pod, released by [`PodLock::unlock`] or on drop.
#[derive(Debug)]
pub struct PodLock {
    file: Option<File>,
    path: PathBuf,
}

impl PodLock {
    /// Lock the pod `pod_id` of `storage`, waiting for other holders.
    ///
    /// The lock file must already exist; it is created with the pod's
    /// other resources.
    pub async fn acquire(storage: &dyn ResourceStorage, pod_id: &str) -> Result<Self> {
        let (path, _) = storage.pod_uri(pod_id, PodResource::Lock)?;
        tokio::task::spawn_blocking(move || Self::acquire_path(&path))
            .await
            .map_err(|e| PodError::LockError(format!("lock task failed: {}", e)))?
    }

    /// Blocking acquisition of the lock at `path`.
    pub fn acquire_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PodError::LockError(format!("failed to open {}: {}", path.display(), e))
        })?;

        loop {
            // SAFETY: the descriptor is owned by `file` and stays open for the call.
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret == 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(PodError::LockError(format!(
                    "failed to lock {}: {}",
                    path.display(),
                    err
                )));
            }
        }

        tracing::trace!(path = %path.display(), "Acquired pod lock");
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failures.
    pub fn unlock(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => release(&file, &self.path),
            None => Ok(()),
        }
    }
}

impl Drop for PodLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = release(&file, &self.path) {
                tracing::warn!(error = %e, "Failed to release pod lock");
            }
        }
    }
}

fn release(file: &File, path: &Path) -> Result<()> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if ret != 0 {
        return Err(PodError::LockError(format!(
            "failed to unlock {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    tracing::trace!(path = %path.display(), "Released pod lock");
    Ok(())
}

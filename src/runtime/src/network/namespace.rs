//! Network namespace management.
//!
//! Namespaces are created with `ip netns add`, which bind-mounts them
//! under [`NETNS_RUN_DIR`]. Entering one uses `setns(2)`, which only
//! affects the calling thread.

use std::ffi::CString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use uuid::Uuid;
use vpod_core::error::{PodError, Result};

/// Where `ip netns` keeps named namespaces.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// Namespace of the calling thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Namespace operations used by the plugin backends.
pub trait NamespaceOps: Send + Sync {
    /// Create a fresh, uniquely named namespace and return its path.
    fn create(&self) -> Result<PathBuf>;

    /// Move the calling thread into the namespace at `path`.
    fn enter(&self, path: &Path) -> Result<()>;

    /// Run `f` inside the namespace at `path`, then move the calling thread
    /// back to its original namespace.
    fn run_in(&self, path: &Path, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Destroy the namespace at `path`. A missing namespace is not an error.
    fn delete(&self, path: &Path) -> Result<()>;
}

/// Namespaces of the running host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostNamespaces;

impl NamespaceOps for HostNamespaces {
    fn create(&self) -> Result<PathBuf> {
        create_netns()
    }

    fn enter(&self, path: &Path) -> Result<()> {
        set_netns(path)
    }

    fn run_in(&self, path: &Path, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        do_netns(path, f)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        delete_netns(path)
    }
}

/// Create a namespace named `vpod-<uuid>`.
pub fn create_netns() -> Result<PathBuf> {
    let name = format!("vpod-{}", Uuid::new_v4());

    let output = Command::new("ip")
        .args(["netns", "add", &name])
        .output()
        .map_err(|e| PodError::NetworkError(format!("failed to run ip netns add: {}", e)))?;

    if !output.status.success() {
        return Err(PodError::NetworkError(format!(
            "failed to create network namespace {}: {}",
            name,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let path = Path::new(NETNS_RUN_DIR).join(&name);
    tracing::debug!(netns = %path.display(), "Created network namespace");
    Ok(path)
}

/// Move the calling thread into the namespace at `path`.
pub fn set_netns(path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| {
        PodError::NetworkError(format!(
            "failed to open network namespace {}: {}",
            path.display(),
            e
        ))
    })?;
    setns(&file).map_err(|e| {
        PodError::NetworkError(format!(
            "failed to enter network namespace {}: {}",
            path.display(),
            e
        ))
    })
}

/// Run `f` inside the namespace at `path` and restore the original one.
pub fn do_netns(path: &Path, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    let current = File::open(THREAD_NETNS).map_err(|e| {
        PodError::NetworkError(format!("failed to open current network namespace: {}", e))
    })?;

    set_netns(path)?;
    let result = f();

    if let Err(e) = setns(&current) {
        let restore = PodError::NetworkError(format!(
            "failed to restore network namespace: {}",
            e
        ));
        return match result {
            Ok(()) => Err(restore),
            Err(err) => Err(err.with_cleanup(Err(restore))),
        };
    }
    result
}

/// Destroy the namespace at `path`, unmounting it when it is a bind mount.
pub fn delete_netns(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if is_mount_point(path)? {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            PodError::NetworkError(format!("invalid namespace path {}", path.display()))
        })?;
        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
        let ret = unsafe { libc::umount2(c_path.as_ptr(), libc::MNT_DETACH) };
        if ret != 0 {
            return Err(PodError::NetworkError(format!(
                "failed to unmount network namespace {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(PodError::NetworkError(format!(
                "failed to remove network namespace {}: {}",
                path.display(),
                e
            )))
        }
    }

    tracing::debug!(netns = %path.display(), "Deleted network namespace");
    Ok(())
}

/// Namespace name, the final component of its path.
pub(crate) fn netns_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            PodError::NetworkError(format!(
                "invalid network namespace path '{}'",
                path.display()
            ))
        })
}

fn setns(file: &File) -> std::io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let ret = unsafe { libc::setns(file.as_raw_fd(), libc::CLONE_NEWNET) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn is_mount_point(path: &Path) -> Result<bool> {
    let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mounted_at(&mountinfo, path))
}

/// Whether a mountinfo table lists a mount at `path`.
fn mounted_at(mountinfo: &str, path: &Path) -> bool {
    let target = path.to_string_lossy().replace(' ', "\\040");
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| mount_point == target)
}

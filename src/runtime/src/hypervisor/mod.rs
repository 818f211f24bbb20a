//! Hypervisor drivers.
//!
//! A driver is shared between the pod and the background task running
//! the VM, so every method takes `&self`.

mod mock;
mod qemu;

pub use mock::MockHypervisor;
pub use qemu::Qemu;
#[cfg(test)]
pub(crate) use qemu::process_alive;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use vpod_core::error::{PodError, Result};
use vpod_core::{HypervisorConfig, HypervisorType, PodConfig};

/// Trait for hypervisor implementations.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Check and record the hypervisor configuration.
    async fn init(&self, config: &HypervisorConfig) -> Result<()>;

    /// Prepare the VM description for `config`.
    async fn create_pod(&self, config: &PodConfig) -> Result<()>;

    /// Boot the VM.
    ///
    /// Signals `started` once the VM is up and `stopped` once it is gone,
    /// and only returns after that. Dropping a sender without sending
    /// tells the receiver the signal will never come.
    async fn start_pod(
        &self,
        started: oneshot::Sender<()>,
        stopped: oneshot::Sender<()>,
    ) -> Result<()>;

    /// Shut the VM down. Stopping a VM that is not running succeeds.
    async fn stop_pod(&self) -> Result<()>;
}

/// Driver for `hypervisor_type`, keeping runtime files under `run_path`.
pub fn new_hypervisor(
    hypervisor_type: HypervisorType,
    run_path: &Path,
) -> Result<Arc<dyn Hypervisor>> {
    match hypervisor_type {
        HypervisorType::Qemu => Ok(Arc::new(Qemu::new(run_path))),
        HypervisorType::Mock => Ok(Arc::new(MockHypervisor::new())),
        HypervisorType::Unknown => Err(PodError::HypervisorError(
            "unknown hypervisor type".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hypervisor() {
        let run = Path::new("/run/vpod/pods/p");
        assert!(new_hypervisor(HypervisorType::Qemu, run).is_ok());
        assert!(new_hypervisor(HypervisorType::Mock, run).is_ok());
        assert!(new_hypervisor(HypervisorType::Unknown, run).is_err());
    }
}

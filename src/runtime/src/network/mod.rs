//! Pod networking.
//!
//! A [`Network`] backend prepares the pod's network namespace before the
//! VM starts and tears it down when the pod is deleted. Interface pairs
//! are computed by [`create_network_interface_pairs`]; the CNI and CNM
//! backends bridge them inside the namespace.
//!
//! Backend methods are synchronous: namespace switches apply to the
//! calling OS thread, so they must not be spread across await points.

mod bridge;
mod cni;
mod cnm;
mod namespace;
mod noop;
mod pairs;
mod plugin;

pub use bridge::{Bridge, IpBridge};
pub use cni::CniPlugin;
pub use cnm::CnmPlugin;
pub use namespace::{HostNamespaces, NamespaceOps, NETNS_RUN_DIR};
pub use noop::NoopNetwork;
pub use pairs::{create_network_interface_pairs, interface_mac};
pub use plugin::{NetworkPlugin, PluginNetwork};

use vpod_core::error::PodError;
use vpod_core::{NetworkConfig, NetworkInterfacePair, NetworkModel};

/// A failed `add`, carrying the pairs built before the failure so the
/// caller can clean them up.
#[derive(Debug)]
pub struct NetworkFailure {
    pub pairs: Vec<NetworkInterfacePair>,
    pub error: PodError,
}

impl From<NetworkFailure> for PodError {
    fn from(failure: NetworkFailure) -> Self {
        failure.error
    }
}

pub type AddResult = std::result::Result<Vec<NetworkInterfacePair>, NetworkFailure>;

/// Network backend.
pub trait Network: Send + Sync {
    /// Prepare the pod network. Sets `config.netns_path` when a namespace
    /// is created.
    fn add(&self, config: &mut NetworkConfig) -> AddResult;

    /// Move the calling thread into the pod's network namespace.
    fn join(&self, config: &NetworkConfig) -> vpod_core::Result<()>;

    /// Undo `add` for the given pairs and destroy the namespace.
    fn remove(
        &self,
        config: &NetworkConfig,
        pairs: &[NetworkInterfacePair],
    ) -> vpod_core::Result<()>;
}

/// Backend for `model`.
pub fn new_network(model: NetworkModel) -> Box<dyn Network> {
    match model {
        NetworkModel::Noop => Box::new(NoopNetwork),
        NetworkModel::Cni => Box::new(PluginNetwork::host(NetworkModel::Cni)),
        NetworkModel::Cnm => Box::new(PluginNetwork::host(NetworkModel::Cnm)),
    }
}

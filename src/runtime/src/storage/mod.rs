//! Resource storage for pod configuration, state and network metadata.
//!
//! Resources are addressed by (pod id, optional container id, kind).
//! The default implementation is [`Filesystem`], which keeps one JSON
//! file per resource.

mod filesystem;
mod lock;

pub use filesystem::Filesystem;
pub use lock::PodLock;

use std::fmt;
use std::path::PathBuf;

use vpod_core::error::Result;
use vpod_core::{ContainerConfig, NetworkInterfacePair, PodConfig, State};

/// Configuration file name.
pub const CONFIG_FILE: &str = "config.json";

/// State file name.
pub const STATE_FILE: &str = "state.json";

/// Network file name.
pub const NETWORK_FILE: &str = "network.json";

/// Lock file name.
pub const LOCK_FILE: &str = "lock";

/// Kind of pod resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodResource {
    Config,
    State,
    Network,
    Lock,
}

impl PodResource {
    /// File name of this resource inside its directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            PodResource::Config => CONFIG_FILE,
            PodResource::State => STATE_FILE,
            PodResource::Network => NETWORK_FILE,
            PodResource::Lock => LOCK_FILE,
        }
    }
}

impl fmt::Display for PodResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodResource::Config => write!(f, "config"),
            PodResource::State => write!(f, "state"),
            PodResource::Network => write!(f, "network"),
            PodResource::Lock => write!(f, "lock"),
        }
    }
}

/// Typed resource payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    PodConfig(PodConfig),
    ContainerConfig(ContainerConfig),
    State(State),
    Network(Vec<NetworkInterfacePair>),
}

impl ResourceData {
    /// The only resource kind this payload may be stored as.
    pub fn kind(&self) -> PodResource {
        match self {
            ResourceData::PodConfig(_) | ResourceData::ContainerConfig(_) => PodResource::Config,
            ResourceData::State(_) => PodResource::State,
            ResourceData::Network(_) => PodResource::Network,
        }
    }

    /// Payload name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceData::PodConfig(_) => "pod config",
            ResourceData::ContainerConfig(_) => "container config",
            ResourceData::State(_) => "state",
            ResourceData::Network(_) => "network",
        }
    }
}

impl From<PodConfig> for ResourceData {
    fn from(config: PodConfig) -> Self {
        ResourceData::PodConfig(config)
    }
}

impl From<ContainerConfig> for ResourceData {
    fn from(config: ContainerConfig) -> Self {
        ResourceData::ContainerConfig(config)
    }
}

impl From<State> for ResourceData {
    fn from(state: State) -> Self {
        ResourceData::State(state)
    }
}

impl From<Vec<NetworkInterfacePair>> for ResourceData {
    fn from(pairs: Vec<NetworkInterfacePair>) -> Self {
        ResourceData::Network(pairs)
    }
}

/// Storage backend for pod resources.
///
/// URI functions return both the resource file path and the directory
/// holding it.
pub trait ResourceStorage: Send + Sync {
    /// Create the directories for a pod and its containers, plus the pod
    /// lock file. Everything created is removed again on failure.
    fn create_all_resources(&self, pod_id: &str, containers: &[ContainerConfig]) -> Result<()>;

    fn pod_uri(&self, pod_id: &str, resource: PodResource) -> Result<(PathBuf, PathBuf)>;
    fn container_uri(
        &self,
        pod_id: &str,
        container_id: &str,
        resource: PodResource,
    ) -> Result<(PathBuf, PathBuf)>;

    // Pod resources
    fn store_pod_resource(&self, pod_id: &str, resource: PodResource, data: ResourceData)
        -> Result<()>;
    /// `None` deletes the config and state resources.
    fn delete_pod_resources(&self, pod_id: &str, resources: Option<&[PodResource]>) -> Result<()>;
    fn fetch_pod_config(&self, pod_id: &str) -> Result<PodConfig>;
    fn fetch_pod_state(&self, pod_id: &str) -> Result<State>;
    fn fetch_pod_network(&self, pod_id: &str) -> Result<Vec<NetworkInterfacePair>>;

    // Container resources
    fn store_container_resource(
        &self,
        pod_id: &str,
        container_id: &str,
        resource: PodResource,
        data: ResourceData,
    ) -> Result<()>;
    /// `None` deletes the config and state resources.
    fn delete_container_resources(
        &self,
        pod_id: &str,
        container_id: &str,
        resources: Option<&[PodResource]>,
    ) -> Result<()>;
    fn fetch_container_config(&self, pod_id: &str, container_id: &str) -> Result<ContainerConfig>;
    fn fetch_container_state(&self, pod_id: &str, container_id: &str) -> Result<State>;
}

/// Resources removed when a delete names no kinds.
pub(crate) const DEFAULT_DELETE: &[PodResource] = &[PodResource::Config, PodResource::State];

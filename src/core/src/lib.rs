//! vpod Core - Foundational Types and Abstractions
//!
//! Pod and container configuration, the persisted state machine,
//! network interface pair descriptors, lifecycle events and the shared
//! error type used across the vpod workspace.

pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod state;
pub mod volume;

// Re-export commonly used types
pub use config::{
    AgentConfig, AgentType, Cmd, ContainerConfig, EnvVar, HypervisorConfig, HypervisorType,
    PodConfig, Resources, RuntimeConfig, SocketAgentConfig,
};
pub use error::{PodError, Result};
pub use event::{EventEmitter, PodEvent};
pub use network::{
    HardwareAddr, NetworkConfig, NetworkInterface, NetworkInterfacePair, NetworkModel,
    PluginConfig,
};
pub use state::{State, StateString};
pub use volume::{Socket, Sockets, Volume, Volumes};

/// vpod version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! vpod Runtime - Pod lifecycle engine.
//!
//! This crate drives pods of containers running inside a VM: the
//! persistent resource store and pod lock, network namespace and interface
//! pair setup, hypervisor and guest agent drivers, the pod orchestrator
//! and the high level API used by the CLI.

#![allow(clippy::result_large_err)]

pub mod agent;
pub mod api;
pub mod hypervisor;
pub mod network;
pub mod pod;
pub mod storage;

// Re-export common types
pub use agent::{new_agent, Agent, NoopAgent, SocketAgent};
pub use api::{lock_pod, Runtime};
pub use hypervisor::{new_hypervisor, Hypervisor, MockHypervisor, Qemu};
pub use network::{create_network_interface_pairs, new_network, Network, NetworkFailure};
pub use pod::{Pod, START_TIMEOUT};
pub use storage::{Filesystem, PodLock, PodResource, ResourceData, ResourceStorage};

/// vpod Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

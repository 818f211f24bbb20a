//! Guest agent drivers.

mod noop;
mod socket;

pub use noop::NoopAgent;
pub use socket::{AgentReply, AgentRequest, SocketAgent};

use std::sync::Arc;

use async_trait::async_trait;
use vpod_core::error::Result;
use vpod_core::{AgentConfig, PodConfig};

/// Trait for guest agent implementations.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Record the pod and the agent configuration.
    async fn init(&self, pod: &PodConfig, config: &AgentConfig) -> Result<()>;

    /// Open the control channel to the agent.
    async fn start_agent(&self) -> Result<()>;

    /// Close the control channel.
    async fn stop_agent(&self) -> Result<()>;

    /// Ask the agent to start the pod's containers.
    async fn start_pod(&self, config: &PodConfig) -> Result<()>;

    /// Ask the agent to stop the pod.
    async fn stop_pod(&self, config: &PodConfig) -> Result<()>;
}

/// Agent driver matching `config`.
pub fn new_agent(config: &AgentConfig) -> Arc<dyn Agent> {
    match config {
        AgentConfig::Noop => Arc::new(NoopAgent),
        AgentConfig::Socket(_) => Arc::new(SocketAgent::new()),
    }
}

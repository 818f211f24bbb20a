use async_trait::async_trait;
use vpod_core::error::Result;
use vpod_core::{AgentConfig, PodConfig};

use super::Agent;

/// Agent that accepts every request without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgent;

#[async_trait]
impl Agent for NoopAgent {
    async fn init(&self, _pod: &PodConfig, _config: &AgentConfig) -> Result<()> {
        Ok(())
    }

    async fn start_agent(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_agent(&self) -> Result<()> {
        Ok(())
    }

    async fn start_pod(&self, _config: &PodConfig) -> Result<()> {
        Ok(())
    }

    async fn stop_pod(&self, _config: &PodConfig) -> Result<()> {
        Ok(())
    }
}

//! Agent reached through a host Unix socket.
//!
//! Requests and replies are single-line JSON documents.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::UnixStream;
use vpod_core::error::{PodError, Result};
use vpod_core::{AgentConfig, ContainerConfig, PodConfig};

use super::Agent;

/// Request sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AgentRequest {
    StartPod {
        pod_id: String,
        containers: Vec<ContainerConfig>,
    },
    StopPod {
        pod_id: String,
    },
}

/// Agent reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How long a request waits for the agent's reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Socket agent driver.
pub struct SocketAgent {
    control_socket: Mutex<Option<PathBuf>>,
    conn: tokio::sync::Mutex<Option<BufStream<UnixStream>>>,
    reply_timeout: Duration,
}

impl Default for SocketAgent {
    fn default() -> Self {
        Self {
            control_socket: Mutex::new(None),
            conn: tokio::sync::Mutex::new(None),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl SocketAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    fn control_socket(&self) -> Result<PathBuf> {
        self.control_socket
            .lock()
            .map_err(|_| PodError::AgentError("agent state lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| PodError::AgentError("agent not initialized".to_string()))
    }

    async fn send(&self, request: &AgentRequest) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| PodError::AgentError("agent not started".to_string()))?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        conn.write_all(&line)
            .await
            .map_err(|e| PodError::AgentError(format!("failed to send request: {}", e)))?;
        conn.flush()
            .await
            .map_err(|e| PodError::AgentError(format!("failed to send request: {}", e)))?;

        let mut reply = String::new();
        let read = tokio::time::timeout(self.reply_timeout, conn.read_line(&mut reply)).await;
        let n = match read {
            Ok(read) => {
                read.map_err(|e| PodError::AgentError(format!("failed to read reply: {}", e)))?
            }
            Err(_) => {
                // A late reply would be read as the answer to the next request.
                *guard = None;
                tracing::warn!(timeout = ?self.reply_timeout, "Agent did not reply");
                return Err(PodError::TimeoutError(format!(
                    "agent did not reply within {:?}",
                    self.reply_timeout
                )));
            }
        };
        if n == 0 {
            return Err(PodError::AgentError(
                "agent closed the connection".to_string(),
            ));
        }

        let reply: AgentReply = serde_json::from_str(reply.trim())
            .map_err(|e| PodError::AgentError(format!("invalid agent reply: {}", e)))?;
        if !reply.ok {
            return Err(PodError::AgentError(
                reply.error.unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for SocketAgent {
    async fn init(&self, _pod: &PodConfig, config: &AgentConfig) -> Result<()> {
        let AgentConfig::Socket(config) = config else {
            return Err(PodError::AgentError(format!(
                "socket agent cannot use {} configuration",
                config.agent_type()
            )));
        };
        *self
            .control_socket
            .lock()
            .map_err(|_| PodError::AgentError("agent state lock poisoned".to_string()))? =
            Some(config.control_socket.clone());
        Ok(())
    }

    async fn start_agent(&self) -> Result<()> {
        let path = self.control_socket()?;
        let stream = UnixStream::connect(&path).await.map_err(|e| {
            PodError::AgentError(format!(
                "failed to connect to agent at {}: {}",
                path.display(),
                e
            ))
        })?;

        // Reconnecting replaces any previous channel.
        *self.conn.lock().await = Some(BufStream::new(stream));
        tracing::debug!(socket = %path.display(), "Agent connected");
        Ok(())
    }

    async fn stop_agent(&self) -> Result<()> {
        if let Some(mut conn) = self.conn.lock().await.take() {
            conn.shutdown()
                .await
                .map_err(|e| PodError::AgentError(format!("failed to close agent channel: {}", e)))?;
        }
        Ok(())
    }

    async fn start_pod(&self, config: &PodConfig) -> Result<()> {
        self.send(&AgentRequest::StartPod {
            pod_id: config.id.clone(),
            containers: config.containers.clone(),
        })
        .await
    }

    async fn stop_pod(&self, config: &PodConfig) -> Result<()> {
        self.send(&AgentRequest::StopPod {
            pod_id: config.id.clone(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio::net::UnixListener;
    use vpod_core::SocketAgentConfig;

    /// Serve one connection, answering each request with `reply` and
    /// returning the requests received.
    fn serve(listener: UnixListener, reply: AgentReply) -> tokio::task::JoinHandle<Vec<AgentRequest>> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(serde_json::from_str(&line).unwrap());
                let mut out = serde_json::to_vec(&reply).unwrap();
                out.push(b'\n');
                write.write_all(&out).await.unwrap();
            }
            received
        })
    }

    fn agent_config(path: PathBuf) -> AgentConfig {
        AgentConfig::Socket(SocketAgentConfig {
            control_socket: path,
            sockets: Default::default(),
        })
    }

    fn pod() -> PodConfig {
        PodConfig {
            id: "pod-1".to_string(),
            containers: vec![ContainerConfig {
                id: "c1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_pod() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agent.sock");
        let server = serve(
            UnixListener::bind(&path).unwrap(),
            AgentReply {
                ok: true,
                error: None,
            },
        );

        let agent = SocketAgent::new();
        agent.init(&pod(), &agent_config(path)).await.unwrap();
        agent.start_agent().await.unwrap();
        agent.start_pod(&pod()).await.unwrap();
        agent.stop_pod(&pod()).await.unwrap();
        agent.stop_agent().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        assert!(matches!(
            &received[0],
            AgentRequest::StartPod { pod_id, containers } if pod_id == "pod-1" && containers.len() == 1
        ));
        assert_eq!(
            received[1],
            AgentRequest::StopPod {
                pod_id: "pod-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agent.sock");
        let _server = serve(
            UnixListener::bind(&path).unwrap(),
            AgentReply {
                ok: false,
                error: Some("no such image".to_string()),
            },
        );

        let agent = SocketAgent::new();
        agent.init(&pod(), &agent_config(path)).await.unwrap();
        agent.start_agent().await.unwrap();
        let err = agent.start_pod(&pod()).await.unwrap_err();
        assert_eq!(err.to_string(), "Agent error: no such image");
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        // Accept and read, never answer.
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let agent = SocketAgent::new().with_reply_timeout(Duration::from_millis(100));
        agent.init(&pod(), &agent_config(path)).await.unwrap();
        agent.start_agent().await.unwrap();

        let err = agent.start_pod(&pod()).await.unwrap_err();
        assert!(matches!(err, PodError::TimeoutError(_)), "{err}");

        // The stale connection is dropped.
        let err = agent.stop_pod(&pod()).await.unwrap_err();
        assert_eq!(err.to_string(), "Agent error: agent not started");
    }

    #[tokio::test]
    async fn test_request_before_start() {
        let agent = SocketAgent::new();
        agent
            .init(&pod(), &agent_config(PathBuf::from("/nonexistent.sock")))
            .await
            .unwrap();
        assert!(agent.start_pod(&pod()).await.is_err());
        assert!(agent.start_agent().await.is_err());
    }

    #[tokio::test]
    async fn test_init_rejects_other_config() {
        let agent = SocketAgent::new();
        assert!(agent.init(&pod(), &AgentConfig::Noop).await.is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&AgentRequest::StopPod {
            pod_id: "p".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"stop_pod","pod_id":"p"}"#);
    }
}

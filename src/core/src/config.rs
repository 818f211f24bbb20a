use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PodError, Result};
use crate::network::{NetworkConfig, NetworkModel};
use crate::volume::{Sockets, Volume};

/// Default pod configuration root.
pub const DEFAULT_CONFIG_ROOT: &str = "/var/lib/vpod/pods";

/// Default pod runtime root (state, network, lock).
pub const DEFAULT_RUN_ROOT: &str = "/run/vpod/pods";

/// Default QEMU binary.
pub const DEFAULT_HYPERVISOR_PATH: &str = "/usr/bin/qemu-system-x86_64";

/// Where the resource store keeps pod resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root for `config.json` files.
    pub config_root: PathBuf,

    /// Root for `state.json`, `network.json` and lock files.
    pub run_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_root: PathBuf::from(DEFAULT_CONFIG_ROOT),
            run_root: PathBuf::from(DEFAULT_RUN_ROOT),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `VPOD_CONFIG_ROOT` / `VPOD_RUN_ROOT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os("VPOD_CONFIG_ROOT") {
            config.config_root = PathBuf::from(root);
        }
        if let Some(root) = std::env::var_os("VPOD_RUN_ROOT") {
            config.run_root = PathBuf::from(root);
        }
        config
    }
}

/// A command environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub var: String,
    pub value: String,
}

impl FromStr for EnvVar {
    type Err = PodError;

    /// Parse `VAR=value`. The value may itself contain `=`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((var, value)) if !var.is_empty() => Ok(EnvVar {
                var: var.to_string(),
                value: value.to_string(),
            }),
            _ => Err(PodError::ConfigError(format!(
                "invalid environment variable '{}', expecting VAR=value",
                s
            ))),
        }
    }
}

/// A command to execute in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmd {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<EnvVar>,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub group: String,
}

/// Container configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: String,

    /// Container root filesystem, relative to the pod rootfs.
    #[serde(default)]
    pub rootfs: String,

    #[serde(default)]
    pub cmd: Cmd,

    /// Keep the pod attached to the console until the VM stops.
    #[serde(default)]
    pub interactive: bool,

    #[serde(default)]
    pub console: String,
}

impl ContainerConfig {
    /// Whether starting the pod should block until the VM stops.
    pub fn is_interactive(&self) -> bool {
        self.interactive && !self.console.is_empty()
    }
}

/// VM resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of virtual CPUs
    pub vcpus: u32,

    /// Memory in MiB
    pub memory: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            vcpus: 2,
            memory: 1024,
        }
    }
}

/// Hypervisor implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    /// QEMU/KVM (default).
    #[default]
    Qemu,

    /// In-process mock for tests and hosts without KVM.
    Mock,

    /// Unrecognized value read from a configuration file.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for HypervisorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HypervisorType::Qemu => write!(f, "qemu"),
            HypervisorType::Mock => write!(f, "mock"),
            HypervisorType::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for HypervisorType {
    type Err = PodError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "qemu" => Ok(HypervisorType::Qemu),
            "mock" => Ok(HypervisorType::Mock),
            _ => Err(PodError::ConfigError(format!(
                "unknown hypervisor type '{}' (supported: qemu, mock)",
                s
            ))),
        }
    }
}

/// Hypervisor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// Guest kernel image.
    #[serde(default)]
    pub kernel_path: PathBuf,

    /// Guest root disk image.
    #[serde(default)]
    pub image_path: PathBuf,

    /// Hypervisor binary, `DEFAULT_HYPERVISOR_PATH` when empty.
    #[serde(default)]
    pub hypervisor_path: PathBuf,

    /// Extra kernel command line parameters.
    #[serde(default)]
    pub kernel_params: Vec<String>,
}

impl HypervisorConfig {
    /// Check required paths and fill in the default hypervisor binary.
    pub fn validate(&mut self) -> Result<()> {
        if self.kernel_path.as_os_str().is_empty() {
            return Err(PodError::ConfigError("missing kernel path".to_string()));
        }
        if self.image_path.as_os_str().is_empty() {
            return Err(PodError::ConfigError("missing image path".to_string()));
        }
        if self.hypervisor_path.as_os_str().is_empty() {
            self.hypervisor_path = PathBuf::from(DEFAULT_HYPERVISOR_PATH);
        }
        Ok(())
    }
}

/// Guest agent implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Agent that accepts every request and does nothing.
    #[default]
    Noop,

    /// JSON-lines agent reached through a host Unix socket.
    Socket,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Noop => write!(f, "noop"),
            AgentType::Socket => write!(f, "socket"),
        }
    }
}

impl FromStr for AgentType {
    type Err = PodError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "noop" => Ok(AgentType::Noop),
            "socket" => Ok(AgentType::Socket),
            _ => Err(PodError::ConfigError(format!(
                "unknown agent type '{}' (supported: noop, socket)",
                s
            ))),
        }
    }
}

/// Configuration of the socket agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAgentConfig {
    /// Host side of the agent control channel.
    pub control_socket: PathBuf,

    /// Additional host/guest sockets exposed to the VM.
    #[serde(default)]
    pub sockets: Sockets,
}

/// Agent configuration, one variant per agent type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentConfig {
    #[default]
    Noop,
    Socket(SocketAgentConfig),
}

impl AgentConfig {
    pub fn agent_type(&self) -> AgentType {
        match self {
            AgentConfig::Noop => AgentType::Noop,
            AgentConfig::Socket(_) => AgentType::Socket,
        }
    }
}

/// Pod configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodConfig {
    /// Pod identifier, generated when empty.
    #[serde(default)]
    pub id: String,

    /// VM resources for this pod.
    #[serde(default)]
    pub vm_config: Resources,

    #[serde(default)]
    pub hypervisor_type: HypervisorType,
    #[serde(default)]
    pub hypervisor_config: HypervisorConfig,

    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub agent_config: Option<AgentConfig>,

    #[serde(default)]
    pub network_model: NetworkModel,
    #[serde(default)]
    pub network_config: NetworkConfig,

    /// Pod root filesystem on the host. Empty when the agent assembles
    /// the pod from container images inside the guest.
    #[serde(default)]
    pub rootfs: String,

    /// Volumes shared between the host and the pod.
    #[serde(default)]
    pub volumes: Vec<Volume>,

    /// Containers of the pod. May be empty and filled in later.
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

impl PodConfig {
    /// Normalize and check the configuration.
    ///
    /// Assigns a generated identifier when none is set and falls back to
    /// the default hypervisor when the requested one is unrecognized.
    pub fn validate(&mut self) -> Result<()> {
        if self.hypervisor_type == HypervisorType::Unknown {
            tracing::warn!(
                fallback = %HypervisorType::default(),
                "Unrecognized hypervisor type, using default"
            );
            self.hypervisor_type = HypervisorType::default();
        }

        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        validate_id("pod", &self.id)?;

        let mut seen = HashSet::new();
        for container in &self.containers {
            validate_id("container", &container.id)?;
            if !seen.insert(container.id.as_str()) {
                return Err(PodError::ConfigError(format!(
                    "duplicate container id '{}'",
                    container.id
                )));
            }
        }

        self.resolve_agent_config()?;
        Ok(())
    }

    /// The agent configuration matching `agent_type`.
    ///
    /// An absent configuration resolves to the agent's default; a
    /// configuration for a different agent is rejected.
    pub fn resolve_agent_config(&self) -> Result<AgentConfig> {
        match (&self.agent_config, self.agent_type) {
            (None, AgentType::Noop) => Ok(AgentConfig::Noop),
            (None, AgentType::Socket) => Err(PodError::ConfigError(
                "socket agent requires a control socket configuration".to_string(),
            )),
            (Some(config), agent_type) if config.agent_type() == agent_type => {
                Ok(config.clone())
            }
            (Some(config), agent_type) => Err(PodError::ConfigError(format!(
                "agent configuration for '{}' does not match agent type '{}'",
                config.agent_type(),
                agent_type
            ))),
        }
    }

    /// Whether any container keeps the pod attached to its console.
    pub fn is_interactive(&self) -> bool {
        self.containers.iter().any(ContainerConfig::is_interactive)
    }
}

/// Identifiers become path components in the resource store.
fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(PodError::ConfigError(format!("{} id cannot be empty", kind)));
    }
    if id == "." || id == ".." || id.contains('/') || id.contains('\0') {
        return Err(PodError::ConfigError(format!(
            "invalid {} id '{}'",
            kind, id
        )));
    }
    Ok(())
}

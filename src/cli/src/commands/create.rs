//! `vpod create` command - Create a pod without starting it.

use std::path::{Path, PathBuf};

use clap::Args;
use vpod_core::{AgentType, HypervisorType, NetworkModel, PodConfig, Volumes};
use vpod_runtime::Runtime;

#[derive(Args)]
pub struct CreateArgs {
    /// Pod configuration file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pod ID (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Hypervisor: qemu, mock
    #[arg(long)]
    pub hypervisor: Option<HypervisorType>,

    /// Guest agent: noop, socket
    #[arg(long)]
    pub agent: Option<AgentType>,

    /// Network model: noop, CNI, CNM
    #[arg(long)]
    pub network: Option<NetworkModel>,

    /// Number of network interfaces
    #[arg(long)]
    pub interfaces: Option<i32>,

    /// Shared volume (tag:path), can be repeated
    #[arg(short = 'v', long = "volume")]
    pub volumes: Vec<String>,

    /// Number of vCPUs
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Memory in MiB
    #[arg(long)]
    pub memory: Option<u32>,
}

pub async fn execute(runtime: &Runtime, args: CreateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = pod_config(&args)?;
    let pod = runtime.create_pod(config).await?;
    println!("{}", pod.id());
    Ok(())
}

/// Load the configuration file, if any, and apply command line overrides.
fn pod_config(args: &CreateArgs) -> Result<PodConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PodConfig::default(),
    };

    if let Some(id) = &args.id {
        config.id = id.clone();
    }
    if let Some(hypervisor) = args.hypervisor {
        config.hypervisor_type = hypervisor;
    }
    if let Some(agent) = args.agent {
        config.agent_type = agent;
    }
    if let Some(network) = args.network {
        config.network_model = network;
    }
    if let Some(interfaces) = args.interfaces {
        config.network_config.num_interfaces = interfaces;
    }
    for volume in &args.volumes {
        let Volumes(volumes) = volume.parse::<Volumes>()?;
        config.volumes.extend(volumes);
    }
    if let Some(cpus) = args.cpus {
        config.vm_config.vcpus = cpus;
    }
    if let Some(memory) = args.memory {
        config.vm_config.memory = memory;
    }

    Ok(config)
}

fn load_config(path: &Path) -> Result<PodConfig, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(config)
}

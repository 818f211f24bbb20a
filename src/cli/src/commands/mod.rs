//! CLI command definitions and dispatch.

mod create;
mod delete;
mod start;
mod stop;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vpod_core::RuntimeConfig;
use vpod_runtime::Runtime;

/// vpod - run pods of containers inside a VM.
#[derive(Parser)]
#[command(name = "vpod", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Resource store location, defaulting to `VPOD_CONFIG_ROOT` /
/// `VPOD_RUN_ROOT` or the built-in roots.
#[derive(Args, Default)]
pub struct StoreArgs {
    /// Root directory for pod configurations
    #[arg(long, global = true)]
    pub config_root: Option<PathBuf>,

    /// Root directory for pod state, network and lock files
    #[arg(long, global = true)]
    pub run_root: Option<PathBuf>,
}

impl StoreArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::from_env();
        if let Some(root) = &self.config_root {
            config.config_root = root.clone();
        }
        if let Some(root) = &self.run_root {
            config.run_root = root.clone();
        }
        config
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Create a pod from a configuration file
    Create(create::CreateArgs),
    /// Start a created pod
    Start(start::StartArgs),
    /// Stop a running pod
    Stop(stop::StopArgs),
    /// Delete a stopped pod and its network
    Delete(delete::DeleteArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::new(&cli.store.runtime_config());

    match cli.command {
        Command::Create(args) => create::execute(&runtime, args).await,
        Command::Start(args) => start::execute(&runtime, args).await,
        Command::Stop(args) => stop::execute(&runtime, args).await,
        Command::Delete(args) => delete::execute(&runtime, args).await,
    }
}

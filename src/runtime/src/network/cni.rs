//! CNI plugin invocation.
//!
//! Plugins are executed with the `CNI_*` environment variables and the
//! network configuration on stdin. Errors are reported as a JSON object
//! with a `msg` field on stdout.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use vpod_core::error::{PodError, Result};
use vpod_core::PluginConfig;

use super::plugin::{plugin_input, run_plugin};
use super::NetworkPlugin;

/// A CNI plugin executable.
#[derive(Debug, Clone)]
pub struct CniPlugin {
    plugin: PluginConfig,
}

/// CNI error result.
#[derive(Debug, Deserialize)]
struct CniError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

impl CniPlugin {
    pub fn new(plugin: &PluginConfig) -> Self {
        Self {
            plugin: plugin.clone(),
        }
    }

    /// Directory searched for chained plugins.
    fn search_path(&self) -> PathBuf {
        self.plugin
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    fn invoke(&self, command: &str, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        let mut cmd = Command::new(&self.plugin.path);
        cmd.env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", pair_id)
            .env("CNI_NETNS", netns)
            .env("CNI_IFNAME", ifname)
            .env("CNI_PATH", self.search_path());

        let output = run_plugin(cmd, &plugin_input(&self.plugin)?)?;
        if output.status.success() {
            tracing::debug!(
                plugin = %self.plugin.path.display(),
                command,
                ifname,
                "CNI plugin succeeded"
            );
            return Ok(());
        }

        let reason = match serde_json::from_slice::<CniError>(&output.stdout) {
            Ok(err) if !err.msg.is_empty() => {
                if err.details.is_empty() {
                    format!("{} (code {})", err.msg, err.code)
                } else {
                    format!("{}: {} (code {})", err.msg, err.details, err.code)
                }
            }
            _ => String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        Err(PodError::NetworkError(format!(
            "CNI {} of {} failed: {}",
            command, ifname, reason
        )))
    }
}

impl NetworkPlugin for CniPlugin {
    fn add_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        self.invoke("ADD", pair_id, netns, ifname)
    }

    fn remove_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        self.invoke("DEL", pair_id, netns, ifname)
    }
}

//! CNM driver invocation.
//!
//! The driver executable receives `join` or `leave` as its only argument
//! and a libnetwork-style endpoint request on stdin. A non-empty `Err`
//! in its JSON reply fails the request even when it exits cleanly.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use vpod_core::error::{PodError, Result};
use vpod_core::PluginConfig;

use super::plugin::run_plugin;
use super::NetworkPlugin;

/// A CNM network driver executable.
#[derive(Debug, Clone)]
pub struct CnmPlugin {
    plugin: PluginConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointRequest<'a> {
    #[serde(rename = "EndpointID")]
    endpoint_id: &'a str,
    sandbox_key: &'a Path,
    interface_name: &'a str,
    options: &'a serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointResponse {
    #[serde(rename = "Err", default)]
    err: String,
}

impl CnmPlugin {
    pub fn new(plugin: &PluginConfig) -> Self {
        Self {
            plugin: plugin.clone(),
        }
    }

    fn invoke(&self, action: &str, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        let request = EndpointRequest {
            endpoint_id: pair_id,
            sandbox_key: netns,
            interface_name: ifname,
            options: &self.plugin.config,
        };
        let input = serde_json::to_vec(&request)?;

        let mut cmd = Command::new(&self.plugin.path);
        cmd.arg(action);
        let output = run_plugin(cmd, &input)?;

        let response: EndpointResponse = if output.stdout.iter().all(u8::is_ascii_whitespace) {
            EndpointResponse::default()
        } else {
            serde_json::from_slice(&output.stdout).map_err(|e| {
                PodError::NetworkError(format!("invalid CNM {} reply: {}", action, e))
            })?
        };

        if !response.err.is_empty() {
            return Err(PodError::NetworkError(format!(
                "CNM {} of {} failed: {}",
                action, ifname, response.err
            )));
        }
        if !output.status.success() {
            return Err(PodError::NetworkError(format!(
                "CNM {} of {} failed: {}",
                action,
                ifname,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(plugin = %self.plugin.path.display(), action, ifname, "CNM driver succeeded");
        Ok(())
    }
}

impl NetworkPlugin for CnmPlugin {
    fn add_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        self.invoke("join", pair_id, netns, ifname)
    }

    fn remove_interface(&self, pair_id: &str, netns: &Path, ifname: &str) -> Result<()> {
        self.invoke("leave", pair_id, netns, ifname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::plugin::tests::script;

    #[test]
    fn test_join_request() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let path = script(
            tmp.path(),
            "driver",
            &format!("echo $1 > {out}\ncat >> {out}\necho '{{}}'", out = out.display()),
        );

        let plugin = CnmPlugin::new(&PluginConfig {
            path,
            config: serde_json::json!({"mtu": 1400}),
        });
        plugin
            .add_interface("abc-1", Path::new("/var/run/netns/vpod-2"), "eth1")
            .unwrap();

        let recorded = std::fs::read_to_string(&out).unwrap();
        let mut lines = recorded.lines();
        assert_eq!(lines.next().unwrap(), "join");

        let request: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(request["EndpointID"], "abc-1");
        assert_eq!(request["SandboxKey"], "/var/run/netns/vpod-2");
        assert_eq!(request["InterfaceName"], "eth1");
        assert_eq!(request["Options"]["mtu"], 1400);
    }

    #[test]
    fn test_err_reply_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = script(tmp.path(), "driver", r#"echo '{"Err":"endpoint busy"}'"#);

        let plugin = CnmPlugin::new(&PluginConfig {
            path,
            config: serde_json::Value::Null,
        });
        let err = plugin
            .remove_interface("abc-1", Path::new("/ns"), "eth1")
            .unwrap_err();
        assert!(err.to_string().contains("CNM leave of eth1 failed: endpoint busy"));
    }

    #[test]
    fn test_non_zero_exit_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = script(tmp.path(), "driver", "echo oops >&2; exit 3");

        let plugin = CnmPlugin::new(&PluginConfig {
            path,
            config: serde_json::Value::Null,
        });
        let err = plugin
            .add_interface("abc-1", Path::new("/ns"), "eth1")
            .unwrap_err();
        assert!(err.to_string().ends_with("oops"));
    }
}
